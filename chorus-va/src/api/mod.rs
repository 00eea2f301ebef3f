//! HTTP API handlers for chorus-va
//!
//! Thin JSON layer over `AnalysisService` plus the SSE event stream.

pub mod analyses;
pub mod health;
pub mod references;
pub mod sse;

pub use analyses::analysis_routes;
pub use health::health_routes;
pub use references::reference_routes;
pub use sse::event_stream;
