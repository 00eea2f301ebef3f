//! # Chorus Common Library
//!
//! Shared code for the Chorus services including:
//! - Error and result types
//! - Root folder resolution and TOML configuration loading
//! - Event types (ChorusEvent enum) and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
