//! GET /events - pipeline events over Server-Sent Events
//!
//! Streams ReferenceStatusChanged, AnalysisStarted, AnalysisCompleted and
//! AnalysisFailed.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    chorus_common::sse::create_event_sse_stream(&state.event_bus, "chorus-va")
}
