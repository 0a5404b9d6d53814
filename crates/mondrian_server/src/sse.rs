//! SSE adaptation of the per-job event bus.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use mondrian_protocol::{SseFrame, StreamEvent};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::ApiError;
use crate::AppState;

fn to_event(event: &StreamEvent) -> Result<Event, Infallible> {
    match SseFrame::from_event(event) {
        Ok(frame) => Ok(Event::default().event(frame.event).data(frame.data)),
        // Serialization of our own types does not fail; keep the stream
        // alive with an empty payload if it ever does.
        Err(_) => Ok(Event::default().event(event.name())),
    }
}

/// `GET /stream/{id}` — the live event stream.
///
/// Starts with the synthesized `connected` + snapshot events, then relays
/// the broadcast bus. Lagged receivers skip dropped events and continue.
/// For terminal jobs the synthesized events are the whole stream.
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job_id = super::routes::job_id_from_path(&id)?;
    let (initial, live) = state.engine.subscribe(job_id).await?;

    let initial = stream::iter(
        initial
            .iter()
            .map(|event| to_event(event))
            .collect::<Vec<_>>(),
    );
    let live = match live {
        Some(rx) => BroadcastStream::new(rx)
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(to_event(&event)),
                    // Lossy delivery: the subscriber lagged and lost the
                    // oldest events. Keep going.
                    Err(_) => None,
                }
            })
            .left_stream(),
        None => stream::empty().right_stream(),
    };

    Ok(Sse::new(initial.chain(live)).keep_alive(KeepAlive::default()))
}
