//! Per-project status stream as server-sent events.
//!
//! Subscribers receive only events published after they connect. A sink
//! that lags past the channel capacity is dropped (its stream ends), per
//! the best-effort delivery contract.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::state::AppState;

pub async fn status_events_sse(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let mut rx = state.status.subscribe(project_id);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event("status").data(json));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        project_id = %project_id,
                        skipped,
                        "status sink lagged, dropping subscriber"
                    );
                    break;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
