use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use karkhana_shared::models::WorkshopEvent;

use crate::error::AppError;
use crate::extract::ApiQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub work_order_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/events/stream", get(event_stream))
}

/// GET /v1/events/stream
/// Live workshop events, optionally for one work order.
pub async fn event_stream(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receiver = state.workshop.subscribe();
    let filter = params.work_order_id;

    let stream = BroadcastStream::new(receiver).filter_map(move |item| async move {
        match item {
            Ok(event) if filter.map_or(true, |id| event.work_order_id() == id) => to_sse(&event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!("Event stream subscriber lagged, skipped {} events", skipped);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &WorkshopEvent) -> Option<Result<Event, Infallible>> {
    match Event::default().event(event.name()).json_data(event) {
        Ok(sse) => Some(Ok(sse)),
        Err(e) => {
            tracing::error!("Failed to encode {} event: {}", event.name(), e);
            None
        }
    }
}
