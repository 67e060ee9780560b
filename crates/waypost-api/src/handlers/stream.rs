//! Server-sent event stream for live tracking updates.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::{Stream, StreamExt};
use tracing::{info, instrument};
use waypost_core::TrackingNumber;
use waypost_live::PushEvent;

use crate::AppState;

/// Converts a push event into an SSE frame.
pub fn to_sse_event(event: &PushEvent) -> Event {
    Event::default().event(event.kind().as_str()).data(event.data())
}

/// Opens a live event stream for a tracking number.
///
/// The tracking number is not checked: viewers may connect before the
/// tracking exists and simply see no state events. The stream starts with a
/// `connected` event and carries heartbeats while idle. Closing the
/// connection drops the subscription.
#[instrument(name = "tracking_events", skip(state))]
pub async fn tracking_events(
    Path(tracking_number): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tracking_number = TrackingNumber::from(tracking_number);
    let subscription = state.registry.subscribe(&tracking_number);

    info!(
        subscriber_id = %subscription.id(),
        subscribers = state.registry.subscriber_count(&tracking_number),
        "event stream opened"
    );

    Sse::new(subscription.map(|event| Ok(to_sse_event(&event))))
}
