//! Live change feed over server-sent events.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::auth::AuthUser;
use crate::AppState;

/// GET /api/events - Stream committed document changes.
///
/// Each event is named `change` and carries a `ChangeEvent` as JSON. A client
/// that falls behind skips the events it missed and should refetch.
pub async fn change_feed(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(uid = %identity.uid, "Change feed subscribed");
    let receiver = state.repo.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) => match Event::default().event("change").json_data(&change) {
                    Ok(event) => return Some((Ok::<_, Infallible>(event), receiver)),
                    Err(e) => tracing::warn!("Failed to encode change event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change feed subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
