//! One-shot read of everything a filter has matched so far.
//!
//! Separate from live tailing: the result is finite, unbounded by the ring capacity,
//! and never touches a mirror's view.

use shared::{
    domain::BlockTag,
    protocol::{EventFilter, LedgerEvent},
};
use tracing::info;

use crate::{
    error::{MirrorError, SubscriptionError},
    render::{RenderError, Renderer, HISTORY_HEADER},
    session::LedgerSession,
};

/// Drains `earliest..latest` for `filter` and returns the events in arrival order.
///
/// A source error part way through fails the whole read; partial history is not returned.
pub async fn read_history(
    session: &LedgerSession,
    filter: EventFilter,
) -> Result<Vec<LedgerEvent>, MirrorError> {
    let mut stream = session
        .source()
        .subscribe(filter.clone(), BlockTag::Earliest, BlockTag::Latest)
        .await
        .map_err(|source| MirrorError::Setup {
            target: format!("history of {:?} on {}", filter.kind, filter.contract),
            source,
        })?;

    let mut events = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => events.push(event),
            Err(err) => {
                stream.cancel();
                return Err(SubscriptionError::from(err).into());
            }
        }
    }
    stream.cancel();

    info!(
        contract = %filter.contract,
        kind = ?filter.kind,
        count = events.len(),
        "history: read complete"
    );
    Ok(events)
}

pub fn render_history(
    renderer: &mut dyn Renderer,
    events: &[LedgerEvent],
) -> Result<(), RenderError> {
    if events.is_empty() {
        return renderer.notice("no events recorded yet");
    }
    renderer.render_view(HISTORY_HEADER, events)
}
