use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use shared::{
    domain::BlockTag,
    protocol::{EventFilter, LedgerEvent, LocalAction, SubmitReceipt},
};
use thiserror::Error;

mod memory;

pub use memory::{InMemoryLedger, LedgerSubmitter};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("subscription transport failed: {0}")]
    Transport(String),
    #[error("malformed log entry: {0}")]
    Decode(String),
}

pub type SourceItem = Result<LedgerEvent, SourceError>;

/// Ownership of one registration against an event source.
pub trait Registration: Send + Sync {
    /// Releases the registration. Calling it more than once is a no-op.
    fn cancel(&self);
    fn is_cancelled(&self) -> bool;
}

/// Lazily delivered events of one subscription, in arrival order.
///
/// Live streams never end on their own until the registration is cancelled or the
/// provider drops it; range reads end after the last matching entry. Dropping the
/// stream releases the registration.
pub struct EventStream {
    inner: BoxStream<'static, SourceItem>,
    registration: Arc<dyn Registration>,
}

impl EventStream {
    pub fn new(inner: BoxStream<'static, SourceItem>, registration: Arc<dyn Registration>) -> Self {
        Self {
            inner,
            registration,
        }
    }

    pub async fn next(&mut self) -> Option<SourceItem> {
        self.inner.next().await
    }

    pub fn registration(&self) -> Arc<dyn Registration> {
        Arc::clone(&self.registration)
    }

    pub fn cancel(&self) {
        self.registration.cancel();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registration.cancel();
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// `from = Latest, to = Latest` registers for future events only; any other range
    /// is a one-shot finite read.
    async fn subscribe(
        &self,
        filter: EventFilter,
        from: BlockTag,
        to: BlockTag,
    ) -> anyhow::Result<EventStream>;
}

#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    async fn submit(&self, action: LocalAction) -> anyhow::Result<SubmitReceipt>;
}

pub struct MissingActionSubmitter;

#[async_trait]
impl ActionSubmitter for MissingActionSubmitter {
    async fn submit(&self, _action: LocalAction) -> anyhow::Result<SubmitReceipt> {
        Err(anyhow::anyhow!("session is read-only: no submitter configured"))
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
