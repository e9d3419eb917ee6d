use ledger_integration::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("invalid ring capacity {0}: must be at least 1")]
    InvalidCapacity(usize),
    #[error("failed to establish live subscription for {target}: {source}")]
    Setup {
        target: String,
        source: anyhow::Error,
    },
    #[error("failed to read input line: {0}")]
    Input(#[from] std::io::Error),
    #[error("history read failed: {0}")]
    History(#[from] SubscriptionError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("live subscription reported an error: {0}")]
    Source(#[from] SourceError),
    #[error("live subscription was dropped by the event source; showing buffered events only")]
    Dropped,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("submission failed: {cause}")]
pub struct SubmissionError {
    pub cause: String,
}

impl SubmissionError {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        Self {
            cause: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("expected two coordinates like `7 7`, got {0:?}")]
    MalformedMove(String),
    #[error("coordinate {0:?} is not a number")]
    InvalidCoordinate(String),
    #[error("position ({x},{y}) is outside the {size}x{size} board")]
    OffBoard { x: u8, y: u8, size: u8 },
    #[error("no game selected; restart with --game <id> to make moves")]
    NoGameSelected,
}
