//! Live event mirror: tails a ledger event stream into a bounded view while local
//! input is forwarded to the ledger on a separate path.

pub mod error;
pub mod history;
pub mod input;
pub mod mirror;
pub mod render;
pub mod ring_view;
pub mod session;
pub mod target;

pub use error::{InputError, MirrorError, SubmissionError, SubscriptionError};
pub use history::{read_history, render_history};
pub use input::{is_sentinel, LineSource, QUIT_SENTINEL};
pub use mirror::{ExitReason, LiveMirror, MirrorOptions, MirrorView, SendReport};
pub use render::{format_event, RenderError, Renderer, SharedRenderer, TextRenderer};
pub use ring_view::{RingView, DEFAULT_RING_CAPACITY};
pub use session::LedgerSession;
pub use target::MirrorTarget;

#[cfg(test)]
#[path = "tests/mirror_tests.rs"]
mod tests;
