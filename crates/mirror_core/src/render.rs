use std::{io::Write, sync::Arc};

use shared::protocol::{EventPayload, LedgerEvent};
use thiserror::Error;
use tokio::sync::Mutex;

pub const CHAT_HEADER: &str = "===chatroom===";
pub const MOVES_HEADER: &str = "===moves===";
pub const GAME_CHAT_HEADER: &str = "===game chat===";
pub const HISTORY_HEADER: &str = "===history===";
pub const DEFAULT_PROMPT: &str = "> ";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render sink failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("render sink is closed")]
    Closed,
}

/// Output target shared by the delivery task and the send path.
pub trait Renderer: Send {
    /// Writes a header, one line per event oldest first, then the prompt marker.
    fn render_view(&mut self, header: &str, events: &[LedgerEvent]) -> Result<(), RenderError>;
    /// Writes a one-line status message (errors, rejected input) followed by the prompt.
    fn notice(&mut self, message: &str) -> Result<(), RenderError>;
}

/// Held only for the duration of one format-and-write; never across network I/O.
pub type SharedRenderer = Arc<Mutex<Box<dyn Renderer>>>;

pub fn shared<R: Renderer + 'static>(renderer: R) -> SharedRenderer {
    Arc::new(Mutex::new(Box::new(renderer)))
}

pub fn format_event(event: &LedgerEvent) -> String {
    match &event.payload {
        EventPayload::NewMessage {
            user_title,
            content,
        } => format!("[{user_title}] {content}"),
        EventPayload::MoveMade {
            game_id,
            position,
            piece,
        } => format!(
            "[*] Move | game={game_id} player={} position={position} piece={}",
            event.originator,
            piece.code()
        ),
        EventPayload::ChatSent {
            game_id,
            message,
            move_number,
        } => format!(
            "[game {game_id} move #{move_number}] {}: {message}",
            event.originator
        ),
    }
}

pub struct TextRenderer<W> {
    out: W,
    prompt: String,
}

impl<W: Write + Send> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self::with_prompt(out, DEFAULT_PROMPT)
    }

    pub fn with_prompt(out: W, prompt: impl Into<String>) -> Self {
        Self {
            out,
            prompt: prompt.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Renderer for TextRenderer<W> {
    fn render_view(&mut self, header: &str, events: &[LedgerEvent]) -> Result<(), RenderError> {
        writeln!(self.out)?;
        writeln!(self.out, "{header}")?;
        for event in events {
            writeln!(self.out, "{}", format_event(event))?;
        }
        write!(self.out, "{}", self.prompt)?;
        self.out.flush()?;
        Ok(())
    }

    fn notice(&mut self, message: &str) -> Result<(), RenderError> {
        writeln!(self.out, "[!] {message}")?;
        write!(self.out, "{}", self.prompt)?;
        self.out.flush()?;
        Ok(())
    }
}
