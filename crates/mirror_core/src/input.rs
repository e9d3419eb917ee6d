use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, Lines},
    sync::mpsc,
};

/// Case-insensitive line that ends the send loop.
pub const QUIT_SENTINEL: &str = "quit";

pub fn is_sentinel(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(QUIT_SENTINEL)
}

/// Supplies one line of local input per call; `None` means input is exhausted.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> std::io::Result<Option<String>>;
}

#[async_trait]
impl<R> LineSource for Lines<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

#[async_trait]
impl LineSource for mpsc::Receiver<String> {
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.recv().await)
    }
}
