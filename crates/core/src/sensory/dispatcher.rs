use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use super::sensors::LineSensor;

/// Routes raw text lines to the first sensor whose prefix matches.
#[derive(Clone, Default)]
pub struct LineDispatcher {
    handlers: Vec<Arc<dyn LineSensor>>,
}

impl LineDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sensor: Arc<dyn LineSensor>) {
        self.handlers.push(sensor);
    }

    /// Dispatch one line. Returns false when no handler claimed it.
    pub fn dispatch(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        match self.handlers.iter().find(|h| line.starts_with(h.prefix())) {
            Some(handler) => {
                handler.handle_line(line);
                true
            }
            None => {
                tracing::trace!(line, "no sensor claimed line");
                false
            }
        }
    }

    /// Read lines until EOF or cancellation. Returns the number of lines dispatched.
    /// Bytes that are not valid UTF-8 are replaced, so a noisy line never ends the feed.
    pub async fn run<R>(&self, mut reader: R, cancel: CancellationToken) -> std::io::Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::with_capacity(128);
        let mut dispatched = 0u64;
        loop {
            buf.clear();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(dispatched, "line dispatcher shutting down");
                    return Ok(dispatched);
                }
                read = reader.read_until(b'\n', &mut buf) => {
                    if read? == 0 {
                        tracing::info!(dispatched, "sensor line source closed");
                        return Ok(dispatched);
                    }
                    let line = String::from_utf8_lossy(&buf);
                    if self.dispatch(&line) {
                        dispatched += 1;
                    }
                }
            }
        }
    }

    /// Spawn the dispatcher over a reader as a background task.
    pub fn spawn<R>(
        self,
        reader: R,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<std::io::Result<u64>>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move { self.run(reader, cancel).await })
    }

    /// Like [`LineDispatcher::spawn`], but logs how the feed ended so the
    /// handle can be tracked alongside other background tasks.
    pub fn spawn_logged<R>(
        self,
        reader: R,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            match self.run(reader, cancel).await {
                Ok(dispatched) => tracing::info!(dispatched, "sensor feed finished"),
                Err(e) => tracing::warn!(error = %e, "sensor feed failed"),
            }
        })
    }
}
