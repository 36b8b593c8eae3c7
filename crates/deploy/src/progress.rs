//! Progress sink for a single deploy attempt.
//!
//! The sink is whatever the caller hands in (stdout, a socket, a buffer).
//! A failing sink never fails a step: the first write error is logged and
//! every later write is dropped.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Single-writer wrapper over a caller-supplied byte sink.
pub struct Progress<'a> {
    sink: &'a mut (dyn AsyncWrite + Send + Unpin),
    written: u64,
    broken: bool,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a mut (dyn AsyncWrite + Send + Unpin)) -> Self {
        Self {
            sink,
            written: 0,
            broken: false,
        }
    }

    /// Writes raw bytes.
    pub async fn write(&mut self, bytes: &[u8]) {
        if self.broken || bytes.is_empty() {
            return;
        }
        match self.sink.write_all(bytes).await {
            Ok(()) => self.written += bytes.len() as u64,
            Err(e) => {
                warn!(error = %e, "progress sink failed, dropping further output");
                self.broken = true;
            }
        }
    }

    /// Writes `text` followed by a newline and flushes.
    pub async fn line(&mut self, text: &str) {
        self.write(text.as_bytes()).await;
        self.write(b"\n").await;
        self.flush().await;
    }

    pub async fn flush(&mut self) {
        if self.broken {
            return;
        }
        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "progress sink flush failed, dropping further output");
            self.broken = true;
        }
    }

    /// Bytes successfully written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}
