//! [`Connection`] over a split async byte stream.
//!
//! The read and write halves sit behind separate async locks, so the session
//! read loop never waits on a caller's write and vice versa. Closing wakes a
//! pending read or write and releases both halves as soon as neither is in
//! use; the remote end then sees end-of-stream.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::PeerId;

use super::{CloseSignal, Connection};

// ============================================================================
// StreamConnection
// ============================================================================

/// Duplex connection built from independent read and write halves.
pub struct StreamConnection<R, W> {
    /// Remote end.
    peer: PeerId,
    /// Read half, taken on close.
    reader: Mutex<Option<R>>,
    /// Write half, taken on close.
    writer: Mutex<Option<W>>,
    /// Close flag shared by both directions.
    signal: CloseSignal,
}

impl<R, W> StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps a read/write pair connected to `peer`.
    pub fn new(peer: PeerId, reader: R, writer: W) -> Self {
        Self {
            peer,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            signal: CloseSignal::new(),
        }
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    /// Drops whichever halves are not currently in use.
    fn release_halves(&self) {
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }
}

#[async_trait]
impl<R, W> Connection for StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn peer(&self) -> &PeerId {
        &self.peer
    }

    async fn read(&self, buffer: &mut [u8]) -> Result<usize> {
        let result = {
            let mut guard = self.reader.lock().await;
            let Some(reader) = guard.as_mut() else {
                return Err(Error::ConnectionClosed);
            };

            tokio::select! {
                biased;
                () = self.signal.closed() => Err(Error::ConnectionClosed),
                read = reader.read(buffer) => read.map_err(Error::from),
            }
        };

        if self.signal.is_closed() {
            self.release_halves();
        }

        result
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.signal.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(Error::ConnectionClosed);
            };

            tokio::select! {
                biased;
                () = self.signal.closed() => Err(Error::ConnectionClosed),
                written = async {
                    writer.write_all(data).await?;
                    writer.flush().await
                } => written.map_err(Error::from),
            }
        };

        if self.signal.is_closed() {
            self.release_halves();
        }

        result
    }

    fn close(&self) {
        if self.signal.close() {
            trace!(peer = %self.peer, "Stream connection closed");
        }
        self.release_halves();
    }
}

// ============================================================================
// Tests
// ============================================================================
