//! Envelope framing over byte streams.
//!
//! Each frame is a `u32` big-endian length followed by that many bytes of
//! bincode-encoded [`Envelope`]. Frames above `max_frame_len` are refused in
//! both directions; an oversized inbound frame closes the connection.

use std::fmt;

use async_trait::async_trait;
use shared_types::Envelope;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::domain::{Closer, ConnectionError};
use crate::ports::Connection;

/// Length prefix size in bytes.
const LEN_PREFIX: usize = 4;

/// [`Connection`] over a reader and writer pair, e.g. the halves of a TCP
/// stream that has already been authenticated.
pub struct StreamConnection<R, W> {
    reader: tokio::sync::Mutex<R>,
    writer: tokio::sync::Mutex<W>,
    closer: Closer,
    max_frame_len: usize,
}

impl<R, W> fmt::Debug for StreamConnection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("max_frame_len", &self.max_frame_len)
            .field("closed", &self.closer.is_closed())
            .finish()
    }
}

impl<S> StreamConnection<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split a bidirectional stream into a connection.
    #[must_use]
    pub fn from_stream(stream: S, max_frame_len: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, max_frame_len)
    }

    /// Split a stream, limiting frames to the configured `max_frame_len`.
    #[must_use]
    pub fn with_config(stream: S, config: &RegistryConfig) -> Self {
        Self::from_stream(stream, config.max_frame_len)
    }
}

impl<R, W> StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    #[must_use]
    pub fn new(reader: R, writer: W, max_frame_len: usize) -> Self {
        Self {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            closer: Closer::new(),
            max_frame_len,
        }
    }

    async fn write_frame(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let payload =
            bincode::serialize(envelope).map_err(|e| ConnectionError::Codec(e.to_string()))?;
        if payload.len() > self.max_frame_len {
            return Err(ConnectionError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        let len = u32::try_from(payload.len()).map_err(|_| ConnectionError::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;

        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&payload);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    async fn read_frame(&self) -> Result<Envelope, ConnectionError> {
        let mut reader = self.reader.lock().await;
        let len = reader
            .read_u32()
            .await
            .map_err(|e| ConnectionError::Recv(e.to_string()))? as usize;
        if len > self.max_frame_len {
            return Err(ConnectionError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        let mut payload = vec![0u8; len];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| ConnectionError::Recv(e.to_string()))?;
        bincode::deserialize(&payload).map_err(|e| ConnectionError::Codec(e.to_string()))
    }

    async fn shutdown(&self) -> Result<(), ConnectionError> {
        self.closer.close().map_err(|_| ConnectionError::Closed)?;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Stream shutdown failed");
        }
        Ok(())
    }
}

#[async_trait]
impl<R, W> Connection for StreamConnection<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        if self.closer.is_closed() {
            return Err(ConnectionError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.closer.closed() => Err(ConnectionError::Closed),
            written = self.write_frame(&envelope) => written,
        }
    }

    async fn recv(&self) -> Result<Envelope, ConnectionError> {
        if self.closer.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let result = tokio::select! {
            biased;
            _ = self.closer.closed() => return Err(ConnectionError::Closed),
            read = self.read_frame() => read,
        };
        if result.is_err() {
            // a failed read leaves the connection closed
            let _ = self.shutdown().await;
        }
        result
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.shutdown().await
    }
}
