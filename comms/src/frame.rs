//! Length-prefixed frame transport.
//!
//! Every frame on the wire is a big-endian `u32` length followed by
//! the body. Typed frames carry a JSON document; raw frames carry
//! opaque bytes that are forwarded without inspection.

use std::io;

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_SIZE};

/// The sending end handle of the communication.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as one JSON frame.
    ///
    /// # Arguments
    /// * `msg` - A serializable message.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);
        serde_json::to_writer(&mut *buf, msg)?;

        let len = buf.len() - LEN_TYPE_SIZE;
        let header = (len as LenType).to_be_bytes();
        buf[..header.len()].copy_from_slice(&header);

        tx.write_all(buf).await?;
        tx.flush().await
    }

    /// Sends an opaque frame unmodified.
    pub async fn send_raw(&mut self, frame: &[u8]) -> io::Result<()> {
        let header = (frame.len() as LenType).to_be_bytes();
        self.tx.write_all(&header).await?;
        self.tx.write_all(frame).await?;
        self.tx.flush().await
    }
}

/// The receiving end handle of the communication.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            buf: Vec::new(),
        }
    }

    async fn fill_next(&mut self) -> io::Result<()> {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte cap"),
            ));
        }

        self.buf.resize(len, 0);
        self.rx.read_exact(&mut self.buf).await?;
        Ok(())
    }

    /// Waits for the next frame and deserializes it as `T`.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on
    /// failure (including malformed JSON).
    pub async fn recv<T: DeserializeOwned>(&mut self) -> io::Result<T> {
        self.fill_next().await?;
        Ok(serde_json::from_slice(&self.buf)?)
    }

    /// Waits for the next frame and returns its raw body.
    pub async fn recv_raw(&mut self) -> io::Result<Vec<u8>> {
        self.fill_next().await?;
        Ok(self.buf.clone())
    }
}
