use std::io::Write;

use bytes::{BufMut, BytesMut};
use sieveprims_transport::{flush_all, send_all};
use tracing::trace;

use crate::codec::{encode_header, FrameConfig, ELEMENT_SIZE};
use crate::error::{FrameError, Result};

/// Writes complete sequences to any `Write` channel.
pub struct SequenceWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> SequenceWriter<T> {
    /// Create a new sequence writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new sequence writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            config,
        }
    }

    /// Send one sequence as a frame (blocking).
    ///
    /// The length prefix goes out first; the payload follows only when the
    /// sequence is non-empty.
    pub fn send_sequence(&mut self, seq: &[i32]) -> Result<()> {
        if seq.len() > self.config.max_sequence_len {
            return Err(FrameError::SequenceTooLong {
                len: seq.len(),
                max: self.config.max_sequence_len,
            });
        }

        self.buf.clear();
        encode_header(seq.len(), &mut self.buf)?;
        send_all(&mut self.inner, &self.buf)?;

        if !seq.is_empty() {
            self.buf.clear();
            self.buf.reserve(seq.len() * ELEMENT_SIZE);
            for &value in seq {
                self.buf.put_i32_ne(value);
            }
            send_all(&mut self.inner, &self.buf)?;
        }

        trace!(len = seq.len(), "sent frame");
        self.flush()
    }

    /// Flush the underlying channel.
    pub fn flush(&mut self) -> Result<()> {
        flush_all(&mut self.inner).map_err(Into::into)
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner channel.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SequenceWriter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceWriter")
            .field("inner", &self.inner)
            .field("config", &self.config)
            .finish()
    }
}

/// Write one sequence to `channel` with default configuration.
pub fn send_sequence<W: Write>(channel: &mut W, seq: &[i32]) -> Result<()> {
    SequenceWriter::new(channel).send_sequence(seq)
}
