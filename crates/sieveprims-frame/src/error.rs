use sieveprims_transport::TransportError;

/// Errors that can occur while framing integer sequences.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte transfer underneath the frame failed.
    #[error("frame transfer error: {0}")]
    Transfer(#[from] TransportError),

    /// The channel ended inside a frame.
    #[error("incomplete frame ({delivered} of {expected} bytes received)")]
    Framing { expected: usize, delivered: usize },

    /// The length prefix is negative.
    #[error("invalid frame length {0}")]
    NegativeLength(i32),

    /// The sequence exceeds the configured maximum length.
    #[error("sequence too long ({len} elements, max {max})")]
    SequenceTooLong { len: usize, max: usize },
}

impl FrameError {
    /// True for malformed or truncated frames, as opposed to transport failures.
    pub fn is_framing(&self) -> bool {
        !matches!(self, FrameError::Transfer(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
