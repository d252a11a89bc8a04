use std::path::PathBuf;

/// Errors that can occur in channel setup and byte transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The channel could not be created or opened.
    #[error("failed to open {kind} channel: {source}")]
    ChannelSetupFailed {
        kind: &'static str,
        source: std::io::Error,
    },

    /// A named channel artifact could not be created.
    #[error("failed to create channel artifact {path}: {source}")]
    ArtifactSetup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The underlying transport failed with something other than an interruption.
    #[error("transfer failed: {0}")]
    TransferFailed(#[from] std::io::Error),

    /// The channel reached end-of-stream before the buffer was filled.
    #[error("channel closed after {delivered} of {expected} bytes")]
    Truncated { delivered: usize, expected: usize },

    /// The channel accepted zero bytes on write.
    #[error("channel closed by peer")]
    Closed,
}

impl TransportError {
    /// True for failures raised while creating a channel (before any transfer).
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            TransportError::ChannelSetupFailed { .. } | TransportError::ArtifactSetup { .. }
        )
    }

    /// True when the channel ended before any byte of the requested buffer arrived.
    pub fn is_clean_eof(&self) -> bool {
        matches!(self, TransportError::Truncated { delivered: 0, .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
