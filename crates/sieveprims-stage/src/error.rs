use std::fmt;
use std::time::Duration;

use sieveprims_frame::FrameError;
use sieveprims_transport::TransportError;

/// How an execution unit terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitStatus {
    /// The unit exited with this code.
    Exited(i32),
    /// The unit was terminated by this signal.
    Signaled(i32),
    /// The unit thread panicked.
    Panicked,
}

impl UnitStatus {
    pub fn success(self) -> bool {
        self == UnitStatus::Exited(0)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Exited(code) => write!(f, "exit code {code}"),
            UnitStatus::Signaled(signal) => write!(f, "signal {signal}"),
            UnitStatus::Panicked => write!(f, "panic"),
        }
    }
}

/// Errors that can occur while running one stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A channel or its artifact could not be created.
    #[error("channel setup failed: {0}")]
    ChannelSetupFailed(#[source] TransportError),

    /// The execution unit could not be created.
    #[error("failed to spawn execution unit: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Channel I/O failed underneath a frame.
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] FrameError),

    /// A frame was cut short or malformed.
    #[error("framing error: {0}")]
    FramingError(#[source] FrameError),

    /// The unit closed its output without writing a frame.
    #[error("execution unit produced no output frame")]
    MissingOutput,

    /// The unit terminated abnormally.
    #[error("execution unit failed ({0})")]
    UnitFailed(UnitStatus),

    /// Waiting for the unit failed.
    #[error("failed to reap execution unit: {0}")]
    WaitFailed(#[source] std::io::Error),

    /// The unit did not finish in time and was killed.
    #[error("execution unit timed out after {0:?}")]
    Timeout(Duration),

    /// The stage was asked to filter by a divisor that cannot be a prime.
    #[error("invalid divisor {0}")]
    InvalidDivisor(i32),

    /// The run was cancelled before this stage started.
    #[error("cancelled")]
    Cancelled,
}

impl From<FrameError> for StageError {
    fn from(err: FrameError) -> Self {
        if err.is_framing() {
            StageError::FramingError(err)
        } else {
            StageError::TransferFailed(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
