use std::fmt;
use std::io;

use sieveprims_frame::FrameError;
use sieveprims_pipeline::PipelineError;
use sieveprims_stage::StageError;
use sieveprims_transport::TransportError;

// Process exit codes. 64 and 124 follow sysexits(3) and timeout(1).
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;
pub const CANCELLED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::TransferFailed(source) => io_error(context, source),
        TransportError::ChannelSetupFailed { ref source, .. }
        | TransportError::ArtifactSetup { ref source, .. }
            if source.kind() == io::ErrorKind::PermissionDenied =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Transfer(err) => transport_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn stage_error(context: &str, err: StageError) -> CliError {
    match err {
        StageError::ChannelSetupFailed(err) => transport_error(context, err),
        StageError::TransferFailed(err) => frame_error(context, err),
        StageError::SpawnFailed(source) => io_error(context, source),
        StageError::FramingError(_) | StageError::MissingOutput | StageError::InvalidDivisor(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        StageError::UnitFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        StageError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        StageError::Cancelled => CliError::new(CANCELLED, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    match err {
        PipelineError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PipelineError::Stage {
            stage,
            found,
            source,
            ..
        } => stage_error(
            &format!("{context} at stage {stage} after {found} primes"),
            source,
        ),
    }
}
