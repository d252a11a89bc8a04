use sieveprims_stage::StageError;

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configuration cannot produce a valid run.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A stage failed. Primes reported before it remain valid.
    ///
    /// Every unit spawned before the failure has been reaped, so
    /// `units_reaped == stages_spawned`.
    #[error("stage {stage} failed after {found} primes: {source}")]
    Stage {
        stage: usize,
        found: usize,
        stages_spawned: usize,
        units_reaped: usize,
        #[source]
        source: StageError,
    },
}

impl PipelineError {
    /// Index of the failing stage, if the failure happened inside one.
    pub fn stage(&self) -> Option<usize> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            PipelineError::InvalidConfig(_) => None,
        }
    }

    /// Units spawned and reaped before the run stopped, as `(spawned, reaped)`.
    pub fn unit_counts(&self) -> Option<(usize, usize)> {
        match self {
            PipelineError::Stage {
                stages_spawned,
                units_reaped,
                ..
            } => Some((*stages_spawned, *units_reaped)),
            PipelineError::InvalidConfig(_) => None,
        }
    }

    /// The underlying stage error, if any.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            PipelineError::Stage { source, .. } => Some(source),
            PipelineError::InvalidConfig(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
