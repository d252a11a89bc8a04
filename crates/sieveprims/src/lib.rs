//! Sequential filter prime sieve.
//!
//! Each sieve round runs in its own execution unit (a forked process or a
//! thread) and talks to the orchestrator only through a pair of pipe channels
//! carrying length-prefixed integer sequences.
//!
//! # Crate Structure
//!
//! - [`transport`]: anonymous and named pipe channels, reliable transfer
//! - [`frame`]: sequence framing on top of any channel
//! - [`stage`]: the filter stage and its execution units
//! - [`pipeline`]: the orchestrator that drives stages until no candidates remain

/// Re-export transport types.
pub mod transport {
    pub use sieveprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sieveprims_frame::*;
}

/// Re-export stage types.
pub mod stage {
    pub use sieveprims_stage::*;
}

/// Re-export pipeline types.
pub mod pipeline {
    pub use sieveprims_pipeline::*;
}

#[cfg(unix)]
pub use sieveprims_pipeline::{sieve, Pipeline, PipelineConfig, RunReport};
