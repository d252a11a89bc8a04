//! Sequential sieve pipeline.
//!
//! The orchestrator starts from `[2, N]`, reports the head of the current
//! sequence as the next prime, and hands the sequence to a fresh execution
//! unit that sends back the survivors. One unit is alive at a time; each is
//! reaped before its output is accepted.

#[cfg(unix)]
pub mod config;
pub mod error;
#[cfg(unix)]
pub mod orchestrator;

#[cfg(unix)]
pub use config::{PipelineConfig, DEFAULT_UPPER_BOUND};
pub use error::{PipelineError, Result};
#[cfg(unix)]
pub use orchestrator::{candidates, sieve, Pipeline, RunReport};
