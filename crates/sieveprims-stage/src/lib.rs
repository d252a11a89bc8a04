//! Sieve filter stage and its execution unit lifecycle.
//!
//! A stage receives one sequence, takes its head as the divisor, removes the
//! divisor's multiples from the rest and sends the survivors back. This crate
//! provides the pure filter, the channel pair wiring one stage to the
//! orchestrator, and the execution units (forked process or thread) that run it.

pub mod error;
pub mod filter;
#[cfg(unix)]
pub mod pair;
#[cfg(unix)]
pub mod unit;

pub use error::{Result, StageError, UnitStatus};
pub use filter::{filter_sequence, remove_multiples, run_stage, StageOutcome};
#[cfg(unix)]
pub use pair::{StageChannelPair, StageLink, UnitEnds};
#[cfg(unix)]
pub use unit::{UnitHandle, UnitKind};
