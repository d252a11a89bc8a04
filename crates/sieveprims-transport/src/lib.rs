//! Pipe channels and reliable byte transfer.
//!
//! This is the lowest layer of sieveprims. It provides:
//! - [`PipeReader`] / [`PipeWriter`], owned ends of a unidirectional pipe
//! - the [`Channel`] trait with anonymous and named (FIFO) implementations
//! - [`send_all`] / [`recv_all`], full-buffer transfer that survives partial
//!   I/O and `EINTR`
//!
//! Everything above (framing, stages, the orchestrator) talks to channels only
//! through these types.

pub mod channel;
pub mod error;
#[cfg(unix)]
pub mod fifo;
#[cfg(unix)]
pub mod pipe;
pub mod reliable;

pub use channel::{ChannelKind, Direction};
#[cfg(unix)]
pub use channel::{AnonymousChannel, Channel, Conduit};
pub use error::{Result, TransportError};
#[cfg(unix)]
pub use fifo::{FifoArtifact, NamedChannel};
#[cfg(unix)]
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use reliable::{flush_all, recv_all, send_all};
