//! Channel abstraction.
//!
//! A channel hands out one fresh [`Conduit`] per stage and direction. The
//! orchestrator and stage logic only see pipe ends, so anonymous and named
//! channels are interchangeable.

#[cfg(unix)]
use tracing::debug;

#[cfg(unix)]
use crate::error::{Result, TransportError};
#[cfg(unix)]
use crate::fifo::FifoArtifact;
#[cfg(unix)]
use crate::pipe::{pipe, PipeReader, PipeWriter};

/// Which concrete channel implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelKind {
    /// Anonymous pipes inherited or moved into the unit.
    #[default]
    Anonymous,
    /// Filesystem FIFOs, created per stage and unlinked afterwards.
    Named,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Anonymous => "anonymous",
            ChannelKind::Named => "named",
        }
    }
}

/// Direction of a conduit relative to the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Orchestrator -> unit.
    Request,
    /// Unit -> orchestrator.
    Response,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Request => "req",
            Direction::Response => "resp",
        }
    }
}

/// Both ends of one freshly opened unidirectional channel.
#[cfg(unix)]
#[derive(Debug)]
pub struct Conduit {
    pub reader: PipeReader,
    pub writer: PipeWriter,
    /// Backing filesystem artifact for named channels.
    pub artifact: Option<FifoArtifact>,
}

#[cfg(unix)]
impl Conduit {
    /// Split into read end, write end and optional artifact guard.
    pub fn into_parts(self) -> (PipeReader, PipeWriter, Option<FifoArtifact>) {
        (self.reader, self.writer, self.artifact)
    }
}

/// Source of per-stage conduits.
#[cfg(unix)]
pub trait Channel: Send + Sync {
    /// Which implementation this is.
    fn kind(&self) -> ChannelKind;

    /// Open a fresh conduit for `stage` in `direction`. Never reused.
    fn open(&self, stage: usize, direction: Direction) -> Result<Conduit>;
}

/// Channel backed by anonymous `pipe(2)` conduits.
#[cfg(unix)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousChannel;

#[cfg(unix)]
impl Channel for AnonymousChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Anonymous
    }

    fn open(&self, stage: usize, direction: Direction) -> Result<Conduit> {
        let (reader, writer) = pipe().map_err(|source| TransportError::ChannelSetupFailed {
            kind: ChannelKind::Anonymous.as_str(),
            source,
        })?;
        debug!(stage, direction = direction.as_str(), "opened anonymous conduit");
        Ok(Conduit {
            reader,
            writer,
            artifact: None,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn anonymous_channel_opens_independent_conduits() {
        let channel = AnonymousChannel;
        let first = channel.open(0, Direction::Request).unwrap();
        let second = channel.open(0, Direction::Response).unwrap();
        assert!(first.artifact.is_none());

        let (mut r1, mut w1, _) = first.into_parts();
        let (mut r2, mut w2, _) = second.into_parts();
        w1.write_all(b"a").unwrap();
        w2.write_all(b"b").unwrap();
        drop((w1, w2));

        let mut got = String::new();
        r1.read_to_string(&mut got).unwrap();
        r2.read_to_string(&mut got).unwrap();
        assert_eq!(got, "ab");
    }

    #[test]
    fn kind_names() {
        assert_eq!(AnonymousChannel.kind(), ChannelKind::Anonymous);
        assert_eq!(ChannelKind::Named.as_str(), "named");
        assert_eq!(Direction::Response.as_str(), "resp");
    }
}
