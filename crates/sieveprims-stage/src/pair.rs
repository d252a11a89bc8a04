//! Per-stage channel wiring.
//!
//! A stage uses two fresh unidirectional conduits: *request* (orchestrator ->
//! unit) and *response* (unit -> orchestrator). After [`StageChannelPair::spawn`]
//! each side holds only its own ends, so a reader sees end-of-stream as soon as
//! the single remaining writer closes.

use std::io::{self, Read};
use std::thread::JoinHandle;

use sieveprims_frame::{FrameConfig, FrameError, SequenceReader, SequenceWriter};
use sieveprims_transport::{
    Channel, Direction, FifoArtifact, PipeReader, PipeWriter, TransportError,
};
use tracing::debug;

use crate::error::{Result, StageError};
use crate::filter::{run_stage, StageOutcome};
use crate::unit::{run_forked, spawn_thread, UnitHandle, UnitKind};

/// Both conduits of one stage, before the unit exists.
#[derive(Debug)]
pub struct StageChannelPair {
    stage: usize,
    link: StageLink,
    unit: UnitEnds,
    drain_response: bool,
}

/// The orchestrator's side of a running stage.
#[derive(Debug)]
pub struct StageLink {
    stage: usize,
    request: Option<SequenceWriter<PipeWriter>>,
    response: ResponseEnd,
    config: FrameConfig,
    artifacts: Vec<FifoArtifact>,
}

#[derive(Debug)]
enum ResponseEnd {
    /// The pipe buffer holds the whole output until it is read.
    Buffered(SequenceReader<PipeReader>),
    /// A helper thread collects the output while the unit writes it.
    Draining(JoinHandle<io::Result<Vec<u8>>>),
    Consumed,
}

/// The unit's side of a stage: request read end and response write end.
#[derive(Debug)]
pub struct UnitEnds {
    input: SequenceReader<PipeReader>,
    output: SequenceWriter<PipeWriter>,
}

impl StageChannelPair {
    /// Open request and response conduits for `stage`.
    pub fn open<C: Channel + ?Sized>(
        channel: &C,
        stage: usize,
        config: &FrameConfig,
    ) -> Result<Self> {
        let request = channel
            .open(stage, Direction::Request)
            .map_err(StageError::ChannelSetupFailed)?;
        let response = channel
            .open(stage, Direction::Response)
            .map_err(StageError::ChannelSetupFailed)?;
        debug!(
            stage,
            kind = channel.kind().as_str(),
            "opened stage channel pair"
        );

        let (request_reader, request_writer, request_artifact) = request.into_parts();
        let (response_reader, response_writer, response_artifact) = response.into_parts();

        Ok(Self {
            stage,
            link: StageLink {
                stage,
                request: Some(SequenceWriter::with_config(request_writer, config.clone())),
                response: ResponseEnd::Buffered(SequenceReader::with_config(
                    response_reader,
                    config.clone(),
                )),
                config: config.clone(),
                artifacts: request_artifact.into_iter().chain(response_artifact).collect(),
            },
            unit: UnitEnds {
                input: SequenceReader::with_config(request_reader, config.clone()),
                output: SequenceWriter::with_config(response_writer, config.clone()),
            },
            drain_response: false,
        })
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Size the response conduit for an output frame of up to `bytes`.
    ///
    /// The pipe buffer is grown as far as the kernel allows, never past
    /// `limit`. If the granted buffer still cannot hold `bytes`, the response
    /// is collected by a helper thread while the unit runs, so the unit never
    /// blocks on a full pipe before it is reaped. Returns the granted size.
    ///
    /// Without a reservation the output must fit the pipe's current buffer.
    pub fn reserve_response(&mut self, bytes: usize, limit: Option<usize>) -> usize {
        let pipe = self.unit.output.get_ref();
        let target = limit.map_or(bytes, |limit| bytes.min(limit));
        let granted = match pipe.reserve_capacity(target) {
            Ok(granted) => granted,
            Err(err) => {
                debug!(stage = self.stage, target, error = %err, "pipe buffer not grown");
                pipe.capacity().unwrap_or(0)
            }
        };
        self.drain_response = granted < bytes;
        debug!(
            stage = self.stage,
            bytes,
            granted,
            drain = self.drain_response,
            "sized response channel"
        );
        granted
    }

    /// True when the response will be collected by a helper thread.
    pub fn drains_response(&self) -> bool {
        self.drain_response
    }

    /// Spawn the execution unit and split the ends between the two sides.
    ///
    /// On return the orchestrator no longer holds any of the unit's ends.
    pub fn spawn(self, kind: UnitKind) -> Result<(StageLink, UnitHandle)> {
        let StageChannelPair {
            stage,
            link,
            unit,
            drain_response,
        } = self;
        let (link, handle) = match kind {
            UnitKind::Thread => {
                let handle = spawn_thread(stage, unit)?;
                (link, handle)
            }
            UnitKind::Process => {
                // SAFETY: the child only drops the orchestrator's descriptors,
                // runs the stage on its own ends and leaves through `_exit`.
                let pid = unsafe { libc::fork() };
                match pid {
                    -1 => return Err(StageError::SpawnFailed(io::Error::last_os_error())),
                    0 => {
                        drop(link);
                        run_forked(unit)
                    }
                    pid => {
                        drop(unit);
                        debug!(stage, pid, "spawned process unit");
                        (link, UnitHandle::process(stage, pid))
                    }
                }
            }
        };

        if !drain_response {
            return Ok((link, handle));
        }
        let mut link = link;
        if let Err(err) = link.start_drain() {
            // Dropping the link closes both orchestrator ends, so the unit
            // finishes and can be reaped.
            drop(link);
            if let Err(join_err) = handle.join(None) {
                debug!(stage, error = %join_err, "unit failed after drain setup error");
            }
            return Err(err);
        }
        Ok((link, handle))
    }
}

impl StageLink {
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Send the stage's input sequence to the unit.
    pub fn send(&mut self, seq: &[i32]) -> Result<()> {
        match self.request.as_mut() {
            Some(writer) => writer.send_sequence(seq).map_err(Into::into),
            None => Err(StageError::TransferFailed(
                TransportError::Closed.into(),
            )),
        }
    }

    /// Close the request write end so the unit's reader reaches end-of-stream.
    pub fn close_request(&mut self) {
        if self.request.take().is_some() {
            debug!(stage = self.stage, "closed request channel");
        }
    }

    /// Receive the unit's single output frame.
    ///
    /// A drained response is decoded from the bytes collected up to the
    /// unit's end-of-stream.
    pub fn recv(&mut self) -> Result<Vec<i32>> {
        let frame = match std::mem::replace(&mut self.response, ResponseEnd::Consumed) {
            ResponseEnd::Buffered(mut reader) => {
                let frame = reader.recv_sequence();
                self.response = ResponseEnd::Buffered(reader);
                frame?
            }
            ResponseEnd::Draining(drain) => {
                let bytes = join_drain(self.stage, drain)?;
                SequenceReader::with_config(bytes.as_slice(), self.config.clone())
                    .recv_sequence()?
            }
            ResponseEnd::Consumed => None,
        };
        frame.ok_or(StageError::MissingOutput)
    }

    /// Paths of the named artifacts backing this stage, if any.
    pub fn artifact_paths(&self) -> Vec<&std::path::Path> {
        self.artifacts.iter().map(FifoArtifact::path).collect()
    }

    fn start_drain(&mut self) -> Result<()> {
        let mut reader = match std::mem::replace(&mut self.response, ResponseEnd::Consumed) {
            ResponseEnd::Buffered(reader) => reader.into_inner(),
            other => {
                self.response = other;
                return Ok(());
            }
        };
        let handle = std::thread::Builder::new()
            .name(format!("sieve-drain-{}", self.stage))
            .spawn(move || {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(bytes)
            })
            .map_err(StageError::SpawnFailed)?;
        debug!(stage = self.stage, "draining response on helper thread");
        self.response = ResponseEnd::Draining(handle);
        Ok(())
    }
}

fn join_drain(stage: usize, drain: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    let bytes = match drain.join() {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            return Err(StageError::TransferFailed(FrameError::Transfer(
                TransportError::TransferFailed(err),
            )))
        }
        Err(_) => {
            return Err(StageError::TransferFailed(FrameError::Transfer(
                TransportError::TransferFailed(io::Error::other("response drain panicked")),
            )))
        }
    };
    debug!(stage, bytes = bytes.len(), "collected drained response");
    Ok(bytes)
}

impl UnitEnds {
    /// Run the filter stage on these ends, consuming them.
    pub fn run(mut self) -> Result<StageOutcome> {
        run_stage(&mut self.input, &mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sieveprims_transport::{AnonymousChannel, NamedChannel};

    use super::*;

    fn unique_temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sieveprims-pair-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn exchange<C: Channel>(channel: &C, kind: UnitKind, input: &[i32]) -> Vec<i32> {
        let mut pair = StageChannelPair::open(channel, 0, &FrameConfig::default()).unwrap();
        pair.reserve_response(sieveprims_frame::wire_size(input.len()), None);
        let (mut link, handle) = pair.spawn(kind).unwrap();
        link.send(input).unwrap();
        link.close_request();
        handle.join(None).unwrap();
        link.recv().unwrap()
    }

    #[test]
    fn thread_unit_over_anonymous_pipes() {
        let out = exchange(&AnonymousChannel, UnitKind::Thread, &[2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(out, vec![3, 5, 7, 9]);
    }

    #[test]
    fn process_unit_over_anonymous_pipes() {
        let out = exchange(&AnonymousChannel, UnitKind::Process, &[3, 5, 7, 9, 11, 13, 15]);
        assert_eq!(out, vec![5, 7, 11, 13]);
    }

    #[test]
    fn process_unit_over_named_pipes_cleans_up() {
        let dir = unique_temp_dir("named");
        let channel = NamedChannel::new(&dir);
        let out = exchange(&channel, UnitKind::Process, &[5, 7, 25, 49]);
        assert_eq!(out, vec![7, 49]);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn named_link_exposes_artifacts_until_dropped() {
        let dir = unique_temp_dir("artifacts");
        let channel = NamedChannel::new(&dir);
        let pair = StageChannelPair::open(&channel, 4, &FrameConfig::default()).unwrap();
        assert_eq!(pair.stage(), 4);

        let (mut link, handle) = pair.spawn(UnitKind::Thread).unwrap();
        assert_eq!(link.artifact_paths().len(), 2);
        assert!(link.artifact_paths().iter().all(|p| p.exists()));

        link.send(&[]).unwrap();
        link.close_request();
        handle.join(None).unwrap();
        assert!(link.recv().unwrap().is_empty());

        drop(link);
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn closed_request_without_frame_still_yields_one_frame() {
        let pair = StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        let (mut link, handle) = pair.spawn(UnitKind::Process).unwrap();
        link.close_request();
        handle.join(None).unwrap();
        assert_eq!(link.recv().unwrap(), Vec::<i32>::new());
        assert!(link.send(&[1]).is_err());
    }

    #[test]
    fn unit_failure_is_reported_after_reaping() {
        let pair = StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        let (mut link, handle) = pair.spawn(UnitKind::Process).unwrap();
        link.send(&[0, 1, 2]).unwrap();
        link.close_request();

        let err = handle.join(None).unwrap_err();
        assert!(matches!(err, StageError::UnitFailed(_)));
        assert!(matches!(link.recv(), Err(StageError::MissingOutput)));
    }

    #[test]
    fn thread_unit_error_is_propagated() {
        let pair = StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        let (mut link, handle) = pair.spawn(UnitKind::Thread).unwrap();
        link.send(&[0, 4]).unwrap();
        link.close_request();
        assert!(matches!(
            handle.join(None),
            Err(StageError::InvalidDivisor(0))
        ));
    }

    /// Odd numbers past the default 64 KiB pipe buffer once framed.
    fn oversized_input() -> Vec<i32> {
        std::iter::once(3).chain((5..200_000).step_by(2)).collect()
    }

    fn exchange_capped(kind: UnitKind, input: &[i32]) -> Vec<i32> {
        let mut pair =
            StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        let needed = sieveprims_frame::wire_size(input.len());
        let granted = pair.reserve_response(needed, Some(4096));
        assert!(granted < needed);
        assert!(pair.drains_response());

        let (mut link, handle) = pair.spawn(kind).unwrap();
        link.send(input).unwrap();
        link.close_request();
        handle.join(None).unwrap();
        link.recv().unwrap()
    }

    #[test]
    fn output_larger_than_pipe_buffer_is_drained() {
        let input = oversized_input();
        let expected = filter_expected(&input);
        assert!(sieveprims_frame::wire_size(expected.len()) > 64 * 1024);

        assert_eq!(exchange_capped(UnitKind::Thread, &input), expected);
        assert_eq!(exchange_capped(UnitKind::Process, &input), expected);
    }

    #[test]
    fn small_output_stays_buffered() {
        let mut pair =
            StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        pair.reserve_response(sieveprims_frame::wire_size(8), Some(4096));
        assert!(!pair.drains_response());
    }

    #[test]
    fn drained_unit_failure_has_no_output() {
        let mut pair =
            StageChannelPair::open(&AnonymousChannel, 0, &FrameConfig::default()).unwrap();
        pair.reserve_response(usize::MAX, Some(4096));
        let (mut link, handle) = pair.spawn(UnitKind::Process).unwrap();
        link.send(&[0, 1, 2]).unwrap();
        link.close_request();

        assert!(matches!(handle.join(None), Err(StageError::UnitFailed(_))));
        assert!(matches!(link.recv(), Err(StageError::MissingOutput)));
    }

    fn filter_expected(input: &[i32]) -> Vec<i32> {
        crate::filter::filter_sequence(input).unwrap()
    }
}
