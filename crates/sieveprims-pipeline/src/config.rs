use std::path::PathBuf;
use std::time::Duration;

use sieveprims_frame::FrameConfig;
use sieveprims_stage::UnitKind;
use sieveprims_transport::{AnonymousChannel, Channel, ChannelKind, NamedChannel};

/// Default upper bound of the candidate range.
pub const DEFAULT_UPPER_BOUND: i32 = 1000;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Largest candidate (`N`). Values below 2 produce no primes.
    pub upper_bound: i32,
    /// Channel implementation used for every stage.
    pub channel: ChannelKind,
    /// Execution unit used for every stage.
    pub unit: UnitKind,
    /// Bounded wait on each unit. `None` waits indefinitely.
    pub stage_timeout: Option<Duration>,
    /// Framing limits for every stage.
    pub frame: FrameConfig,
    /// Directory for named channel artifacts. Default: system temp dir.
    pub fifo_dir: Option<PathBuf>,
    /// Largest response pipe buffer to request, in bytes. Responses that do
    /// not fit are drained while the unit runs. `None` asks for the full frame.
    pub pipe_buffer_limit: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upper_bound: DEFAULT_UPPER_BOUND,
            channel: ChannelKind::default(),
            unit: UnitKind::default(),
            stage_timeout: None,
            frame: FrameConfig::default(),
            fifo_dir: None,
            pipe_buffer_limit: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(upper_bound: i32) -> Self {
        Self {
            upper_bound,
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: ChannelKind) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_unit(mut self, unit: UnitKind) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn with_fifo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fifo_dir = Some(dir.into());
        self
    }

    pub fn with_pipe_buffer_limit(mut self, bytes: usize) -> Self {
        self.pipe_buffer_limit = Some(bytes);
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// Number of candidates in `[2, upper_bound]`.
    pub fn candidate_count(&self) -> usize {
        if self.upper_bound < 2 {
            0
        } else {
            (self.upper_bound - 1) as usize
        }
    }

    /// Build the configured channel implementation.
    pub fn build_channel(&self) -> Box<dyn Channel> {
        match self.channel {
            ChannelKind::Anonymous => Box::new(AnonymousChannel),
            ChannelKind::Named => Box::new(match &self.fifo_dir {
                Some(dir) => NamedChannel::new(dir),
                None => NamedChannel::in_temp_dir(),
            }),
        }
    }
}
