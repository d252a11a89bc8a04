use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sieveprims_frame::wire_size;
use sieveprims_stage::{StageChannelPair, StageError, UnitKind};
use sieveprims_transport::Channel;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

/// The initial candidate sequence `<2, 3, ..., n>`. Empty for `n < 2`.
pub fn candidates(n: i32) -> Vec<i32> {
    if n < 2 {
        return Vec::new();
    }
    (2..=n).collect()
}

/// Run the pipeline with default settings and return the primes up to `n`.
pub fn sieve(n: i32) -> Result<Vec<i32>> {
    Pipeline::new(PipelineConfig::new(n))
        .run(|_| {})
        .map(|report| report.primes)
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub upper_bound: i32,
    /// Primes in discovery order (strictly increasing).
    pub primes: Vec<i32>,
    pub stages_spawned: usize,
    pub units_reaped: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn count(&self) -> usize {
        self.primes.len()
    }
}

#[derive(Debug, Default)]
struct UnitCounters {
    spawned: usize,
    reaped: usize,
}

/// Sequential orchestrator: one stage, one unit, one prime at a time.
pub struct Pipeline {
    config: PipelineConfig,
    channel: Box<dyn Channel>,
    running: Option<Arc<AtomicBool>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let channel = config.build_channel();
        Self {
            config,
            channel,
            running: None,
        }
    }

    /// Replace the channel implementation built from the config.
    pub fn with_channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channel = channel;
        self
    }

    /// Abort before the next stage once `running` is cleared.
    pub fn with_cancel_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the sieve, calling `on_prime` for each prime as it is discovered.
    ///
    /// Primes passed to `on_prime` before a failure remain valid; the error
    /// carries the index of the failing stage and how many were found.
    pub fn run<F: FnMut(i32)>(&self, mut on_prime: F) -> Result<RunReport> {
        let started = Instant::now();
        let count = self.config.candidate_count();
        let max = self.config.frame.max_sequence_len;
        if count > max {
            return Err(PipelineError::InvalidConfig(format!(
                "upper bound {} yields {count} candidates, frame limit is {max}",
                self.config.upper_bound
            )));
        }
        if self.config.unit == UnitKind::Thread && self.config.stage_timeout.is_some() {
            warn!("stage timeout ignored: thread units cannot be killed");
        }

        info!(
            upper_bound = self.config.upper_bound,
            channel = self.channel.kind().as_str(),
            unit = self.config.unit.as_str(),
            "starting sieve pipeline"
        );

        let mut counters = UnitCounters::default();
        let mut primes = Vec::new();
        let mut current = candidates(self.config.upper_bound);
        let mut stage = 0;

        while let Some(&prime) = current.first() {
            primes.push(prime);
            on_prime(prime);
            if current.len() == 1 {
                break;
            }

            let outcome = if self.cancelled() {
                Err(StageError::Cancelled)
            } else {
                self.exchange(stage, &current, &mut counters)
            };
            let survivors = outcome.map_err(|source| {
                warn!(
                    stage,
                    found = primes.len(),
                    spawned = counters.spawned,
                    reaped = counters.reaped,
                    error = %source,
                    "stage failed"
                );
                PipelineError::Stage {
                    stage,
                    found: primes.len(),
                    stages_spawned: counters.spawned,
                    units_reaped: counters.reaped,
                    source,
                }
            })?;

            info!(
                stage,
                prime,
                received = current.len(),
                survivors = survivors.len(),
                "stage complete"
            );
            current = survivors;
            stage += 1;
        }

        let report = RunReport {
            upper_bound: self.config.upper_bound,
            primes,
            stages_spawned: counters.spawned,
            units_reaped: counters.reaped,
            elapsed: started.elapsed(),
        };
        info!(
            count = report.count(),
            stages = report.stages_spawned,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sieve pipeline finished"
        );
        Ok(report)
    }

    /// One full stage exchange on `current`, returning the survivors.
    pub fn run_stage(
        &self,
        stage: usize,
        current: &[i32],
    ) -> std::result::Result<Vec<i32>, StageError> {
        self.exchange(stage, current, &mut UnitCounters::default())
    }

    fn cancelled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::SeqCst))
    }

    /// Write, close the write end, reap the unit, then read its output.
    ///
    /// Every spawned unit is reaped before this returns, including on error.
    /// The output is only decoded once the unit has been reaped.
    fn exchange(
        &self,
        stage: usize,
        current: &[i32],
        counters: &mut UnitCounters,
    ) -> std::result::Result<Vec<i32>, StageError> {
        let mut pair = StageChannelPair::open(self.channel.as_ref(), stage, &self.config.frame)?;
        pair.reserve_response(wire_size(current.len()), self.config.pipe_buffer_limit);
        let (mut link, handle) = pair.spawn(self.config.unit)?;
        counters.spawned += 1;

        let sent = link.send(current);
        link.close_request();
        if let Err(err) = sent {
            // Closing the response end unblocks a unit stuck writing.
            drop(link);
            if let Err(join_err) = handle.join(self.config.stage_timeout) {
                debug!(stage, error = %join_err, "unit failed after send error");
            }
            counters.reaped += 1;
            return Err(err);
        }

        let joined = handle.join(self.config.stage_timeout);
        counters.reaped += 1;
        joined?;
        link.recv()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("channel", &self.channel.kind())
            .field("cancellable", &self.running.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_range() {
        assert_eq!(candidates(10), vec![2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(candidates(2), vec![2]);
        assert!(candidates(1).is_empty());
        assert!(candidates(0).is_empty());
        assert!(candidates(-7).is_empty());
    }

    #[test]
    fn ten_yields_four_primes() {
        let mut seen = Vec::new();
        let report = Pipeline::new(PipelineConfig::new(10))
            .run(|p| seen.push(p))
            .unwrap();
        assert_eq!(seen, vec![2, 3, 5, 7]);
        assert_eq!(report.primes, seen);
        assert_eq!(report.count(), 4);
        assert_eq!(report.stages_spawned, 3);
        assert_eq!(report.units_reaped, 3);
    }

    #[test]
    fn two_needs_no_stage() {
        let report = Pipeline::new(PipelineConfig::new(2)).run(|_| {}).unwrap();
        assert_eq!(report.primes, vec![2]);
        assert_eq!(report.stages_spawned, 0);
    }

    #[test]
    fn below_two_is_empty() {
        for n in [-1, 0, 1] {
            let report = Pipeline::new(PipelineConfig::new(n)).run(|_| {}).unwrap();
            assert!(report.primes.is_empty());
            assert_eq!(report.stages_spawned, 0);
        }
    }

    #[test]
    fn run_stage_returns_survivors() {
        let pipeline = Pipeline::new(PipelineConfig::default().with_unit(UnitKind::Thread));
        assert_eq!(
            pipeline.run_stage(0, &[3, 5, 7, 9, 11]).unwrap(),
            vec![5, 7, 11]
        );
    }

    #[test]
    fn too_many_candidates_rejected_up_front() {
        let config = PipelineConfig::new(100).with_frame_config(sieveprims_frame::FrameConfig {
            max_sequence_len: 10,
        });
        let err = Pipeline::new(config).run(|_| {}).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert_eq!(err.stage(), None);
    }

    #[test]
    fn capped_pipe_buffer_still_finds_primes() {
        let config = PipelineConfig::new(40_000)
            .with_unit(UnitKind::Thread)
            .with_pipe_buffer_limit(4096);
        let report = Pipeline::new(config).run(|_| {}).unwrap();
        assert_eq!(report.count(), 4203);
    }

    #[test]
    fn sieve_uses_defaults() {
        assert_eq!(sieve(30).unwrap(), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }
}
