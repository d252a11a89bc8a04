use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use sieveprims_pipeline::DEFAULT_UPPER_BOUND;
use sieveprims_stage::UnitKind;
use sieveprims_transport::ChannelKind;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find all primes up to N with one execution unit per sieve stage.
    Run(RunArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChannelArg {
    /// Anonymous pipes inherited by the unit.
    Anonymous,
    /// FIFOs in the filesystem, removed after each stage.
    Named,
}

impl From<ChannelArg> for ChannelKind {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Anonymous => ChannelKind::Anonymous,
            ChannelArg::Named => ChannelKind::Named,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    /// Forked child process per stage.
    Process,
    /// Dedicated thread per stage.
    Thread,
}

impl From<UnitArg> for UnitKind {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Process => UnitKind::Process,
            UnitArg::Thread => UnitKind::Thread,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Upper bound of the candidate range [2, N].
    #[arg(
        value_name = "N",
        env = "SIEVEPRIMS_UPPER_BOUND",
        default_value_t = DEFAULT_UPPER_BOUND,
        allow_negative_numbers = true
    )]
    pub upper_bound: i32,
    /// Channel implementation between orchestrator and units.
    #[arg(long, value_enum, default_value = "anonymous")]
    pub channel: ChannelArg,
    /// Execution unit running each stage.
    #[arg(long, value_enum, default_value = "process")]
    pub unit: UnitArg,
    /// Directory for named channel FIFOs. Default: system temp dir.
    #[arg(long, value_name = "DIR", env = "SIEVEPRIMS_FIFO_DIR")]
    pub fifo_dir: Option<PathBuf>,
    /// Kill a process unit that runs longer than this (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub stage_timeout: Option<String>,
    /// Largest sequence a single frame may carry.
    #[arg(long, value_name = "LEN")]
    pub max_sequence_len: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
