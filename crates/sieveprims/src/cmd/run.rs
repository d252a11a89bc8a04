use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sieveprims_frame::FrameConfig;
use sieveprims_pipeline::{Pipeline, PipelineConfig};
use sieveprims_stage::UnitKind;
use sieveprims_transport::ChannelKind;
use tracing::warn;

use crate::cmd::{parse_duration, RunArgs};
use crate::exit::{pipeline_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat, PrimeStream, RunOutput};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let config = pipeline_config(&args)?;
    let channel = config.channel.as_str();
    let unit = config.unit.as_str();
    let upper_bound = config.upper_bound;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let pipeline = Pipeline::new(config).with_cancel_flag(running);
    let mut stream = format
        .streams()
        .then(|| PrimeStream::new(std::io::stdout(), format));
    if let Some(stream) = stream.as_mut() {
        stream.header(upper_bound);
    }

    let result = pipeline.run(|prime| {
        if let Some(stream) = stream.as_mut() {
            stream.prime(prime);
        }
    });
    match result {
        Ok(report) => {
            if let Some(stream) = stream.as_mut() {
                stream.summary(&report);
            }
            print_report(&RunOutput::new(&report, channel, unit), format);
            Ok(SUCCESS)
        }
        Err(err) => {
            if let Some(stream) = stream.as_mut() {
                stream.abort();
            }
            Err(pipeline_error("sieve failed", err))
        }
    }
}

fn pipeline_config(args: &RunArgs) -> CliResult<PipelineConfig> {
    let mut config = PipelineConfig::new(args.upper_bound)
        .with_channel(ChannelKind::from(args.channel))
        .with_unit(UnitKind::from(args.unit));

    if let Some(timeout) = &args.stage_timeout {
        config = config.with_stage_timeout(parse_duration(timeout)?);
    }
    if let Some(max_sequence_len) = args.max_sequence_len {
        if max_sequence_len == 0 {
            return Err(CliError::new(USAGE, "max sequence length must be positive"));
        }
        config = config.with_frame_config(FrameConfig { max_sequence_len });
    }
    if let Some(dir) = &args.fifo_dir {
        if config.channel != ChannelKind::Named {
            warn!(dir = %dir.display(), "fifo dir ignored for anonymous channels");
        }
        config = config.with_fifo_dir(dir);
    }
    Ok(config)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
