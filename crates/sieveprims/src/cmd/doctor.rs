use std::path::PathBuf;

use serde::Serialize;
use sieveprims_frame::{wire_size, SequenceReader, SequenceWriter};
use sieveprims_pipeline::{Pipeline, PipelineConfig, DEFAULT_UPPER_BOUND};
use sieveprims_stage::UnitKind;
use sieveprims_transport::{pipe, Channel, Direction, NamedChannel};

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

const SMOKE_BOUND: i32 = 30;
const SMOKE_PRIMES: [i32; 10] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name,
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    schema_id: &'static str,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(_args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let checks = vec![
        anonymous_pipe_check(),
        pipe_capacity_check(),
        fifo_dir_check(),
        smoke_check("process_units", UnitKind::Process),
        smoke_check("thread_units", UnitKind::Thread),
        compiled_features_check(),
    ];

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        schema_id: "https://schemas.3leaps.dev/sieveprims/cli/v1/doctor-report.schema.json",
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("sieveprims doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
    }
}

fn anonymous_pipe_check() -> CheckResult {
    let name = "anonymous_pipe";
    let (reader, writer) = match pipe() {
        Ok(ends) => ends,
        Err(err) => {
            return CheckResult::new(name, CheckStatus::Fail, format!("pipe failed: {err}"))
        }
    };

    let mut writer = SequenceWriter::new(writer);
    let mut reader = SequenceReader::new(reader);
    let probe = [2, 3, 5];
    let echoed = writer
        .send_sequence(&probe)
        .map_err(|err| err.to_string())
        .and_then(|()| reader.recv_sequence().map_err(|err| err.to_string()));

    match echoed {
        Ok(Some(seq)) if seq == probe => {
            CheckResult::new(name, CheckStatus::Pass, "frame round trip succeeded")
        }
        Ok(other) => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("frame round trip returned {other:?}"),
        ),
        Err(err) => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("frame round trip failed: {err}"),
        ),
    }
}

fn pipe_capacity_check() -> CheckResult {
    let name = "pipe_capacity";
    let needed = wire_size(PipelineConfig::new(DEFAULT_UPPER_BOUND).candidate_count());
    let (_reader, writer) = match pipe() {
        Ok(ends) => ends,
        Err(err) => {
            return CheckResult::new(name, CheckStatus::Fail, format!("pipe failed: {err}"))
        }
    };

    match writer.reserve_capacity(needed) {
        Ok(granted) => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("{granted} bytes available, N={DEFAULT_UPPER_BOUND} needs {needed}"),
        ),
        Err(err) => CheckResult::new(
            name,
            CheckStatus::Warn,
            format!("cannot reserve {needed} bytes ({err}), large responses are drained"),
        ),
    }
}

fn fifo_dir_check() -> CheckResult {
    let name = "fifo_dir";
    let dir = std::env::var_os("SIEVEPRIMS_FIFO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    let channel = NamedChannel::new(&dir).with_prefix("sieveprims-doctor");

    let path = match channel.open(0, Direction::Request) {
        Ok(conduit) => match conduit.artifact.as_ref() {
            Some(artifact) => artifact.path().to_path_buf(),
            None => {
                return CheckResult::new(name, CheckStatus::Fail, "named channel has no artifact")
            }
        },
        Err(err) => return CheckResult::new(name, CheckStatus::Fail, err.to_string()),
    };

    if path.exists() {
        CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("{} was not removed", path.display()),
        )
    } else {
        CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("{} accepts FIFOs", dir.display()),
        )
    }
}

fn smoke_check(name: &'static str, unit: UnitKind) -> CheckResult {
    let config = PipelineConfig::new(SMOKE_BOUND).with_unit(unit);
    match Pipeline::new(config).run(|_| {}) {
        Ok(report) if report.primes == SMOKE_PRIMES => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!(
                "N={SMOKE_BOUND}: {} primes, {} units reaped",
                report.count(),
                report.units_reaped
            ),
        ),
        Ok(report) => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("N={SMOKE_BOUND}: unexpected primes {:?}", report.primes),
        ),
        Err(err) => CheckResult::new(name, CheckStatus::Fail, err.to_string()),
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doctor_output_has_overall_status() {
        let output = DoctorOutput {
            schema_id: "x",
            checks: vec![CheckResult::new("x", CheckStatus::Pass, "ok")],
            overall: "pass",
        };
        let json = serde_json::to_string(&output).expect("doctor output should serialize");
        assert!(json.contains("\"overall\":\"pass\""));
        assert!(json.contains("\"status\":\"pass\""));
    }

    #[test]
    fn local_checks_pass() {
        assert_eq!(anonymous_pipe_check().status, CheckStatus::Pass);
        assert_eq!(
            smoke_check("thread_units", UnitKind::Thread).status,
            CheckStatus::Pass
        );
    }
}
