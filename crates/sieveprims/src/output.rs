use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use sieveprims_pipeline::RunReport;

/// Primes per line in pretty output and per row in table output.
pub const PRIMES_PER_LINE: usize = 10;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }

    /// Formats that print each prime as soon as it is discovered.
    pub fn streams(self) -> bool {
        matches!(self, Self::Pretty | Self::Raw)
    }
}

#[derive(Debug, Serialize)]
pub struct RunOutput<'a> {
    pub schema_id: &'static str,
    pub upper_bound: i32,
    pub channel: &'a str,
    pub unit: &'a str,
    pub primes: &'a [i32],
    pub count: usize,
    pub stages: usize,
    pub units_reaped: usize,
    pub elapsed_ms: f64,
}

impl<'a> RunOutput<'a> {
    pub fn new(report: &'a RunReport, channel: &'a str, unit: &'a str) -> Self {
        Self {
            schema_id: "https://schemas.3leaps.dev/sieveprims/cli/v1/run-report.schema.json",
            upper_bound: report.upper_bound,
            channel,
            unit,
            primes: &report.primes,
            count: report.count(),
            stages: report.stages_spawned,
            units_reaped: report.units_reaped,
            elapsed_ms: report.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// Incremental printer for the streaming formats.
#[derive(Debug)]
pub struct PrimeStream<W: Write> {
    out: W,
    format: OutputFormat,
    printed: usize,
}

impl<W: Write> PrimeStream<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            printed: 0,
        }
    }

    pub fn header(&mut self, upper_bound: i32) {
        if self.format == OutputFormat::Pretty {
            let _ = writeln!(self.out, "Prime numbers up to {upper_bound}:");
        }
    }

    pub fn prime(&mut self, prime: i32) {
        self.printed += 1;
        let _ = match self.format {
            OutputFormat::Pretty if self.printed % PRIMES_PER_LINE == 0 => {
                writeln!(self.out, "{prime}")
            }
            OutputFormat::Pretty => write!(self.out, "{prime} "),
            OutputFormat::Raw => writeln!(self.out, "{prime}"),
            OutputFormat::Json | OutputFormat::Table => Ok(()),
        };
        let _ = self.out.flush();
    }

    /// Close an unfinished pretty line and print the totals.
    pub fn summary(&mut self, report: &RunReport) {
        if self.format != OutputFormat::Pretty {
            return;
        }
        if self.printed % PRIMES_PER_LINE != 0 {
            let _ = writeln!(self.out);
        }
        let _ = writeln!(self.out, "\nTotal prime numbers found: {}", report.count());
        let _ = writeln!(self.out, "Total filtering stages: {}", report.stages_spawned);
        let _ = writeln!(
            self.out,
            "Time taken: {:.6} seconds",
            report.elapsed.as_secs_f64()
        );
        let _ = self.out.flush();
    }

    /// Terminate a partial line after an aborted run.
    pub fn abort(&mut self) {
        if self.format == OutputFormat::Pretty && self.printed % PRIMES_PER_LINE != 0 {
            let _ = writeln!(self.out);
        }
        let _ = self.out.flush();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn print_report(output: &RunOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            println!("{}", report_table(output));
        }
        OutputFormat::Pretty | OutputFormat::Raw => {}
    }
}

fn report_table(output: &RunOutput<'_>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "PRIMES"]);
    for (row, chunk) in output.primes.chunks(PRIMES_PER_LINE).enumerate() {
        let first = row * PRIMES_PER_LINE + 1;
        table.add_row(vec![
            format!("{first}-{}", first + chunk.len() - 1),
            join_primes(chunk),
        ]);
    }
    table.add_row(vec![
        "total".to_string(),
        format!(
            "{} primes <= {} in {} stages ({} / {}, {:.3} ms)",
            output.count,
            output.upper_bound,
            output.stages,
            output.channel,
            output.unit,
            output.elapsed_ms
        ),
    ]);
    table
}

fn join_primes(primes: &[i32]) -> String {
    primes
        .iter()
        .map(i32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn report(primes: Vec<i32>) -> RunReport {
        let stages = primes.len().saturating_sub(1);
        RunReport {
            upper_bound: 100,
            primes,
            stages_spawned: stages,
            units_reaped: stages,
            elapsed: Duration::from_millis(3),
        }
    }

    fn stream_all(format: OutputFormat, report: &RunReport) -> String {
        let mut stream = PrimeStream::new(Vec::new(), format);
        stream.header(report.upper_bound);
        for &p in &report.primes {
            stream.prime(p);
        }
        stream.summary(report);
        String::from_utf8(stream.into_inner()).unwrap()
    }

    #[test]
    fn pretty_prints_ten_per_line() {
        let report = report(vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37]);
        let text = stream_all(OutputFormat::Pretty, &report);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Prime numbers up to 100:");
        assert_eq!(lines[1], "2 3 5 7 11 13 17 19 23 29");
        assert_eq!(lines[2], "31 37 ");
        assert!(text.contains("Total prime numbers found: 12"));
        assert!(text.contains("Total filtering stages: 11"));
    }

    #[test]
    fn raw_prints_one_per_line() {
        let text = stream_all(OutputFormat::Raw, &report(vec![2, 3, 5, 7]));
        assert_eq!(text, "2\n3\n5\n7\n");
    }

    #[test]
    fn json_output_has_counts() {
        let report = report(vec![2, 3, 5, 7]);
        let output = RunOutput::new(&report, "anonymous", "process");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["count"], 4);
        assert_eq!(json["stages"], 3);
        assert_eq!(json["primes"], serde_json::json!([2, 3, 5, 7]));
    }

    #[test]
    fn table_rows_group_primes() {
        let primes: Vec<i32> = (0..25).collect();
        let report = report(primes);
        let rendered = report_table(&RunOutput::new(&report, "named", "thread")).to_string();
        assert!(rendered.contains("1-10"));
        assert!(rendered.contains("21-25"));
        assert!(rendered.contains("total"));
    }

    #[test]
    fn streaming_formats() {
        assert!(OutputFormat::Pretty.streams());
        assert!(OutputFormat::Raw.streams());
        assert!(!OutputFormat::Json.streams());
    }
}
