//! The per-run scan: route lines from the tail of the log file into each
//! metric's window state until every window is satisfied.

use crate::aggregate::ReportValue;
use crate::archive;
use crate::metric::{Metric, WindowState};
use crate::reverse::ReverseLineReader;
use crate::timestamp::parse_timestamp;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Line-routing options shared by the live and archive scans.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Exact expected field count per line; 0 disables the check.
    pub columns_num: usize,
    /// Field index holding the timestamp.
    pub timestamp_column: usize,
    /// strptime-style timestamp format.
    pub timestamp_format: String,
}

/// Outcome of scanning the live file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveScan {
    /// The file does not exist yet; report nothing and exit 0.
    Missing,
    /// Every metric's window was satisfied before the file ran out.
    Satisfied,
    /// The file was exhausted with at least one window unsatisfied; the
    /// caller may continue into the newest rotated archive.
    Exhausted,
}

/// One invocation: a file path, the configured metrics, and their window
/// states. Created once per process, discarded at exit; nothing is shared
/// between invocations.
pub struct Run {
    file: PathBuf,
    metrics: Vec<Metric>,
    states: Vec<WindowState>,
    options: ScanOptions,
    /// Scan-start epoch; every window cutoff is anchored here and the
    /// output lines carry it.
    now: i64,
    seeded: bool,
}

impl Run {
    pub fn new(file: PathBuf, metrics: Vec<Metric>, options: ScanOptions, now: i64) -> Self {
        let states = metrics.iter().map(WindowState::new).collect();
        Self {
            file,
            metrics,
            states,
            options,
            now,
            seeded: false,
        }
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    /// Scan the live file newest-first, stopping as soon as every metric's
    /// window is satisfied.
    pub fn scan_live(&mut self) -> io::Result<LiveScan> {
        let reader = match ReverseLineReader::open(&self.file) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(file = %self.file.display(), "log file does not exist yet");
                return Ok(LiveScan::Missing);
            }
            Err(e) => return Err(e),
        };

        for line in reader {
            let line = line?;
            // The very first line pulled is the newest line in the file and
            // seeds every metric's last-value, even if it fails the checks
            // applied to windowed collection below.
            if !self.seeded {
                self.seeded = true;
                let fields: Vec<&str> = line.split_whitespace().collect();
                for (metric, state) in self.metrics.iter().zip(&mut self.states) {
                    if let Some(value) = metric.expr.evaluate(&fields) {
                        state.last_value = value;
                    }
                }
            }
            self.route_live_line(&line);
            if self.all_satisfied() {
                return Ok(LiveScan::Satisfied);
            }
        }

        Ok(if self.all_satisfied() {
            LiveScan::Satisfied
        } else {
            LiveScan::Exhausted
        })
    }

    /// Continue into the newest rotated archive (`<file>.1.gz`), scanning
    /// it forward and exhaustively. A missing archive is skipped; windows
    /// then rest on live-file data only.
    pub fn scan_archive(&mut self) -> io::Result<()> {
        let Some(path) = archive::newest_archive(&self.file) else {
            return Ok(());
        };
        let reader = match archive::open(&path) {
            Ok(reader) => reader,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(archive = %path.display(), "no rotated archive to fall back to");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(archive = %path.display(), "scanning rotated archive");
        for line in reader.lines() {
            let line = line?;
            if !line.is_empty() {
                self.absorb_archive_line(&line);
            }
        }
        Ok(())
    }

    /// Route one live line (newest-first order) into every unsatisfied
    /// metric. A line older than a metric's cutoff marks that metric
    /// satisfied: its window is fully covered by the lines already
    /// collected. Already-collected values are never discarded, and other
    /// metrics keep collecting.
    fn route_live_line(&mut self, line: &str) {
        let Some((fields, timestamp)) = self.split_and_date(line) else {
            return;
        };
        for (metric, state) in self.metrics.iter().zip(&mut self.states) {
            let Some(window) = metric.window else { continue };
            if state.satisfied {
                continue;
            }
            if timestamp >= self.now - window as i64 {
                if let Some(value) = metric.expr.evaluate(&fields) {
                    state.values.push(value);
                }
            } else {
                state.satisfied = true;
            }
        }
    }

    /// Route one archive line (oldest-first order). Satisfaction flags are
    /// left alone: the archive is read to its end, and the cutoff test is
    /// what keeps out-of-window values away. Every rotated line predates
    /// every live line, so no line is counted twice.
    fn absorb_archive_line(&mut self, line: &str) {
        let Some((fields, timestamp)) = self.split_and_date(line) else {
            return;
        };
        for (metric, state) in self.metrics.iter().zip(&mut self.states) {
            let Some(window) = metric.window else { continue };
            if timestamp >= self.now - window as i64 {
                if let Some(value) = metric.expr.evaluate(&fields) {
                    state.values.push(value);
                }
            }
        }
    }

    /// Field-count check and timestamp parse shared by both scans; `None`
    /// skips the line (it still counts toward exhausting the input).
    fn split_and_date<'a>(&self, line: &'a str) -> Option<(Vec<&'a str>, i64)> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if self.options.columns_num != 0 && fields.len() != self.options.columns_num {
            tracing::debug!(
                expected = self.options.columns_num,
                got = fields.len(),
                "skipping line with unexpected field count"
            );
            return None;
        }
        let raw = fields.get(self.options.timestamp_column)?;
        let timestamp = parse_timestamp(raw, &self.options.timestamp_format);
        if timestamp.is_none() {
            tracing::debug!(field = %raw, "skipping line with unparsable timestamp");
        }
        Some((fields, timestamp?))
    }

    fn all_satisfied(&self) -> bool {
        self.states.iter().all(|s| s.satisfied)
    }

    /// Final values, one per metric in configuration order.
    pub fn reports(&self) -> Vec<(&str, ReportValue)> {
        self.metrics
            .iter()
            .zip(&self.states)
            .map(|(metric, state)| (metric.name.as_str(), metric.report(state)))
            .collect()
    }

    /// Write Graphite plaintext lines: `<prefix>.<name>[.<key>] <value> <now>`,
    /// one per metric, one per distinct key for distributions.
    pub fn write_graphite<W: Write>(&self, prefix: &str, out: &mut W) -> io::Result<()> {
        for (name, value) in self.reports() {
            match value {
                ReportValue::Scalar(v) => {
                    writeln!(out, "{prefix}.{name} {v} {}", self.now)?;
                }
                ReportValue::Distribution(counts) => {
                    for (key, count) in counts {
                        writeln!(out, "{prefix}.{name}.{key} {count} {}", self.now)?;
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn state(&self, index: usize) -> &WindowState {
        &self.states[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::Write as _;
    use std::path::Path;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000;

    fn options() -> ScanOptions {
        ScanOptions {
            columns_num: 0,
            timestamp_column: 0,
            timestamp_format: "%Y-%m-%dT%H:%M:%S%z".to_string(),
        }
    }

    fn write_log(path: &Path, offsets_and_values: &[(i64, &str)]) {
        let mut body = String::new();
        for (age, value) in offsets_and_values {
            body.push_str(&format!("{} {value}\n", NOW - age));
        }
        std::fs::write(path, body).unwrap();
    }

    fn metrics(specs: &[&str]) -> Vec<Metric> {
        specs.iter().map(|s| Metric::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_window_membership_exact() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        // Oldest first in the file; the engine reads them newest first.
        write_log(&log, &[(600, "10"), (300, "20"), (30, "30")]);

        let mut run = Run::new(log, metrics(&["avg:1:mean:5min"]), options(), NOW);
        assert_eq!(run.scan_live().unwrap(), LiveScan::Satisfied);
        // Only the lines younger than 300s: values 30 then 20.
        assert_eq!(run.state(0).values, vec![30.0, 20.0]);
        assert_eq!(run.reports()[0].1, ReportValue::Scalar(25.0));
    }

    #[test]
    fn test_per_metric_satisfaction_is_independent() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(900, "1"), (500, "2"), (100, "3"), (10, "4")]);

        let mut run = Run::new(
            log,
            metrics(&["small:1:sum:1min", "large:1:sum:10min"]),
            options(),
            NOW,
        );
        assert_eq!(run.scan_live().unwrap(), LiveScan::Satisfied);
        // The small window closing must not truncate the large one.
        assert_eq!(run.state(0).values, vec![4.0]);
        assert_eq!(run.state(1).values, vec![4.0, 3.0, 2.0]);
    }

    #[test]
    fn test_last_value_seeded_from_newest_line() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(300, "20"), (30, "30")]);

        let mut run = Run::new(
            log,
            metrics(&["last:1", "avg:1:mean:1h"]),
            options(),
            NOW,
        );
        run.scan_live().unwrap();
        assert_eq!(run.state(0).last_value, 30.0);
        let reports = run.reports();
        assert_eq!(reports[0].1, ReportValue::Scalar(30.0));
        assert_eq!(reports[1].1, ReportValue::Scalar(25.0));
    }

    #[test]
    fn test_last_value_only_stops_after_first_line() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(300, "20"), (30, "30")]);

        let mut run = Run::new(log, metrics(&["last:1"]), options(), NOW);
        assert_eq!(run.scan_live().unwrap(), LiveScan::Satisfied);
        assert_eq!(run.state(0).last_value, 30.0);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(
            dir.path().join("absent.log"),
            metrics(&["m:1:mean:5min"]),
            options(),
            NOW,
        );
        assert_eq!(run.scan_live().unwrap(), LiveScan::Missing);
    }

    #[test]
    fn test_empty_file_reports_zero() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "").unwrap();

        let mut run = Run::new(
            log,
            metrics(&["m:1:mean:5min", "n:1"]),
            options(),
            NOW,
        );
        assert_eq!(run.scan_live().unwrap(), LiveScan::Exhausted);
        let reports = run.reports();
        assert_eq!(reports[0].1, ReportValue::Scalar(0.0));
        assert_eq!(reports[1].1, ReportValue::Scalar(0.0));
    }

    #[test]
    fn test_unparsable_timestamp_skips_line() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        let mut body = String::new();
        body.push_str(&format!("{} 10\n", NOW - 120));
        body.push_str("garbage 99\n");
        body.push_str(&format!("{} 20\n", NOW - 60));
        std::fs::write(&log, body).unwrap();

        let mut run = Run::new(log, metrics(&["m:1:sum:5min"]), options(), NOW);
        run.scan_live().unwrap();
        assert_eq!(run.state(0).values, vec![20.0, 10.0]);
    }

    #[test]
    fn test_field_count_mismatch_skips_line() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        let mut body = String::new();
        body.push_str(&format!("{} 10 extra\n", NOW - 120));
        body.push_str(&format!("{} 20\n", NOW - 60));
        std::fs::write(&log, body).unwrap();

        let mut options = options();
        options.columns_num = 2;
        let mut run = Run::new(log, metrics(&["m:1:sum:5min"]), options, NOW);
        run.scan_live().unwrap();
        assert_eq!(run.state(0).values, vec![20.0]);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(600, "10"), (300, "20"), (30, "30")]);
        let metric_specs = ["avg:1:mean:5min", "d:1:distribution:1h", "last:1"];

        let mut first = Vec::new();
        let mut second = Vec::new();
        for out in [&mut first, &mut second] {
            let mut run = Run::new(log.clone(), metrics(&metric_specs), options(), NOW);
            run.scan_live().unwrap();
            run.write_graphite("t", out).unwrap();
        }
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_archive_fallback_extends_window() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        // Live file covers only the last 60 seconds.
        write_log(&log, &[(60, "1"), (30, "1")]);
        // Archive covers the prior 3 days, oldest first, as rotation left it.
        let archive = File::create(dir.path().join("app.log.1.gz")).unwrap();
        let mut gz = GzEncoder::new(archive, Compression::default());
        for age in [259200, 90000, 3600, 600] {
            writeln!(gz, "{} 1", NOW - age).unwrap();
        }
        gz.finish().unwrap();

        let mut run = Run::new(log, metrics(&["c:1:count:1d"]), options(), NOW);
        assert_eq!(run.scan_live().unwrap(), LiveScan::Exhausted);
        run.scan_archive().unwrap();
        // 2 live lines + the 2 archive lines inside 1 day; the two older
        // archive lines are outside the window.
        assert_eq!(run.state(0).values.len(), 4);
        assert_eq!(run.reports()[0].1, ReportValue::Scalar(4.0));
    }

    #[test]
    fn test_archive_skips_out_of_window_for_satisfied_metrics() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(400, "10"), (100, "20"), (20, "30")]);
        let archive = File::create(dir.path().join("app.log.1.gz")).unwrap();
        let mut gz = GzEncoder::new(archive, Compression::default());
        writeln!(gz, "{} 99", NOW - 500).unwrap();
        gz.finish().unwrap();

        let mut run = Run::new(
            log,
            metrics(&["small:1:sum:5min", "large:1:sum:1h"]),
            options(),
            NOW,
        );
        assert_eq!(run.scan_live().unwrap(), LiveScan::Exhausted);
        run.scan_archive().unwrap();
        // The small window was satisfied from the live file; the archive
        // line is outside it and must not leak in.
        assert_eq!(run.state(0).values, vec![30.0, 20.0]);
        // The large window picks the archive line up.
        assert_eq!(run.state(1).values, vec![30.0, 20.0, 10.0, 99.0]);
    }

    #[test]
    fn test_missing_archive_is_skipped() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(30, "5")]);

        let mut run = Run::new(log, metrics(&["m:1:sum:1d"]), options(), NOW);
        assert_eq!(run.scan_live().unwrap(), LiveScan::Exhausted);
        run.scan_archive().unwrap();
        assert_eq!(run.state(0).values, vec![5.0]);
    }

    #[test]
    fn test_graphite_output_format() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        write_log(&log, &[(30, "2.5"), (10, "2.75")]);

        let mut run = Run::new(
            log,
            metrics(&["rate:1:sum:5min", "dist:1:distribution:5min"]),
            options(),
            NOW,
        );
        run.scan_live().unwrap();
        let mut out = Vec::new();
        run.write_graphite("app.values", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            format!("app.values.rate 5.25 {NOW}\napp.values.dist.2 2 {NOW}\n")
        );
    }

    #[test]
    fn test_integer_epoch_timestamps() {
        // write_log emits raw epoch fields; the strptime parse fails and
        // the integer fallback dates the lines. Exercised throughout, but
        // make the intent explicit with a mixed-format file.
        let dir = tempdir().unwrap();
        let log = dir.path().join("app.log");
        let body = format!(
            "2023-11-14T00:00:00+0000 1\n{} 2\n",
            NOW - 10
        );
        std::fs::write(&log, body).unwrap();

        let mut run = Run::new(log, metrics(&["m:1:sum:1min"]), options(), NOW);
        run.scan_live().unwrap();
        assert_eq!(run.state(0).values, vec![2.0]);
    }
}
