//! Metric specification parsing and per-run window state.

use crate::aggregate::{AggregationKind, ReportValue};
use crate::expr::ColumnExpr;
use regex::Regex;
use std::sync::LazyLock;

static PERIOD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([A-Za-z]{1,3})$").unwrap());

/// One `--metric` argument: `name:column` or `name:column:function:period`.
///
/// The 2-field short form means "last value, no window". Everything is
/// validated here, before any scanning, so a malformed spec is a fatal
/// configuration error surfaced by clap.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub expr: ColumnExpr,
    pub aggregation: AggregationKind,
    /// Trailing window in seconds; `None` means last-value only.
    pub window: Option<u64>,
}

impl Metric {
    /// clap value parser for `--metric`.
    pub fn parse(arg: &str) -> Result<Self, String> {
        let parts: Vec<&str> = arg.split(':').collect();
        let (name, column, function, period) = match parts.as_slice() {
            [name, column] => (*name, *column, "", None),
            [name, column, function, period] => (*name, *column, *function, Some(*period)),
            _ => {
                return Err(format!(
                    "metric '{arg}' must be name:column or name:column:function:period"
                ))
            }
        };
        if name.is_empty() {
            return Err(format!("metric '{arg}' has an empty name"));
        }
        let expr = ColumnExpr::parse(column)?;
        let aggregation = AggregationKind::parse(function)?;
        let window = period.map(parse_period).transpose()?;
        Ok(Self {
            name: name.to_string(),
            expr,
            aggregation,
            window,
        })
    }

    /// Compute the reported value from a finished window state.
    pub fn report(&self, state: &WindowState) -> ReportValue {
        self.aggregation
            .apply(&state.values, self.window.unwrap_or(0), state.last_value)
    }
}

/// Parse a period like `30s`, `5min`, `2h` or `1d` into seconds.
fn parse_period(period: &str) -> Result<u64, String> {
    let err = || format!("period '{period}' must be a positive number followed by s, min, h or d");
    let captures = PERIOD_PATTERN.captures(period).ok_or_else(err)?;
    let value: u64 = captures[1].parse().map_err(|_| err())?;
    let multiplier = match captures[2].to_ascii_lowercase().as_str() {
        "s" => 1,
        "min" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Err(err()),
    };
    if value == 0 {
        return Err(err());
    }
    Ok(value * multiplier)
}

/// Mutable per-metric state for one run.
///
/// Owned by the run, grows monotonically while scanning, discarded at
/// process exit; nothing persists between invocations.
#[derive(Debug, Default)]
pub struct WindowState {
    /// Values of lines inside the metric's window, newest first.
    pub values: Vec<f64>,
    /// True once a line at or beyond the window cutoff has been seen (or
    /// immediately, for metrics without a window).
    pub satisfied: bool,
    /// Value from the single newest matching line.
    pub last_value: f64,
}

impl WindowState {
    /// Initial state: a metric with no window needs only the newest line,
    /// so its window is satisfied before scanning starts.
    pub fn new(metric: &Metric) -> Self {
        Self {
            satisfied: metric.window.is_none(),
            ..Self::default()
        }
    }
}
