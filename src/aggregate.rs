//! Aggregation functions over a metric's collected window values.

use std::collections::BTreeMap;

/// Aggregation applied to a metric's collected values.
///
/// Resolved once when the metric spec is parsed, so the scan loop never
/// dispatches by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationKind {
    /// No aggregation: report the newest matching line's value.
    Last,
    Mean,
    Median,
    Sum,
    Min,
    Max,
    /// Number of values >= threshold (`count`, `count_100`).
    Count { threshold: i64 },
    /// The above count as a percentage of all collected values.
    CountPercentage { threshold: i64 },
    /// Thresholded count divided by the window length in seconds.
    Frequency { threshold: i64 },
    /// Sum divided by the window length in seconds.
    Speed,
    /// Occurrence count per distinct integer-truncated value.
    Distribution,
}

/// A metric's reported value: a single scalar, or one count per distinct
/// observed key for `distribution`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportValue {
    Scalar(f64),
    Distribution(BTreeMap<i64, u64>),
}

impl AggregationKind {
    /// Parse a function name from a metric spec; the empty string means
    /// last-value.
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "" => Ok(Self::Last),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count { threshold: 0 }),
            "frequency" => Ok(Self::Frequency { threshold: 0 }),
            "speed" => Ok(Self::Speed),
            "distribution" => Ok(Self::Distribution),
            _ => Self::parse_thresholded(name),
        }
    }

    /// `count_<n>`, `count_<n>_percentage` and `frequency_<n>`.
    fn parse_thresholded(name: &str) -> Result<Self, String> {
        if let Some(rest) = name.strip_prefix("count_") {
            if let Some(num) = rest.strip_suffix("_percentage") {
                let threshold = parse_threshold(name, num)?;
                return Ok(Self::CountPercentage { threshold });
            }
            let threshold = parse_threshold(name, rest)?;
            return Ok(Self::Count { threshold });
        }
        if let Some(rest) = name.strip_prefix("frequency_") {
            let threshold = parse_threshold(name, rest)?;
            return Ok(Self::Frequency { threshold });
        }
        Err(format!("unknown aggregation function '{name}'"))
    }

    /// Apply to the collected values. `window_secs` is the metric's window
    /// length, used by the rate functions; `last_value` is the value seeded
    /// from the newest line, used only by `Last`.
    ///
    /// An empty collection reports 0 for every function except `Last`.
    pub fn apply(&self, values: &[f64], window_secs: u64, last_value: f64) -> ReportValue {
        if let Self::Last = self {
            return ReportValue::Scalar(last_value);
        }
        if values.is_empty() {
            return ReportValue::Scalar(0.0);
        }
        match self {
            Self::Last => ReportValue::Scalar(last_value),
            Self::Mean => ReportValue::Scalar(sum(values) / values.len() as f64),
            Self::Median => ReportValue::Scalar(median(values)),
            Self::Sum => ReportValue::Scalar(sum(values)),
            Self::Min => ReportValue::Scalar(fold_min(values)),
            Self::Max => ReportValue::Scalar(fold_max(values)),
            Self::Count { threshold } => {
                ReportValue::Scalar(count_at_least(values, *threshold) as f64)
            }
            Self::CountPercentage { threshold } => ReportValue::Scalar(
                count_at_least(values, *threshold) as f64 / values.len() as f64 * 100.0,
            ),
            Self::Frequency { threshold } => ReportValue::Scalar(per_second(
                count_at_least(values, *threshold) as f64,
                window_secs,
            )),
            Self::Speed => ReportValue::Scalar(per_second(sum(values), window_secs)),
            Self::Distribution => ReportValue::Distribution(distribution(values)),
        }
    }
}

fn parse_threshold(name: &str, num: &str) -> Result<i64, String> {
    num.parse()
        .map_err(|_| format!("aggregation function '{name}' has a non-numeric threshold"))
}

fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

/// Standard median: average of the two middle sorted values for an
/// even-length sequence.
fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

fn fold_min(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn fold_max(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn count_at_least(values: &[f64], threshold: i64) -> usize {
    values.iter().filter(|&&v| v >= threshold as f64).count()
}

fn per_second(amount: f64, window_secs: u64) -> f64 {
    if window_secs == 0 {
        return 0.0;
    }
    amount / window_secs as f64
}

/// Counts per distinct integer-truncated value, ordered by key.
fn distribution(values: &[f64]) -> BTreeMap<i64, u64> {
    let mut counts = BTreeMap::new();
    for &v in values {
        *counts.entry(v.trunc() as i64).or_insert(0) += 1;
    }
    counts
}
