use crate::domain::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

/// Error count per method.
pub type MethodErrors = BTreeMap<HttpMethod, u64>;

/// Sum two error tallies per method.
pub fn merge_method_errors(accumulated: &MethodErrors, incoming: &MethodErrors) -> MethodErrors {
    let mut merged = accumulated.clone();
    for (method, count) in incoming {
        *merged.entry(*method).or_insert(0) += count;
    }
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SampleErrorKind {
    DnsError,
    ConnectError,
    TlsError,
    Timeout,
    ReadError,
}

impl SampleErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleErrorKind::DnsError => "DNS_ERROR",
            SampleErrorKind::ConnectError => "CONNECT_ERROR",
            SampleErrorKind::TlsError => "TLS_ERROR",
            SampleErrorKind::Timeout => "TIMEOUT",
            SampleErrorKind::ReadError => "READ_ERROR",
        }
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub method: HttpMethod,
    pub latency_ms: f64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<SampleErrorKind>,
}

impl Sample {
    pub fn succeeded(method: HttpMethod, latency_ms: f64, status_code: u16) -> Self {
        Self {
            method,
            latency_ms,
            status_code: Some(status_code),
            success: true,
            error: None,
        }
    }

    pub fn failed(method: HttpMethod, latency_ms: f64, error: SampleErrorKind) -> Self {
        Self {
            method,
            latency_ms,
            status_code: None,
            success: false,
            error: Some(error),
        }
    }
}

/// Samples of one trial (or one worker's share of it), grouped by method.
#[derive(Debug, Clone, Default)]
pub struct TrialResult {
    samples: BTreeMap<HttpMethod, Vec<Sample>>,
    errors: MethodErrors,
}

impl TrialResult {
    pub fn record(&mut self, sample: Sample) {
        if !sample.success {
            *self.errors.entry(sample.method).or_insert(0) += 1;
        }
        self.samples.entry(sample.method).or_default().push(sample);
    }

    /// Append another result's samples after ours and add up its error counts.
    pub fn merge(&mut self, other: TrialResult) {
        for (method, mut samples) in other.samples {
            self.samples.entry(method).or_default().append(&mut samples);
        }
        self.errors = merge_method_errors(&self.errors, &other.errors);
    }

    pub fn samples(&self, method: HttpMethod) -> &[Sample] {
        self.samples
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub fn errors(&self) -> &MethodErrors {
        &self.errors
    }

    pub fn error_count(&self, method: HttpMethod) -> u64 {
        self.errors.get(&method).copied().unwrap_or(0)
    }

    pub fn total_samples(&self) -> usize {
        self.samples.values().map(Vec::len).sum()
    }
}

/// Which metric a threshold is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentileKind {
    Avg,
    P50,
    P90,
    P95,
    P99,
    Rps,
}

impl PercentileKind {
    pub fn is_latency(self) -> bool {
        !matches!(self, PercentileKind::Rps)
    }

    pub fn value_of(self, metrics: &MethodMetrics) -> f64 {
        match self {
            PercentileKind::Avg => metrics.latency.avg_ms,
            PercentileKind::P50 => metrics.latency.p50_ms,
            PercentileKind::P90 => metrics.latency.p90_ms,
            PercentileKind::P95 => metrics.latency.p95_ms,
            PercentileKind::P99 => metrics.latency.p99_ms,
            PercentileKind::Rps => metrics.rps,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PercentileKind::Avg => "avg",
            PercentileKind::P50 => "p50",
            PercentileKind::P90 => "p90",
            PercentileKind::P95 => "p95",
            PercentileKind::P99 => "p99",
            PercentileKind::Rps => "rps",
        }
    }
}

impl Display for PercentileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PercentileKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "avg" => Ok(PercentileKind::Avg),
            "p50" => Ok(PercentileKind::P50),
            "p90" => Ok(PercentileKind::P90),
            "p95" => Ok(PercentileKind::P95),
            "p99" => Ok(PercentileKind::P99),
            "rps" => Ok(PercentileKind::Rps),
            other => Err(format!("unknown percentile kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LatencyMetrics {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub stddev_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodMetrics {
    pub method: HttpMethod,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub rps: f64,
    pub latency: LatencyMetrics,
}

impl MethodMetrics {
    pub fn empty(method: HttpMethod) -> Self {
        Self {
            method,
            request_count: 0,
            error_count: 0,
            error_rate: 0.0,
            rps: 0.0,
            latency: LatencyMetrics::default(),
        }
    }
}

/// Wall-clock bounds of a trial's worker fan-out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialWindow {
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialMetrics {
    pub trial: u32,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub duration_secs: f64,
    pub methods: BTreeMap<HttpMethod, MethodMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    pub lower_bound_ms: f64,
    pub upper_bound_ms: f64,
    pub count: u64,
}

/// Everything a finished run hands to reporting and alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResult {
    pub trials: Vec<TrialMetrics>,
    pub overall: BTreeMap<HttpMethod, MethodMetrics>,
    #[serde(default)]
    pub distribution: BTreeMap<HttpMethod, Vec<HistogramBucket>>,
    pub time_range: TimeRange,
}
