use crate::domain::{HttpMethod, MethodMetrics, MetricsResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LATEST_REPORT_FILE: &str = "metrics.json";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to create report directory `{}`: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write report file `{}`: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File name for a run's report. Permanent reports carry the run's time range
/// so earlier ones are kept.
pub fn report_file_name(result: &MetricsResult, permanent: bool) -> String {
    if permanent {
        format!(
            "metrics-{}-{}.json",
            result.time_range.started_at_ms, result.time_range.finished_at_ms
        )
    } else {
        LATEST_REPORT_FILE.to_string()
    }
}

pub fn write_report(
    result: &MetricsResult,
    dir: &Path,
    permanent: bool,
) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(dir).map_err(|source| ReportError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let file = dir.join(report_file_name(result, permanent));
    let raw = serde_json::to_string_pretty(result)?;
    fs::write(&file, raw).map_err(|source| ReportError::Write {
        path: file.clone(),
        source,
    })?;
    Ok(file)
}

fn push_rows(out: &mut String, methods: &BTreeMap<HttpMethod, MethodMetrics>) {
    for metrics in methods.values().filter(|m| m.request_count > 0) {
        let _ = writeln!(
            out,
            "  {:<7} {:>8} {:>7} {:>7.2}% {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>9.3}",
            metrics.method.as_str(),
            metrics.request_count,
            metrics.error_count,
            metrics.error_rate,
            metrics.latency.avg_ms,
            metrics.latency.p50_ms,
            metrics.latency.p90_ms,
            metrics.latency.p99_ms,
            metrics.rps,
        );
    }
}

/// Plain-text table of every trial plus the run totals.
pub fn render_summary(result: &MetricsResult) -> String {
    let mut out = String::new();
    let header = format!(
        "  {:<7} {:>8} {:>7} {:>8} {:>10} {:>10} {:>10} {:>10} {:>9}",
        "METHOD", "REQS", "ERRS", "ERR%", "AVG(ms)", "P50(ms)", "P90(ms)", "P99(ms)", "RPS"
    );

    for trial in &result.trials {
        let _ = writeln!(out, "Trial {} ({:.3}s)", trial.trial, trial.duration_secs);
        let _ = writeln!(out, "{header}");
        push_rows(&mut out, &trial.methods);
    }

    let elapsed_secs = result
        .time_range
        .finished_at_ms
        .saturating_sub(result.time_range.started_at_ms) as f64
        / 1000.0;
    let _ = writeln!(out, "Overall ({elapsed_secs:.3}s)");
    let _ = writeln!(out, "{header}");
    push_rows(&mut out, &result.overall);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LatencyMetrics, TimeRange, TrialMetrics};

    fn metrics(method: HttpMethod, request_count: u64) -> MethodMetrics {
        MethodMetrics {
            method,
            request_count,
            error_count: 1,
            error_rate: 100.0 / request_count.max(1) as f64,
            rps: 12.5,
            latency: LatencyMetrics {
                avg_ms: 101.5,
                ..Default::default()
            },
        }
    }

    fn result() -> MetricsResult {
        let methods: BTreeMap<HttpMethod, MethodMetrics> = [
            (HttpMethod::Get, metrics(HttpMethod::Get, 10)),
            (HttpMethod::Post, metrics(HttpMethod::Post, 0)),
        ]
        .into_iter()
        .collect();

        MetricsResult {
            trials: vec![TrialMetrics {
                trial: 1,
                started_at_ms: 1_000,
                finished_at_ms: 1_800,
                duration_secs: 0.8,
                methods: methods.clone(),
            }],
            overall: methods,
            distribution: BTreeMap::new(),
            time_range: TimeRange {
                started_at_ms: 1_000,
                finished_at_ms: 1_800,
            },
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("trialbench-{name}-{}", std::process::id()))
    }

    #[test]
    fn summary_lists_only_methods_with_traffic() {
        let summary = render_summary(&result());

        assert!(summary.contains("Trial 1 (0.800s)"));
        assert!(summary.contains("Overall (0.800s)"));
        assert!(summary.contains("GET"));
        assert!(summary.contains("101.500"));
        assert!(!summary.contains("POST"));
    }

    #[test]
    fn permanent_reports_are_named_by_time_range() {
        assert_eq!(report_file_name(&result(), false), "metrics.json");
        assert_eq!(report_file_name(&result(), true), "metrics-1000-1800.json");
    }

    #[test]
    fn written_report_round_trips() {
        let dir = temp_dir("report");
        let path = write_report(&result(), &dir, true).expect("write report");

        let raw = fs::read_to_string(&path).expect("read report");
        let parsed: MetricsResult = serde_json::from_str(&raw).expect("parse report");
        assert_eq!(parsed, result());
        assert!(raw.contains("\"requestCount\": 10"));

        fs::remove_dir_all(&dir).expect("cleanup");
    }
}
