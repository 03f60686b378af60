use crate::domain::{
    HistogramBucket, HttpMethod, LatencyMetrics, MethodMetrics, MetricsResult, PercentileKind,
    Sample, TimeRange, TrialMetrics, TrialResult, TrialWindow,
};
use std::collections::BTreeMap;

pub use crate::domain::merge_method_errors;

// Upper edges close each bucket; anything past the last edge lands in the last bucket.
const HISTOGRAM_EDGES_MS: [f64; 18] = [
    0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0,
    20000.0, 30000.0, 45000.0, 60000.0,
];

/// Welford accumulator over one method's latencies.
#[derive(Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    fn from_latencies(latencies: &[f64]) -> Self {
        let mut stats = Self::default();
        for latency_ms in latencies {
            stats.add(*latency_ms);
        }
        stats
    }

    fn add(&mut self, latency_ms: f64) {
        if self.count == 0 {
            self.min = latency_ms;
            self.max = latency_ms;
        } else {
            self.min = self.min.min(latency_ms);
            self.max = self.max.max(latency_ms);
        }

        self.count += 1;
        let delta = latency_ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (latency_ms - self.mean);
    }

    fn stddev(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / (self.count as f64 - 1.0)).sqrt()
    }
}

/// Run-wide accumulation for one method.
#[derive(Default)]
struct MethodTotals {
    requests: u64,
    errors: u64,
    elapsed_secs: f64,
    latencies: Vec<f64>,
}

/// Nearest-rank percentile over values sorted ascending.
pub fn percentile(sorted_values: &[f64], pct: f64) -> f64 {
    let Some(last) = sorted_values.len().checked_sub(1) else {
        return 0.0;
    };
    let rank = ((pct / 100.0) * sorted_values.len() as f64).ceil() as usize;
    sorted_values[rank.saturating_sub(1).min(last)]
}

fn round_ms(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn bucket_index(latency_ms: f64) -> usize {
    let last = HISTOGRAM_EDGES_MS.len() - 2;
    HISTOGRAM_EDGES_MS[1..]
        .partition_point(|upper| *upper <= latency_ms)
        .min(last)
}

/// Latency summary of a method's samples, failed ones included.
pub fn latency_metrics(latencies: &[f64]) -> LatencyMetrics {
    if latencies.is_empty() {
        return LatencyMetrics::default();
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_by(f64::total_cmp);
    let stats = RunningStats::from_latencies(&sorted);

    LatencyMetrics {
        min_ms: round_ms(stats.min),
        avg_ms: round_ms(stats.mean),
        max_ms: round_ms(stats.max),
        stddev_ms: round_ms(stats.stddev()),
        p50_ms: round_ms(percentile(&sorted, 50.0)),
        p90_ms: round_ms(percentile(&sorted, 90.0)),
        p95_ms: round_ms(percentile(&sorted, 95.0)),
        p99_ms: round_ms(percentile(&sorted, 99.0)),
    }
}

fn requests_per_second(requests: u64, elapsed_secs: f64) -> f64 {
    if requests == 0 {
        return 0.0;
    }
    round_ms(requests as f64 / elapsed_secs.max(0.001))
}

fn error_rate(errors: u64, requests: u64) -> f64 {
    if requests == 0 {
        return 0.0;
    }
    round_ms((errors as f64 / requests as f64) * 100.0)
}

fn sample_latencies(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|sample| sample.latency_ms).collect()
}

/// Count latencies per fixed edge bucket, skipping empty buckets.
fn latency_distribution(latencies: &[f64]) -> Vec<HistogramBucket> {
    let mut counts = [0u64; HISTOGRAM_EDGES_MS.len() - 1];
    for latency_ms in latencies {
        counts[bucket_index(*latency_ms)] += 1;
    }

    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(idx, count)| HistogramBucket {
            lower_bound_ms: HISTOGRAM_EDGES_MS[idx],
            upper_bound_ms: HISTOGRAM_EDGES_MS[idx + 1],
            count: *count,
        })
        .collect()
}

/// Accumulates per-trial, per-method metrics over a whole run.
#[derive(Default)]
pub struct MetricsCalculator {
    trials: BTreeMap<u32, TrialMetrics>,
    totals: BTreeMap<HttpMethod, MethodTotals>,
    time_range: Option<TimeRange>,
}

impl MetricsCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute every method's metrics for a fully merged trial.
    pub fn calculate_trial(
        &mut self,
        trial_index: u32,
        result: &TrialResult,
        window: TrialWindow,
    ) -> Option<&TrialMetrics> {
        for method in HttpMethod::ALL {
            self.calculate_per_trial(
                result.samples(method),
                method,
                trial_index,
                result.error_count(method),
                window,
            );
        }
        self.trials.get(&trial_index)
    }

    pub fn calculate_per_trial(
        &mut self,
        samples: &[Sample],
        method: HttpMethod,
        trial_index: u32,
        error_count: u64,
        window: TrialWindow,
    ) -> MethodMetrics {
        let latencies = sample_latencies(samples);
        let request_count = samples.len() as u64;

        let metrics = MethodMetrics {
            method,
            request_count,
            error_count,
            error_rate: error_rate(error_count, request_count),
            rps: requests_per_second(request_count, window.elapsed_secs),
            latency: latency_metrics(&latencies),
        };

        let totals = self.totals.entry(method).or_default();
        totals.requests += request_count;
        totals.errors += error_count;
        totals.elapsed_secs += window.elapsed_secs;
        totals.latencies.extend(latencies);

        self.trials
            .entry(trial_index)
            .or_insert_with(|| TrialMetrics {
                trial: trial_index,
                started_at_ms: window.started_at_ms,
                finished_at_ms: window.finished_at_ms,
                duration_secs: round_ms(window.elapsed_secs),
                methods: BTreeMap::new(),
            })
            .methods
            .insert(method, metrics.clone());

        self.time_range = Some(match self.time_range {
            Some(range) => TimeRange {
                started_at_ms: range.started_at_ms.min(window.started_at_ms),
                finished_at_ms: range.finished_at_ms.max(window.finished_at_ms),
            },
            None => TimeRange {
                started_at_ms: window.started_at_ms,
                finished_at_ms: window.finished_at_ms,
            },
        });

        metrics
    }

    #[cfg(test)]
    pub fn trial(&self, trial_index: u32) -> Option<&TrialMetrics> {
        self.trials.get(&trial_index)
    }

    /// Run-wide metrics for a method, `None` if it never received a request.
    pub fn overall(&self, method: HttpMethod) -> Option<MethodMetrics> {
        let totals = self.totals.get(&method).filter(|t| t.requests > 0)?;
        Some(MethodMetrics {
            method,
            request_count: totals.requests,
            error_count: totals.errors,
            error_rate: error_rate(totals.errors, totals.requests),
            rps: requests_per_second(totals.requests, totals.elapsed_secs),
            latency: latency_metrics(&totals.latencies),
        })
    }

    pub fn metrics_result(&self) -> MetricsResult {
        let mut overall = BTreeMap::new();
        let mut distribution = BTreeMap::new();
        for method in HttpMethod::ALL {
            let metrics = self
                .overall(method)
                .unwrap_or_else(|| MethodMetrics::empty(method));
            overall.insert(method, metrics);

            if let Some(totals) = self.totals.get(&method) {
                if !totals.latencies.is_empty() {
                    distribution.insert(method, latency_distribution(&totals.latencies));
                }
            }
        }

        MetricsResult {
            trials: self.trials.values().cloned().collect(),
            overall,
            distribution,
            time_range: self.time_range.unwrap_or_default(),
        }
    }

    /// Whether the run-wide metric is worse than `threshold`.
    ///
    /// Latency kinds are worse when above the threshold, RPS when below it.
    pub fn is_over_threshold(&self, kind: PercentileKind, threshold: u64, method: HttpMethod) -> bool {
        let Some(metrics) = self.overall(method) else {
            return false;
        };
        let value = kind.value_of(&metrics);
        let threshold = threshold as f64;
        if kind.is_latency() {
            value > threshold
        } else {
            value < threshold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MethodErrors, SampleErrorKind};

    fn window(started_at_ms: u64, elapsed_secs: f64) -> TrialWindow {
        TrialWindow {
            started_at_ms,
            finished_at_ms: started_at_ms + (elapsed_secs * 1000.0) as u64,
            elapsed_secs,
        }
    }

    fn samples(method: HttpMethod, latencies: &[f64]) -> Vec<Sample> {
        latencies
            .iter()
            .map(|latency| Sample::succeeded(method, *latency, 200))
            .collect()
    }

    fn errors(entries: &[(HttpMethod, u64)]) -> MethodErrors {
        entries.iter().copied().collect()
    }

    #[test]
    fn empty_trial_reports_zeros() {
        let mut calculator = MetricsCalculator::new();
        let metrics = calculator.calculate_per_trial(&[], HttpMethod::Patch, 1, 0, window(0, 0.0));

        assert_eq!(metrics.request_count, 0);
        assert_eq!(metrics.rps, 0.0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.latency, LatencyMetrics::default());
    }

    #[test]
    fn per_trial_uses_nearest_rank_percentiles() {
        let mut calculator = MetricsCalculator::new();
        let latencies: Vec<f64> = (1..=10).map(|v| v as f64 * 10.0).collect();
        let metrics = calculator.calculate_per_trial(
            &samples(HttpMethod::Get, &latencies),
            HttpMethod::Get,
            1,
            0,
            window(1_000, 2.0),
        );

        assert_eq!(metrics.request_count, 10);
        assert_eq!(metrics.latency.p50_ms, 50.0);
        assert_eq!(metrics.latency.p90_ms, 90.0);
        assert_eq!(metrics.latency.p99_ms, 100.0);
        assert_eq!(metrics.latency.avg_ms, 55.0);
        assert_eq!(metrics.latency.min_ms, 10.0);
        assert_eq!(metrics.latency.max_ms, 100.0);
        assert_eq!(metrics.rps, 5.0);
    }

    #[test]
    fn percentiles_ignore_input_order() {
        let ordered = vec![3.0, 7.0, 11.0, 19.0, 23.0, 42.0, 57.0, 88.0];
        let mut shuffled = ordered.clone();
        shuffled.reverse();
        shuffled.swap(1, 5);

        assert_eq!(latency_metrics(&ordered), latency_metrics(&shuffled));
        assert_eq!(latency_metrics(&shuffled), latency_metrics(&shuffled));
    }

    #[test]
    fn failed_samples_count_toward_latency() {
        let mut calculator = MetricsCalculator::new();
        let mut trial = samples(HttpMethod::Post, &[10.0, 20.0, 30.0]);
        trial.push(Sample::failed(HttpMethod::Post, 5_000.0, SampleErrorKind::Timeout));

        let metrics =
            calculator.calculate_per_trial(&trial, HttpMethod::Post, 1, 1, window(0, 1.0));

        assert_eq!(metrics.request_count, 4);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.error_rate, 25.0);
        assert_eq!(metrics.latency.max_ms, 5_000.0);
        assert_eq!(metrics.latency.avg_ms, 1_265.0);
    }

    #[test]
    fn timing_out_target_breaches_latency_threshold() {
        let mut calculator = MetricsCalculator::new();
        let timeouts: Vec<Sample> = (0..5)
            .map(|_| Sample::failed(HttpMethod::Get, 10_000.0, SampleErrorKind::Timeout))
            .collect();

        calculator.calculate_per_trial(&timeouts, HttpMethod::Get, 1, 5, window(0, 50.0));

        let get = calculator.overall(HttpMethod::Get).expect("get metrics");
        assert_eq!(get.latency.avg_ms, 10_000.0);
        assert_eq!(get.latency.p99_ms, 10_000.0);
        assert_eq!(get.error_rate, 100.0);
        assert!(calculator.is_over_threshold(PercentileKind::Avg, 50, HttpMethod::Get));
    }

    #[test]
    fn distribution_buckets_are_closed_below() {
        let buckets = latency_distribution(&[0.5, 1.0, 1.5, 99.9, 100.0, 75_000.0]);
        let summary: Vec<(f64, u64)> = buckets
            .iter()
            .map(|bucket| (bucket.lower_bound_ms, bucket.count))
            .collect();

        assert_eq!(
            summary,
            vec![(0.0, 1), (1.0, 2), (50.0, 1), (100.0, 1), (45_000.0, 1)]
        );
    }

    #[test]
    fn merge_method_errors_is_associative_and_commutative() {
        let a = errors(&[(HttpMethod::Get, 1), (HttpMethod::Post, 2)]);
        let b = errors(&[(HttpMethod::Post, 3), (HttpMethod::Delete, 4)]);
        let c = errors(&[(HttpMethod::Get, 5), (HttpMethod::Patch, 6)]);

        let left = merge_method_errors(&merge_method_errors(&a, &b), &c);
        let right = merge_method_errors(&a, &merge_method_errors(&b, &c));
        let swapped = merge_method_errors(&a, &merge_method_errors(&c, &b));

        assert_eq!(left, right);
        assert_eq!(right, swapped);
        assert_eq!(left.get(&HttpMethod::Get), Some(&6));
        assert_eq!(left.get(&HttpMethod::Post), Some(&5));
    }

    #[test]
    fn threshold_sense_differs_for_latency_and_rps() {
        let mut calculator = MetricsCalculator::new();
        calculator.calculate_per_trial(
            &samples(HttpMethod::Get, &[250.0, 250.0]),
            HttpMethod::Get,
            1,
            0,
            window(0, 1.0),
        );
        assert!(calculator.is_over_threshold(PercentileKind::Avg, 200, HttpMethod::Get));
        assert!(!calculator.is_over_threshold(PercentileKind::Avg, 300, HttpMethod::Get));

        let mut slow = MetricsCalculator::new();
        slow.calculate_per_trial(
            &samples(HttpMethod::Put, &[10.0; 15]),
            HttpMethod::Put,
            1,
            0,
            window(0, 1.0),
        );
        assert!(slow.is_over_threshold(PercentileKind::Rps, 20, HttpMethod::Put));

        let mut fast = MetricsCalculator::new();
        fast.calculate_per_trial(
            &samples(HttpMethod::Put, &[10.0; 25]),
            HttpMethod::Put,
            1,
            0,
            window(0, 1.0),
        );
        assert!(!fast.is_over_threshold(PercentileKind::Rps, 20, HttpMethod::Put));
    }

    #[test]
    fn unused_method_never_breaches() {
        let calculator = MetricsCalculator::new();
        assert!(!calculator.is_over_threshold(PercentileKind::Rps, 20, HttpMethod::Delete));
        assert!(!calculator.is_over_threshold(PercentileKind::Avg, 0, HttpMethod::Delete));
    }

    #[test]
    fn metrics_result_aggregates_trials_and_time_range() {
        let mut calculator = MetricsCalculator::new();
        let mut first = TrialResult::default();
        for sample in samples(HttpMethod::Get, &[10.0, 20.0]) {
            first.record(sample);
        }
        let mut second = TrialResult::default();
        for sample in samples(HttpMethod::Get, &[30.0, 40.0]) {
            second.record(sample);
        }
        second.record(Sample::failed(HttpMethod::Get, 1.0, SampleErrorKind::ReadError));

        calculator.calculate_trial(1, &first, window(1_000, 1.0));
        calculator.calculate_trial(2, &second, window(3_000, 1.0));

        let result = calculator.metrics_result();
        assert_eq!(result.trials.len(), 2);
        assert_eq!(result.trials[1].methods[&HttpMethod::Get].request_count, 3);
        assert_eq!(result.time_range.started_at_ms, 1_000);
        assert_eq!(result.time_range.finished_at_ms, 4_000);

        let get = &result.overall[&HttpMethod::Get];
        assert_eq!(get.request_count, 5);
        assert_eq!(get.error_count, 1);
        assert_eq!(get.latency.avg_ms, 20.2);
        assert_eq!(get.rps, 2.5);
        assert_eq!(result.overall[&HttpMethod::Delete].request_count, 0);

        let buckets = &result.distribution[&HttpMethod::Get];
        assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), 5);
        assert!(!result.distribution.contains_key(&HttpMethod::Post));
    }
}
