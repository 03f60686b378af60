use crate::domain::{HttpMethod, PercentileKind};
use crate::engine::metrics::MetricsCalculator;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertThresholds {
    pub latency_millis: Option<u64>,
    pub latency_kind: Option<PercentileKind>,
    pub rps: Option<u64>,
}

/// The one breach a run reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub kind: PercentileKind,
    pub method: HttpMethod,
    pub observed: f64,
    pub threshold: u64,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}

fn first_breach(
    calculator: &MetricsCalculator,
    kind: PercentileKind,
    threshold: u64,
    scan_order: &[HttpMethod],
) -> Option<AlertEvent> {
    let method = scan_order
        .iter()
        .copied()
        .find(|method| calculator.is_over_threshold(kind, threshold, *method))?;
    let observed = calculator
        .overall(method)
        .map(|metrics| kind.value_of(&metrics))
        .unwrap_or_default();

    Some(AlertEvent {
        kind,
        method,
        observed,
        threshold,
    })
}

/// Decide which breach, if any, to report.
///
/// Latency is checked first. A latency breach ends evaluation, so an RPS
/// breach in the same run is never reported.
pub fn evaluate(
    calculator: &MetricsCalculator,
    thresholds: &AlertThresholds,
    scan_order: &[HttpMethod],
) -> Option<AlertEvent> {
    if let Some(threshold) = thresholds.latency_millis.filter(|t| *t > 0) {
        let kind = thresholds.latency_kind.unwrap_or(PercentileKind::Avg);
        if let Some(event) = first_breach(calculator, kind, threshold, scan_order) {
            return Some(event);
        }
    }

    if let Some(threshold) = thresholds.rps.filter(|t| *t > 0) {
        return first_breach(calculator, PercentileKind::Rps, threshold, scan_order);
    }

    None
}

/// Evaluate thresholds and send at most one notification.
pub async fn raise_alert(
    calculator: &MetricsCalculator,
    thresholds: &AlertThresholds,
    notifier: &dyn Notifier,
) -> Result<Option<AlertEvent>, NotifyError> {
    let Some(event) = evaluate(calculator, thresholds, &HttpMethod::ALL) else {
        tracing::info!("no alert threshold breached");
        return Ok(None);
    };

    tracing::warn!(
        kind = %event.kind,
        method = %event.method,
        observed = event.observed,
        threshold = event.threshold,
        "alert threshold breached"
    );
    notifier.notify(&event).await?;
    Ok(Some(event))
}
