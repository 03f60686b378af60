use crate::domain::{HttpMethod, TrialResult, TrialWindow};
use crate::engine::attacker::Attacker;
use crate::engine::metrics::MetricsCalculator;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const DEFAULT_REQUESTS_PER_WORKER: u32 = 10;
pub const DEFAULT_WARMUP_REQUESTS: u32 = 5;
pub const TRIAL_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("benchmark worker crashed: {0}")]
    WorkerCrashed(#[from] tokio::task::JoinError),
}

/// Fixed knobs of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub thread_num: u32,
    pub trial_num: u32,
    pub requests_per_worker: u32,
    pub warmup_requests: u32,
    pub trial_pause: Duration,
}

impl RunSettings {
    pub fn new(thread_num: u32, trial_num: u32) -> Self {
        Self {
            thread_num,
            trial_num,
            requests_per_worker: DEFAULT_REQUESTS_PER_WORKER,
            warmup_requests: DEFAULT_WARMUP_REQUESTS,
            trial_pause: TRIAL_PAUSE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Warmup,
    Running(u32),
    Aggregating,
    Done,
    Reporting,
    Alerting,
}

impl Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Warmup => write!(f, "warmup"),
            RunPhase::Running(trial) => write!(f, "running trial {trial}"),
            RunPhase::Aggregating => write!(f, "aggregating"),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Reporting => write!(f, "reporting"),
            RunPhase::Alerting => write!(f, "alerting"),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

/// Runs warmup and the trial loop, feeding each merged trial to the calculator.
pub struct TrialOrchestrator {
    attacker: Arc<Attacker>,
    settings: RunSettings,
    phase: RunPhase,
}

impl TrialOrchestrator {
    pub fn new(attacker: Attacker, settings: RunSettings) -> Self {
        Self {
            attacker: Arc::new(attacker),
            settings,
            phase: RunPhase::Idle,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Record a phase change. The run itself stops at `Done`; the caller moves
    /// on to `Reporting` and `Alerting`.
    pub fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(from = %self.phase, to = %phase, "run phase changed");
        self.phase = phase;
    }

    pub async fn run(&mut self) -> Result<MetricsCalculator, RunError> {
        let mut calculator = MetricsCalculator::new();

        self.enter(RunPhase::Warmup);
        self.attacker.warmup(self.settings.warmup_requests).await;

        tracing::info!(
            trials = self.settings.trial_num,
            workers = self.settings.thread_num,
            requests_per_worker = self.settings.requests_per_worker,
            "start benchmarking"
        );
        for trial in 1..=self.settings.trial_num {
            self.enter(RunPhase::Running(trial));
            let (result, window) = self.run_trial(trial).await?;

            if let Some(metrics) = calculator.calculate_trial(trial, &result, window) {
                for method in HttpMethod::ALL {
                    let Some(m) = metrics.methods.get(&method).filter(|m| m.request_count > 0)
                    else {
                        continue;
                    };
                    tracing::info!(
                        trial,
                        %method,
                        requests = m.request_count,
                        errors = m.error_count,
                        avg_ms = m.latency.avg_ms,
                        p90_ms = m.latency.p90_ms,
                        p99_ms = m.latency.p99_ms,
                        rps = m.rps,
                        "trial metrics"
                    );
                }
            }

            tokio::time::sleep(self.settings.trial_pause).await;
        }
        self.enter(RunPhase::Aggregating);
        tracing::info!("end benchmarking");

        self.enter(RunPhase::Done);
        Ok(calculator)
    }

    /// Fan out one trial and wait for every worker's merged contribution.
    pub async fn run_trial(&self, trial: u32) -> Result<(TrialResult, TrialWindow), RunError> {
        let shared = Arc::new(Mutex::new(TrialResult::default()));
        let started_at_ms = now_ms();
        let started = Instant::now();

        let mut handles = Vec::with_capacity(self.settings.thread_num as usize);
        for worker_index in 1..=self.settings.thread_num {
            let attacker = self.attacker.clone();
            let shared = shared.clone();
            let requests = self.settings.requests_per_worker;

            handles.push(tokio::spawn(async move {
                let local = attacker.attack(worker_index, requests).await;
                shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .merge(local);
            }));
        }

        for handle in handles {
            handle.await?;
        }

        let window = TrialWindow {
            started_at_ms,
            finished_at_ms: now_ms(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        let result = std::mem::take(&mut *shared.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(trial, samples = result.total_samples(), "trial merged");

        Ok((result, window))
    }
}
