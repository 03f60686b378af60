use crate::domain::{HttpMethod, SampleErrorKind, TrialResult};
use crate::engine::sampler::Sampler;
use crate::engine::selector::MethodSelector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// Drives requests through a [`Sampler`] with methods drawn from the ratio.
pub struct Attacker {
    sampler: Arc<dyn Sampler>,
    selector: MethodSelector,
    body: Option<String>,
    seed: Option<u64>,
}

impl Attacker {
    pub fn new(
        sampler: Arc<dyn Sampler>,
        selector: MethodSelector,
        body: Option<String>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            sampler,
            selector,
            body,
            seed,
        }
    }

    fn rng_for(&self, worker_index: u32) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(worker_index))),
            None => StdRng::from_entropy(),
        }
    }

    /// Prime connections. Outcomes are dropped.
    pub async fn warmup(&self, requests: u32) {
        let mut rng = self.rng_for(0);
        for _ in 0..requests {
            let method = self.selector.choose(&mut rng);
            let body = self.body_for(method);
            let sample = self.sampler.sample(method, body).await;
            if !sample.success {
                tracing::debug!(
                    %method,
                    error = sample.error.map(SampleErrorKind::as_str),
                    status = sample.status_code,
                    "warmup request failed"
                );
            }
        }
    }

    /// Issue one worker's batch and return its private result.
    pub async fn attack(&self, worker_index: u32, requests: u32) -> TrialResult {
        let mut rng = self.rng_for(worker_index);
        let mut local = TrialResult::default();

        for _ in 0..requests {
            let method = self.selector.choose(&mut rng);
            let body = self.body_for(method);
            local.record(self.sampler.sample(method, body).await);
        }

        tracing::debug!(
            worker = worker_index,
            samples = local.total_samples(),
            "worker finished batch"
        );
        local
    }

    fn body_for(&self, method: HttpMethod) -> Option<&str> {
        if method.carries_body() {
            self.body.as_deref()
        } else {
            None
        }
    }
}
