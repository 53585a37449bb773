use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::ReconnectPolicy;

/// Exponential reconnect delay with equal jitter: each delay is at least half
/// of `min(cap, base * 2^attempt)` and at most the whole of it.
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    pub fn with_rng(policy: &ReconnectPolicy, rng: StdRng) -> Self {
        let base = Duration::from_millis(policy.base_ms.max(1));
        let cap = Duration::from_millis(policy.cap_ms).max(base);
        Self {
            base,
            cap,
            attempt: 0,
            rng,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn ceiling(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        half + Duration::from_millis(self.rng.gen_range(0..=spread))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
