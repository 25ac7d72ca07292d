use std::time::Duration;

use crate::rng::JitterSource;

/// Jitter as a fraction of the current RTO, applied as ±half of this.
const JITTER_RANGE: f32 = 0.5;

const MIN_RTO: Duration = Duration::from_millis(50);

/// Retransmission backoff of one flight.
///
/// Starts at `start_rto` and doubles on every attempt, each value moved by a
/// random ±25%.
#[derive(Debug)]
pub struct ExponentialBackoff {
    start_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, retries: usize, rng: &mut JitterSource) -> Self {
        Self {
            start_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(rng),
            left: retries,
        }
    }

    /// Start over for a new flight.
    pub fn reset(&mut self, rng: &mut JitterSource) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(rng);
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        let secs = self.rto.as_secs_f32() * (1.0 + self.jitter);
        Duration::try_from_secs_f32(secs)
            .unwrap_or(Duration::MAX)
            .max(MIN_RTO)
    }

    fn jitter(rng: &mut JitterSource) -> f32 {
        rng.jitter(JITTER_RANGE)
    }

    /// Use up one retry.
    pub fn attempt(&mut self, rng: &mut JitterSource) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };

        self.left = n;
        self.jitter = Self::jitter(rng);
        self.rto = self.rto.saturating_mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }

    /// Retries used since the last reset.
    pub fn attempts(&self) -> usize {
        self.retries - self.left
    }
}
