use std::time::Duration;

use rand::Rng;

/// Reconnect delay schedule owned by one client instance. The schedule
/// itself is deterministic; jitter is applied separately so the base
/// progression stays monotonic.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            factor,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let scaled = self.base.as_secs_f64() * self.factor.powi(self.attempt as i32);
        self.attempt += 1;
        Some(Duration::from_secs_f64(scaled.min(self.max.as_secs_f64())))
    }

    /// Adds up to 10% random jitter on top of a scheduled delay, still
    /// bounded by the cap.
    pub fn jittered(&self, delay: Duration) -> Duration {
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
        let jittered = delay.as_secs_f64() * factor;
        Duration::from_secs_f64(jittered.min(self.max.as_secs_f64()))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 1.3, Duration::from_secs(30), 20);
        let mut previous = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            assert!(delay >= previous, "delay regressed: {:?} < {:?}", delay, previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        // 1.3^19 ≈ 146s, so the tail of the schedule must sit on the cap
        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), 1.3, Duration::from_secs(30), 3);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.attempt(), 3);

        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), 1.3, Duration::from_secs(30), 10);
        for _ in 0..100 {
            let jittered = backoff.jittered(Duration::from_secs(30));
            assert!(jittered <= Duration::from_secs(30));
            assert!(jittered >= Duration::from_secs(30).mul_f64(0.99));
        }
    }
}
