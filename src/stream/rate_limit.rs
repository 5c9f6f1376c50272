use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    Control,
    Ticker,
    Trade,
    Candle,
}

impl MessageClass {
    /// Ticker and control frames drive alerting and liveness tracking, so
    /// they are never shed.
    fn sheddable(&self) -> bool {
        matches!(self, MessageClass::Trade | MessageClass::Candle)
    }
}

/// Rolling one-second inbound counter owned by one client instance.
/// Crossing the soft limit raises a queryable flag; crossing the hard
/// limit sheds lower-priority message classes.
#[derive(Debug)]
pub struct RateLimiter {
    soft_limit: u32,
    hard_limit: u32,
    drop_probability: f64,
    window_start: Instant,
    count: u32,
    rate_limited: bool,
}

impl RateLimiter {
    pub fn new(soft_limit: u32, hard_limit: u32) -> Self {
        Self {
            soft_limit,
            hard_limit,
            drop_probability: 0.8,
            window_start: Instant::now(),
            count: 0,
            rate_limited: false,
        }
    }

    /// Records one inbound message and decides whether to keep it.
    pub fn admit(&mut self, class: MessageClass, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.rate_limited = self.count > self.soft_limit;

        if self.count <= self.hard_limit || !class.sheddable() {
            return true;
        }
        !rand::thread_rng().gen_bool(self.drop_probability)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }
}
