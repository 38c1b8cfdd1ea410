use std::time::{Duration, Instant};

/// Per-device rate limiter. Work is skipped, not delayed: callers check
/// `tick()` and drop the frame for this device when it returns false.
pub struct Throttle {
    interval: Duration,
    last_update: Option<Instant>,
}

impl Throttle {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_update: None,
        }
    }

    #[must_use]
    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_micros(1_000_000 / u64::from(fps.max(1))))
    }

    pub fn tick(&mut self) -> bool {
        let now = Instant::now();
        let ready = self
            .last_update
            .is_none_or(|last| now.duration_since(last) >= self.interval);

        if ready {
            self.last_update = Some(now);
        }

        ready
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::model::throttle::Throttle;

    #[test]
    fn first_tick_is_always_ready() {
        let mut throttle = Throttle::from_fps(1);
        assert!(throttle.tick());
    }

    #[test]
    fn second_tick_within_interval_is_skipped() {
        let mut throttle = Throttle::new(Duration::from_secs(3600));
        assert!(throttle.tick());
        assert!(!throttle.tick());
    }

    #[test]
    fn zero_interval_never_skips() {
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.tick());
        assert!(throttle.tick());
    }
}
