use std::time::Duration;

const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebindPolicy {
    base_delay_ms: u64,
    multiplier: u32,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl RebindPolicy {
    pub fn new(base_delay_ms: u64, multiplier: u32, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            multiplier: multiplier.max(1),
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            max_attempts,
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt.min(64));
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    pub fn is_exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

impl Default for RebindPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BASE_DELAY_MS,
            DEFAULT_MULTIPLIER,
            DEFAULT_MAX_DELAY_MS,
            DEFAULT_MAX_ATTEMPTS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_uses_base_delay() {
        let policy = RebindPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
    }

    #[test]
    fn delay_doubles_until_the_cap() {
        let policy = RebindPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(30_000));
    }

    #[test]
    fn delays_never_decrease() {
        let policy = RebindPolicy::new(250, 3, 20_000, 16);
        let mut previous = Duration::ZERO;
        for attempt in 0..32 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn huge_attempt_indices_saturate_at_the_cap() {
        let policy = RebindPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn exhaustion_is_reached_at_max_attempts() {
        let policy = RebindPolicy::new(10, 2, 100, 3);
        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn multiplier_of_one_keeps_a_flat_schedule() {
        let policy = RebindPolicy::new(750, 1, 30_000, 4);
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(9));
    }
}
