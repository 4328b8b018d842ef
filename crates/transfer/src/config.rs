//! Retry policy configuration loaded from environment variables.

use std::time::Duration;

use rand::Rng;

/// Bounds on how a transfer is retried.
///
/// Reads from environment variables:
/// - `TRANSFER_MAX_ATTEMPTS` (default: `3`)
/// - `TRANSFER_BACKOFF_INITIAL_MS` (default: `10`)
/// - `TRANSFER_BACKOFF_MAX_MS` (default: `500`)
/// - `TRANSFER_BACKOFF_MULTIPLIER` (default: `2.0`)
/// - `TRANSFER_BACKOFF_JITTER` (default: `true`)
/// - `TRANSFER_DEADLINE_MS` (default: unset, no deadline)
/// - `TRANSFER_RECORD_FAILURES` (default: `false`)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Randomise each delay within `[delay / 2, delay]`.
    pub jitter: bool,
    /// Wall-clock bound on the whole transfer, across attempts.
    pub deadline: Option<Duration>,
    /// Persist a `failed` record when a transfer is refused for lack of funds.
    pub record_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: true,
            deadline: None,
            record_failures: false,
        }
    }
}

impl RetryPolicy {
    /// Loads the policy from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the policy from an arbitrary key lookup. Unparseable values fall
    /// back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_ms = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        let parse_bool = |key: &str| {
            lookup(key).and_then(|v| match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            })
        };

        Self {
            max_attempts: lookup("TRANSFER_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_attempts),
            initial_backoff: parse_ms("TRANSFER_BACKOFF_INITIAL_MS")
                .unwrap_or(defaults.initial_backoff),
            max_backoff: parse_ms("TRANSFER_BACKOFF_MAX_MS").unwrap_or(defaults.max_backoff),
            backoff_multiplier: lookup("TRANSFER_BACKOFF_MULTIPLIER")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(defaults.backoff_multiplier),
            jitter: parse_bool("TRANSFER_BACKOFF_JITTER").unwrap_or(defaults.jitter),
            deadline: parse_ms("TRANSFER_DEADLINE_MS").filter(|d| !d.is_zero()),
            record_failures: parse_bool("TRANSFER_RECORD_FAILURES")
                .unwrap_or(defaults.record_failures),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Disables backoff entirely; retries start immediately.
    pub fn without_backoff(self) -> Self {
        self.with_backoff(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_record_failures(mut self, record_failures: bool) -> Self {
        self.record_failures = record_failures;
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Delay after the given failed attempt, with jitter applied if enabled.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        base.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(500));
        assert!(policy.jitter);
        assert_eq!(policy.deadline, None);
        assert!(!policy.record_failures);
    }

    #[test]
    fn test_empty_lookup_gives_defaults() {
        assert_eq!(RetryPolicy::from_lookup(|_| None), RetryPolicy::default());
    }

    #[test]
    fn test_lookup_overrides() {
        let policy = RetryPolicy::from_lookup(lookup(&[
            ("TRANSFER_MAX_ATTEMPTS", "5"),
            ("TRANSFER_BACKOFF_INITIAL_MS", "1"),
            ("TRANSFER_BACKOFF_MAX_MS", "40"),
            ("TRANSFER_BACKOFF_MULTIPLIER", "3"),
            ("TRANSFER_BACKOFF_JITTER", "off"),
            ("TRANSFER_DEADLINE_MS", "2000"),
            ("TRANSFER_RECORD_FAILURES", "true"),
        ]));
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(1));
        assert_eq!(policy.max_backoff, Duration::from_millis(40));
        assert_eq!(policy.backoff_multiplier, 3.0);
        assert!(!policy.jitter);
        assert_eq!(policy.deadline, Some(Duration::from_secs(2)));
        assert!(policy.record_failures);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let policy = RetryPolicy::from_lookup(lookup(&[
            ("TRANSFER_MAX_ATTEMPTS", "many"),
            ("TRANSFER_BACKOFF_MULTIPLIER", "0.5"),
            ("TRANSFER_RECORD_FAILURES", "maybe"),
            ("TRANSFER_DEADLINE_MS", "0"),
        ]));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert!(!policy.record_failures);
        assert_eq!(policy.deadline, None);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::from_lookup(lookup(&[("TRANSFER_MAX_ATTEMPTS", "0")]));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[test]
    fn test_base_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_backoff(1), Duration::from_millis(10));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(20));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(40));
        assert_eq!(policy.base_backoff(10), Duration::from_millis(500));
        assert_eq!(policy.base_backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let base = policy.base_backoff(attempt);
            let delay = policy.backoff(attempt);
            assert!(delay <= base);
            assert!(delay >= base / 2);
        }
    }

    #[test]
    fn test_without_backoff_is_zero() {
        let policy = RetryPolicy::default().without_backoff();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(7), Duration::ZERO);
    }
}
