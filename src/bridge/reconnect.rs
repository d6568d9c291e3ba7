//! Pure reconnection policy
//!
//! The supervisor in [`super::connection`] asks [`ReconnectPolicy`] before every
//! attempt; everything here is free of I/O so the capped backoff can be tested
//! without a clock.

use std::time::Duration;

/// Capped backoff for automatic reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Attempts per outage before giving up
    pub max_attempts: u32,
    /// Delays for the first attempts in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted, in milliseconds
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_pattern: vec![1000, 2000, 4000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Sum of every delay of one full outage
    pub fn calculate_max_total_time(&self) -> Duration {
        let total = (1..=self.max_attempts)
            .map(|attempt| self.calculate_backoff_delay(attempt))
            .sum();
        Duration::from_millis(total)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if self.sustained_delay == 0 && self.backoff_pattern.is_empty() {
            return Err("must have either backoff_pattern or sustained_delay > 0".to_string());
        }

        Ok(())
    }
}

/// Decision for the next reconnection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Sleep `delay_ms`, then make attempt number `attempt`
    Proceed { attempt: u32, delay_ms: u64 },
    /// Shutdown was requested; stop quietly
    AbortShutdownRequested,
    /// The cap was reached; give up until an external connect request
    AbortMaxAttemptsExceeded,
}

/// Stateless decision logic
pub struct ReconnectPolicy;

impl ReconnectPolicy {
    /// Decide what happens after `attempts_made` failed attempts
    pub fn next(
        attempts_made: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if attempts_made >= config.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        let attempt = attempts_made + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_pattern() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), 1000);
        assert_eq!(config.calculate_backoff_delay(2), 2000);
        assert_eq!(config.calculate_backoff_delay(3), 4000);
        assert_eq!(config.calculate_backoff_delay(4), 5000);
        assert_eq!(config.calculate_backoff_delay(10), 5000);
        assert_eq!(config.calculate_backoff_delay(1000), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            max_attempts: 3,
            backoff_pattern: vec![],
            sustained_delay: 42,
        };
        assert_eq!(config.calculate_backoff_delay(1), 42);
        assert_eq!(config.calculate_max_total_time(), Duration::from_millis(126));
    }

    #[test]
    fn test_max_total_time_default() {
        // 1 + 2 + 4 seconds, then seven attempts at 5 seconds
        assert_eq!(
            ReconnectConfig::default().calculate_max_total_time(),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn test_validate() {
        assert!(ReconnectConfig::default().validate().is_ok());

        let zero_attempts = ReconnectConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let no_delays = ReconnectConfig {
            max_attempts: 1,
            backoff_pattern: vec![],
            sustained_delay: 0,
        };
        assert!(no_delays.validate().is_err());
    }

    #[test]
    fn test_policy_proceeds_until_cap() {
        let config = ReconnectConfig::default();
        for made in 0..10 {
            assert_eq!(
                ReconnectPolicy::next(made, &config, false),
                ReconnectionDecision::Proceed {
                    attempt: made + 1,
                    delay_ms: config.calculate_backoff_delay(made + 1),
                }
            );
        }
        assert_eq!(
            ReconnectPolicy::next(10, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_policy_shutdown_wins() {
        let config = ReconnectConfig::default();
        assert_eq!(
            ReconnectPolicy::next(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
        assert_eq!(
            ReconnectPolicy::next(10, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }
}
