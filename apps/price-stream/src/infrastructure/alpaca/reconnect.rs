//! Reconnection Policy
//!
//! Bounded reconnection schedule for the upstream stream. The default is a
//! fixed delay with a hard attempt limit; a multiplier and jitter can be
//! configured for exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::ReconnectSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt (1.0 keeps the delay fixed).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(30), 5)
    }
}

impl ReconnectConfig {
    /// Fixed delay between attempts, no jitter.
    #[must_use]
    pub const fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    /// Build from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: settings.delay,
            max_delay: settings.max_delay.max(settings.delay),
            multiplier: settings.multiplier,
            jitter_factor: settings.jitter_factor,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Reconnection attempt counter and delay schedule.
///
/// # Example
///
/// ```rust
/// use price_stream::infrastructure::alpaca::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(30), 2));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(30)));
/// assert_eq!(policy.next_delay(), None);
///
/// // Successful authentication starts the count over
/// policy.reset();
/// assert!(policy.should_retry());
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Consume one attempt and return the delay before it.
    ///
    /// Returns `None` once the attempt limit is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);
        Some(delay)
    }

    fn grow(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        if !scaled.is_finite() || scaled <= 0.0 {
            return self.config.initial_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = u64::try_from(scaled as u128).unwrap_or(u64::MAX);
        Duration::from_millis(millis).min(self.config.max_delay)
    }

    /// Reset the policy after a successful authentication.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts consumed since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}
