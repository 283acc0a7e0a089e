//! Configuration for the leadership components.

use crate::{LeaderError, LeaderResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`LeadershipCoordinator`](crate::LeadershipCoordinator)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Lease TTL of the directory session backing leadership
    pub session_ttl: Duration,
    /// Interval between renewals while leader
    pub renew_interval: Duration,
    /// Delay before retrying after a failed acquire
    pub retry_backoff: Duration,
    /// Fraction of each interval applied as random jitter
    pub jitter_ratio: f64,
    /// Upper bound on any single directory call
    pub directory_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let session_ttl = Duration::from_secs(10);
        Self {
            session_ttl,
            renew_interval: session_ttl / 10,
            retry_backoff: Duration::from_secs(1),
            jitter_ratio: 0.1,
            directory_timeout: Duration::from_secs(5),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lease TTL and derives the renewal interval as TTL/10.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self.renew_interval = ttl / 10;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn with_directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.session_ttl.is_zero() || self.renew_interval.is_zero() {
            return Err(LeaderError::config("session TTL and renew interval must be non-zero"));
        }
        if self.renew_interval >= self.session_ttl {
            return Err(LeaderError::config(format!(
                "renew interval {:?} must be shorter than the session TTL {:?}",
                self.renew_interval, self.session_ttl
            )));
        }
        if self.retry_backoff.is_zero() || self.directory_timeout.is_zero() {
            return Err(LeaderError::config("retry backoff and directory timeout must be non-zero"));
        }
        validate_jitter(self.jitter_ratio)?;

        // A renewal must be able to start and finish inside one lease.
        let latest_renewal = self.renew_interval.mul_f64(1.0 + self.jitter_ratio);
        if latest_renewal + self.directory_timeout >= self.session_ttl {
            return Err(LeaderError::config(format!(
                "renew interval {:?} plus directory timeout {:?} must fit within the session TTL {:?}",
                latest_renewal, self.directory_timeout, self.session_ttl
            )));
        }
        Ok(())
    }
}

/// Configuration for a [`LeaderPointerWatcher`](crate::LeaderPointerWatcher)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Interval between pointer key reads
    pub poll_interval: Duration,
    pub jitter_ratio: f64,
    /// Upper bound on a single pointer read
    pub read_timeout: Duration,
    /// React to directory push notifications between polls
    pub use_push_notifications: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            jitter_ratio: 0.1,
            read_timeout: Duration::from_secs(5),
            use_push_notifications: true,
        }
    }
}

impl WatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_push_notifications(mut self, enabled: bool) -> Self {
        self.use_push_notifications = enabled;
        self
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.poll_interval.is_zero() || self.read_timeout.is_zero() {
            return Err(LeaderError::config("poll interval and read timeout must be non-zero"));
        }
        validate_jitter(self.jitter_ratio)
    }
}

/// Configuration for a [`ReconnectingProxy`](crate::ReconnectingProxy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Interval between reconnect attempts toward the last known address
    pub reconnect_interval: Duration,
    pub jitter_ratio: f64,
    /// Upper bound on a single call through the proxy
    pub call_timeout: Duration,
    /// Default attempts for [`ReconnectingProxy::ready`](crate::ReconnectingProxy::ready)
    pub wait_attempts: u32,
    /// Default delay between those attempts
    pub wait_delay: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            jitter_ratio: 0.1,
            call_timeout: Duration::from_secs(5),
            wait_attempts: 10,
            wait_delay: Duration::from_millis(500),
        }
    }
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_wait(mut self, attempts: u32, delay: Duration) -> Self {
        self.wait_attempts = attempts;
        self.wait_delay = delay;
        self
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.reconnect_interval.is_zero() || self.call_timeout.is_zero() {
            return Err(LeaderError::config(
                "reconnect interval and call timeout must be non-zero",
            ));
        }
        validate_jitter(self.jitter_ratio)
    }
}

fn validate_jitter(ratio: f64) -> LeaderResult<()> {
    if !(0.0..1.0).contains(&ratio) {
        return Err(LeaderError::config(format!(
            "jitter ratio {} must be in [0, 1)",
            ratio
        )));
    }
    Ok(())
}

/// Spread `base` uniformly by up to `ratio` in either direction.
pub(crate) fn jittered(base: Duration, ratio: f64) -> Duration {
    if ratio <= 0.0 {
        return base;
    }
    let factor = rand::thread_rng().gen_range(1.0 - ratio..=1.0 + ratio);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_lease_timing() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(10));
        assert_eq!(config.renew_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let proxy = ProxyConfig::default();
        assert_eq!(proxy.wait_attempts, 10);
        assert_eq!(proxy.wait_delay, Duration::from_millis(500));
        assert!(WatcherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_renewal_slower_than_ttl() {
        let config = CoordinatorConfig::new()
            .with_session_ttl(Duration::from_secs(2))
            .with_renew_interval(Duration::from_secs(2));
        assert!(matches!(
            config.validate(),
            Err(LeaderError::ConfigError { .. })
        ));

        assert!(WatcherConfig::new()
            .with_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ProxyConfig::new().with_jitter_ratio(1.5).validate().is_err());
    }

    #[test]
    fn test_validation_rejects_timeout_outliving_the_lease() {
        // One-second lease with the five-second default timeout
        let config = CoordinatorConfig::new().with_session_ttl(Duration::from_secs(1));
        assert!(matches!(
            config.validate(),
            Err(LeaderError::ConfigError { .. })
        ));

        let config = config.with_directory_timeout(Duration::from_millis(895));
        assert!(config.validate().is_err());

        let config = config.with_directory_timeout(Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let base = Duration::from_secs(1);
        for _ in 0..100 {
            let value = jittered(base, 0.1);
            assert!(value >= Duration::from_millis(899));
            assert!(value <= Duration::from_millis(1101));
        }
        assert_eq!(jittered(base, 0.0), base);
    }
}
