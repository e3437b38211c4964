//! Configuration for the sync service.

use std::env;

use tracker_sync::queue::SchedulerConfig;

/// Sync service configuration, loaded from the environment.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Whether synchronization is enabled.
    pub enabled: bool,
    /// Webhook signing secret for signature verification.
    pub webhook_secret: Option<String>,
    /// Maximum age for webhook timestamps (default: 60 seconds).
    pub max_timestamp_age_ms: i64,
    /// Poll interval for the no-webhook fallback; unset disables polling.
    pub poll_interval_secs: Option<u64>,
    /// Retry attempts before a transient failure becomes terminal.
    pub max_attempts: u32,
    /// Concurrent jobs per tracker configuration.
    pub max_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env::var("SYNC_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8088),
            enabled: env::var("SYNC_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            webhook_secret: env::var("TRACKER_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            max_timestamp_age_ms: env::var("SYNC_MAX_TIMESTAMP_AGE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60_000),
            poll_interval_secs: env::var("TRACKER_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            max_attempts: env::var("SYNC_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            max_concurrency: env::var("SYNC_MAX_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
        }
    }
}

impl Config {
    /// Scheduler tunables derived from the service configuration.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_attempts: self.max_attempts,
            max_concurrency: self.max_concurrency,
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    fn clear_env() {
        env::remove_var("SYNC_PORT");
        env::remove_var("SYNC_ENABLED");
        env::remove_var("TRACKER_WEBHOOK_SECRET");
        env::remove_var("SYNC_MAX_TIMESTAMP_AGE_MS");
        env::remove_var("TRACKER_POLL_INTERVAL_SECS");
        env::remove_var("SYNC_MAX_ATTEMPTS");
        env::remove_var("SYNC_MAX_CONCURRENCY");
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();

        let config = Config::default();
        assert_eq!(config.port, 8088);
        assert!(!config.enabled);
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.max_timestamp_age_ms, 60_000);
        assert!(config.poll_interval_secs.is_none());
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        clear_env();

        env::set_var("SYNC_PORT", "9100");
        env::set_var("SYNC_ENABLED", "true");
        env::set_var("TRACKER_WEBHOOK_SECRET", "test-secret");
        env::set_var("TRACKER_POLL_INTERVAL_SECS", "300");
        env::set_var("SYNC_MAX_ATTEMPTS", "3");

        let config = Config::default();
        assert_eq!(config.port, 9100);
        assert!(config.enabled);
        assert_eq!(config.webhook_secret, Some("test-secret".to_string()));
        assert_eq!(config.poll_interval_secs, Some(300));
        assert_eq!(config.max_attempts, 3);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_secret_treated_as_unset() {
        clear_env();

        env::set_var("TRACKER_WEBHOOK_SECRET", "");
        let config = Config::default();
        assert!(config.webhook_secret.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_scheduler_config_carries_retry_tunables() {
        clear_env();

        env::set_var("SYNC_MAX_ATTEMPTS", "2");
        env::set_var("SYNC_MAX_CONCURRENCY", "8");

        let scheduler = Config::default().scheduler_config();
        assert_eq!(scheduler.max_attempts, 2);
        assert_eq!(scheduler.max_concurrency, 8);
        assert_eq!(scheduler.base_backoff, Duration::from_millis(500));

        clear_env();
    }
}
