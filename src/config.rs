use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub regulator: RegulatorConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the external ledger provider API
    pub base_url: String,
    /// API key sent in the X-Api-Key header
    #[serde(default)]
    pub api_key: String,
    /// Request timeout in seconds
    #[serde(default = "default_ledger_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ledger_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegulatorConfig {
    /// Webhook URL for regulator notifications. Empty means no endpoint is
    /// configured and deliveries are treated as immediate no-op successes.
    #[serde(default)]
    pub webhook_url: String,
    /// API key sent in the X-Api-Key header, if set
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-delivery timeout in seconds
    #[serde(default = "default_regulator_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_regulator_timeout_secs() -> u64 {
    15
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            api_key: None,
            timeout_secs: default_regulator_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between reconciliation passes (seconds)
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// Maximum transfers to reconcile per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Age after which a transfer without an external reference is
    /// considered a failed initiation (seconds)
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_batch_size() -> i64 {
    100
}

fn default_stuck_after_secs() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            batch_size: default_batch_size(),
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Interval between dispatch passes (seconds)
    #[serde(default = "default_dispatcher_interval_secs")]
    pub interval_secs: u64,
    /// Maximum due notifications to process per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// Maximum delivery attempts before an entry becomes a dead letter
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    /// Base delay for exponential backoff (seconds)
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,
    /// Ceiling on the backoff delay (seconds)
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_dispatcher_interval_secs() -> u64 {
    30
}

fn default_max_attempts() -> i32 {
    crate::domain::MAX_DELIVERY_ATTEMPTS
}

fn default_base_backoff_secs() -> u64 {
    60
}

fn default_max_backoff_secs() -> u64 {
    3600
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_dispatcher_interval_secs(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl DispatcherConfig {
    /// Backoff delay before the next delivery attempt.
    ///
    /// Integer left-shift rather than floating-point exponentiation, capped
    /// at `max_backoff_secs`. With the 60s base this yields 1, 2, 4, 8, 16
    /// minutes across attempts 1-5.
    pub fn backoff_delay(&self, attempts: i32) -> chrono::Duration {
        let shift = attempts.saturating_sub(1).clamp(0, 31) as u32;
        let secs = self
            .base_backoff_secs
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Optional directory for daily-rotated log files
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SETTLER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SETTLER_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("SETTLER")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.ledger.base_url.is_empty() {
            errors.push("ledger.base_url must be set".to_string());
        }

        if self.monitor.batch_size <= 0 {
            errors.push("monitor.batch_size must be positive".to_string());
        }

        if self.dispatcher.batch_size <= 0 {
            errors.push("dispatcher.batch_size must be positive".to_string());
        }

        if self.dispatcher.max_attempts <= 0 {
            errors.push("dispatcher.max_attempts must be positive".to_string());
        }

        if self.dispatcher.base_backoff_secs == 0 {
            errors.push("dispatcher.base_backoff_secs must be positive".to_string());
        }

        if self.dispatcher.base_backoff_secs > self.dispatcher.max_backoff_secs {
            errors.push(
                "dispatcher.base_backoff_secs must not exceed dispatcher.max_backoff_secs"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let config = DispatcherConfig::default();

        // 1m, 2m, 4m, 8m, 16m across attempts 1-5
        assert_eq!(config.backoff_delay(1), chrono::Duration::minutes(1));
        assert_eq!(config.backoff_delay(2), chrono::Duration::minutes(2));
        assert_eq!(config.backoff_delay(3), chrono::Duration::minutes(4));
        assert_eq!(config.backoff_delay(4), chrono::Duration::minutes(8));
        assert_eq!(config.backoff_delay(5), chrono::Duration::minutes(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = DispatcherConfig {
            base_backoff_secs: 60,
            max_backoff_secs: 120,
            ..Default::default()
        };

        assert_eq!(config.backoff_delay(5), chrono::Duration::seconds(120));
        // Large attempt counts must not overflow the shift
        assert_eq!(config.backoff_delay(64), chrono::Duration::seconds(120));
        assert_eq!(config.backoff_delay(0), chrono::Duration::seconds(60));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = AppConfig {
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 5,
            },
            ledger: LedgerConfig {
                base_url: "https://ledger.example.com/api/v1".to_string(),
                api_key: String::new(),
                timeout_secs: 10,
            },
            regulator: RegulatorConfig::default(),
            monitor: MonitorConfig::default(),
            dispatcher: DispatcherConfig {
                batch_size: 0,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("database.url")));
        assert!(errors.iter().any(|e| e.contains("dispatcher.batch_size")));
    }
}
