use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub approval: ApprovalConfig,
    pub queue: QueueConfig,
    pub negotiation: NegotiationConfig,
    pub database: DatabaseConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Seconds a pending approval waits before expiring (default: 1800 = 30 min)
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
}

fn default_approval_timeout() -> u64 {
    1800
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Worker tasks per named queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts before a retryable failure becomes permanent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NegotiationConfig {
    /// Budget expiry window in days (default: 7)
    #[serde(default = "default_budget_expiry_days")]
    pub budget_expiry_days: i64,
}

fn default_budget_expiry_days() -> i64 {
    7
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            budget_expiry_days: default_budget_expiry_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Skip the store entirely (in-memory operation)
    #[serde(default)]
    pub disabled: bool,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (simulated collaborators, no real purchases)
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
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
            .set_default("approval.timeout_secs", 1800i64)?
            .set_default("queue.concurrency", 2i64)?
            .set_default("queue.max_attempts", 3i64)?
            .set_default("queue.backoff_base_ms", 2000i64)?
            .set_default("queue.backoff_cap_ms", 30000i64)?
            .set_default("negotiation.budget_expiry_days", 7i64)?
            .set_default("database.max_connections", 5i64)?
            .set_default("database.disabled", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("REFLIP_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (REFLIP_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("REFLIP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            approval: ApprovalConfig::default(),
            queue: QueueConfig::default(),
            negotiation: NegotiationConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/reflip".to_string(),
                max_connections: 5,
                disabled: dry_run,
            },
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.approval.timeout_secs == 0 {
            errors.push("approval.timeout_secs must be positive".to_string());
        }

        if self.queue.concurrency == 0 {
            errors.push("queue.concurrency must be at least 1".to_string());
        }

        if self.queue.max_attempts == 0 {
            errors.push("queue.max_attempts must be at least 1".to_string());
        }

        if self.queue.backoff_base_ms > self.queue.backoff_cap_ms {
            errors.push("queue.backoff_base_ms must not exceed queue.backoff_cap_ms".to_string());
        }

        if self.negotiation.budget_expiry_days <= 0 {
            errors.push("negotiation.budget_expiry_days must be positive".to_string());
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
    fn test_default_config_validates() {
        let config = AppConfig::default_config(true);
        assert!(config.validate().is_ok());
        assert_eq!(config.approval.timeout_secs, 1800);
        assert_eq!(config.queue.max_attempts, 3);
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let mut config = AppConfig::default_config(true);
        config.queue.backoff_base_ms = 60_000;
        config.queue.backoff_cap_ms = 30_000;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("backoff_base_ms")));
    }
}
