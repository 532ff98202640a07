//! Configuration management for Turnstile.
//!
//! Configuration is read from an optional YAML file and then overlaid with
//! environment variables using the `TURNSTILE` prefix and `__` as the nesting
//! separator, e.g. `TURNSTILE__RATE_LIMIT__REQUESTS=100`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::{Environment as EnvSource, File, FileFormat};
use duration_str::deserialize_duration;
use serde::Deserialize;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::LimiterConfig;

/// Accepted values for `logging.level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// API key authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Shared counter store; absent means in-memory rate limiting
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Deadline for handling one protected request
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    /// How long graceful shutdown waits for in-flight requests
    #[serde(default = "default_shutdown_timeout", deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            environment: Environment::default(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per window
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length, e.g. `1m` or `100ms`
    #[serde(default = "default_window", deserialize_with = "deserialize_duration")]
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window: default_window(),
        }
    }
}

impl RateLimitSettings {
    /// Limiter parameters derived from these settings.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig::new(self.requests, self.window)
    }
}

fn default_requests() -> u64 {
    10
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

/// API key authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Accepted API keys
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// The accepted keys, trimmed, with blanks dropped.
    pub fn key_set(&self) -> HashSet<String> {
        self.api_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL; takes precedence over the individual parts
    #[serde(default)]
    pub url: Option<String>,

    /// Server host
    #[serde(default)]
    pub host: Option<String>,

    /// Server port
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Server password
    #[serde(default)]
    pub password: Option<String>,

    /// Database index
    #[serde(default)]
    pub db: i64,

    /// Namespace prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Deadline for the startup connectivity probe
    #[serde(default = "default_probe_timeout", deserialize_with = "deserialize_duration")]
    pub probe_timeout: Duration,

    /// Deadline for each command on the request path
    #[serde(default = "default_command_timeout", deserialize_with = "deserialize_duration")]
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: default_redis_port(),
            password: None,
            db: 0,
            key_prefix: default_key_prefix(),
            probe_timeout: default_probe_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_redis_port() -> u16 {
    6379
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_millis(500)
}

impl RedisConfig {
    /// Whether enough is set to attempt a connection.
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.url) || set(&self.host)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format; defaults by environment when unset
    #[serde(default)]
    pub format: Option<LogFormat>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from an optional YAML file plus the environment.
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                EnvSource::with_prefix("TURNSTILE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("auth.api_keys")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(TurnstileError::Config("server.bind_addr cannot be empty".to_string()));
        }

        if self.server.request_timeout.is_zero() {
            return Err(TurnstileError::Config(
                "server.request_timeout must be positive".to_string(),
            ));
        }

        if self.rate_limit.requests == 0 {
            return Err(TurnstileError::Config(
                "rate_limit.requests must be positive".to_string(),
            ));
        }

        if self.rate_limit.window.is_zero() {
            return Err(TurnstileError::Config(
                "rate_limit.window must be positive".to_string(),
            ));
        }

        if self.auth.key_set().is_empty() {
            return Err(TurnstileError::Config(
                "at least one API key is required".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(TurnstileError::Config(format!(
                "invalid logging.level: must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    /// The effective log format.
    pub fn log_format(&self) -> LogFormat {
        self.logging.format.unwrap_or(match self.server.environment {
            Environment::Production => LogFormat::Json,
            _ => LogFormat::Pretty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    // Environment variables are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 5] = [
        "TURNSTILE__AUTH__API_KEYS",
        "TURNSTILE__RATE_LIMIT__REQUESTS",
        "TURNSTILE__RATE_LIMIT__WINDOW",
        "TURNSTILE__REDIS__URL",
        "TURNSTILE__LOGGING__LEVEL",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    fn valid_config() -> AppConfig {
        AppConfig {
            auth: AuthConfig {
                api_keys: vec!["key-one".to_string()],
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout, Duration::from_secs(15));
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit.requests, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.logging.level, "info");
        assert!(config.redis.is_none());
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("TURNSTILE__AUTH__API_KEYS", "alpha, beta ,,gamma");
        env::set_var("TURNSTILE__RATE_LIMIT__REQUESTS", "25");
        env::set_var("TURNSTILE__RATE_LIMIT__WINDOW", "100ms");
        env::set_var("TURNSTILE__REDIS__URL", "redis://cache:6379/2");

        let result = AppConfig::load(None);
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.rate_limit.requests, 25);
        assert_eq!(config.rate_limit.window, Duration::from_millis(100));

        let keys = config.auth.key_set();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains("beta"));

        let redis = config.redis.unwrap();
        assert!(redis.is_configured());
        assert_eq!(redis.url.as_deref(), Some("redis://cache:6379/2"));
        assert_eq!(redis.key_prefix, "ratelimit:");
    }

    #[test]
    fn test_load_without_api_keys_fails() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let result = AppConfig::load(None);
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  bind_addr: "127.0.0.1:9000"
  environment: production
  request_timeout: 5s
rate_limit:
  requests: 5
  window: 30s
auth:
  api_keys: ["file-key"]
redis:
  host: redis.internal
  password: hunter2
  db: 1
"#
        )
        .unwrap();

        env::set_var("TURNSTILE__RATE_LIMIT__REQUESTS", "7");
        let result = AppConfig::load(Some(file.path()));
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.request_timeout, Duration::from_secs(5));
        assert_eq!(config.rate_limit.requests, 7);
        assert_eq!(config.rate_limit.window, Duration::from_secs(30));
        assert_eq!(config.log_format(), LogFormat::Json);

        let redis = config.redis.unwrap();
        assert!(redis.is_configured());
        assert_eq!(redis.host.as_deref(), Some("redis.internal"));
        assert_eq!(redis.password.as_deref(), Some("hunter2"));
        assert_eq!(redis.db, 1);
    }

    #[test]
    fn test_validate_rejects_zero_requests() {
        let mut config = valid_config();
        config.rate_limit.requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let mut config = valid_config();
        config.server.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = valid_config();
        config.rate_limit.window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_keys() {
        let mut config = valid_config();
        config.auth.api_keys = vec!["  ".to_string(), String::new()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = valid_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_redis_configured() {
        assert!(!RedisConfig::default().is_configured());

        let config = RedisConfig {
            url: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(!config.is_configured());

        let config = RedisConfig {
            host: Some("localhost".to_string()),
            ..Default::default()
        };
        assert!(config.is_configured());
    }
}
