//! Configuration module for Housekeeper.
//!
//! This module handles parsing configuration from environment variables.
//! Secrets are never compiled in: the SMTP password must come from the
//! environment.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HOUSEKEEPER_FROM_ADDRESS` | Yes | - | Sender address for notifications |
//! | `HOUSEKEEPER_TO_ADDRESS` | Yes | - | Recipient address for notifications |
//! | `HOUSEKEEPER_SMTP_PASSWORD` | Yes | - | SMTP password or app token |
//! | `HOUSEKEEPER_SMTP_USERNAME` | No | from address | SMTP login name |
//! | `HOUSEKEEPER_SMTP_SERVER` | No | `smtp.gmail.com:587` | SMTP relay `host:port` |
//! | `HOUSEKEEPER_LOG_DIR` | No | `/var/log/` | Directory swept by `sweep` |
//! | `HOUSEKEEPER_SIZE_THRESHOLD_BYTES` | No | 1000000000 | Sweep threshold |
//! | `HOUSEKEEPER_WATCHED_ROOTS` | No | (none) | Comma-separated roots to watch |
//! | `HOUSEKEEPER_QUEUE_CAPACITY` | No | 8192 | Event queue capacity |
//! | `HOUSEKEEPER_BIND_RETRY_INTERVAL_MS` | No | 1000 | Delay between bind attempts |
//! | `HOUSEKEEPER_BIND_MAX_ATTEMPTS` | No | 1 | Initial bind attempts before the root is given up |
//! | `HOUSEKEEPER_REBIND_MAX_ATTEMPTS` | No | unlimited | Consecutive failed rebinds after a watch broke |
//! | `HOUSEKEEPER_ISOLATE_ROOTS` | No | false | Keep watching other roots when one fails |
//!
//! # Example
//!
//! ```no_run
//! use housekeeper::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Sweeping: {}", config.log_dir.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::mailer::SmtpCredential;
use crate::watcher::RetryPolicy;

/// Default directory swept for oversized log files.
pub const DEFAULT_LOG_DIR: &str = "/var/log/";

/// Default sweep threshold (1 GB).
pub const DEFAULT_SIZE_THRESHOLD_BYTES: u64 = 1_000_000_000;

/// Default SMTP relay.
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com:587";

/// Default event queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Default delay between watch bind attempts in milliseconds.
pub const DEFAULT_BIND_RETRY_INTERVAL_MS: u64 = 1000;

/// Default number of attempts for the first bind of a root.
pub const DEFAULT_BIND_MAX_ATTEMPTS: u32 = 1;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail delivery settings shared by the dispatcher and the sweep.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Address used in the `From:` header and the SMTP envelope.
    pub from_address: String,

    /// Single recipient of every notification.
    pub to_address: String,

    /// SMTP relay as `host:port`.
    pub smtp_server: String,

    /// Login used to authenticate against the relay.
    pub credential: SmtpCredential,
}

/// Configuration for Housekeeper.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory swept for oversized files (top level only).
    pub log_dir: PathBuf,

    /// Files strictly larger than this are reclaimed.
    pub size_threshold_bytes: u64,

    /// Mail delivery settings.
    pub mail: MailConfig,

    /// Roots watched for rename events, one watch task each.
    pub watched_roots: Vec<PathBuf>,

    /// Capacity of the event queue between watch tasks and the dispatcher.
    pub queue_capacity: usize,

    /// How watch tasks retry a failed bind.
    pub bind_retry: RetryPolicy,

    /// When true, a root whose watch cannot be bound is logged and dropped
    /// instead of stopping the daemon.
    pub isolate_roots: bool,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `HOUSEKEEPER_FROM_ADDRESS`, `HOUSEKEEPER_TO_ADDRESS` or
    ///   `HOUSEKEEPER_SMTP_PASSWORD` is not set
    /// - a numeric variable cannot be parsed, or is zero where a positive
    ///   value is required
    /// - `HOUSEKEEPER_ISOLATE_ROOTS` is not a boolean
    pub fn from_env() -> Result<Self, ConfigError> {
        let from_address = required("HOUSEKEEPER_FROM_ADDRESS")?;
        let to_address = required("HOUSEKEEPER_TO_ADDRESS")?;
        let password = required("HOUSEKEEPER_SMTP_PASSWORD")?;

        // Optional: HOUSEKEEPER_SMTP_USERNAME (default: from address)
        let username = env::var("HOUSEKEEPER_SMTP_USERNAME").unwrap_or_else(|_| from_address.clone());

        let smtp_server =
            env::var("HOUSEKEEPER_SMTP_SERVER").unwrap_or_else(|_| DEFAULT_SMTP_SERVER.to_string());
        if !smtp_server.contains(':') {
            return Err(ConfigError::InvalidValue {
                key: "HOUSEKEEPER_SMTP_SERVER".to_string(),
                message: format!("expected host:port, got '{smtp_server}'"),
            });
        }

        let log_dir = env::var("HOUSEKEEPER_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR));

        let size_threshold_bytes =
            parse_or("HOUSEKEEPER_SIZE_THRESHOLD_BYTES", DEFAULT_SIZE_THRESHOLD_BYTES)?;

        // Optional: HOUSEKEEPER_WATCHED_ROOTS (default: no roots)
        let watched_roots = env::var("HOUSEKEEPER_WATCHED_ROOTS")
            .map(|val| {
                val.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let queue_capacity = parse_or("HOUSEKEEPER_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "HOUSEKEEPER_QUEUE_CAPACITY".to_string(),
                message: "queue capacity must be greater than 0".to_string(),
            });
        }

        let interval_ms = parse_or(
            "HOUSEKEEPER_BIND_RETRY_INTERVAL_MS",
            DEFAULT_BIND_RETRY_INTERVAL_MS,
        )?;

        let initial_attempts = parse_attempts("HOUSEKEEPER_BIND_MAX_ATTEMPTS")?
            .unwrap_or(DEFAULT_BIND_MAX_ATTEMPTS);
        let max_rebinds = parse_attempts("HOUSEKEEPER_REBIND_MAX_ATTEMPTS")?;

        let isolate_roots = match env::var("HOUSEKEEPER_ISOLATE_ROOTS") {
            Ok(val) => parse_bool("HOUSEKEEPER_ISOLATE_ROOTS", &val)?,
            Err(_) => false,
        };

        Ok(Self {
            log_dir,
            size_threshold_bytes,
            mail: MailConfig {
                from_address,
                to_address,
                smtp_server,
                credential: SmtpCredential::new(username, password),
            },
            watched_roots,
            queue_capacity,
            bind_retry: RetryPolicy::new(
                Duration::from_millis(interval_ms),
                initial_attempts,
                max_rebinds,
            ),
            isolate_roots,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parses an optional numeric variable, falling back to `default` when unset.
fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(val) => val.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected non-negative integer, got '{val}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parses an optional attempt count, which must be at least 1 when set.
fn parse_attempts(key: &str) -> Result<Option<u32>, ConfigError> {
    if env::var(key).is_err() {
        return Ok(None);
    }
    let attempts: u32 = parse_or(key, 0)?;
    if attempts == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "attempts must be at least 1".to_string(),
        });
    }
    Ok(Some(attempts))
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
    }
}
