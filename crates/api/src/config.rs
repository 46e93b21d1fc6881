use std::str::FromStr;
use std::time::Duration;

use sonora_core::backoff::BackoffConfig;

use crate::auth::jwt::JwtConfig;

/// A missing or unparsable environment variable.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be {expected} (got \"{value}\")")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Read `name`, falling back to `default` when unset.
pub(crate) fn env_or<T: FromStr>(
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, EnvError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| EnvError::Invalid {
            name,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Read a required, non-empty variable.
pub(crate) fn env_required(name: &'static str) -> Result<String, EnvError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(EnvError::Missing(name)),
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background tasks to stop after shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    /// Shared secret remote workers present on callback requests.
    pub worker_callback_token: String,
    /// Base URL remote workers use to reach this server.
    pub public_base_url: String,
    pub database_url: String,
    /// Optional TOML capability registry file.
    pub capabilities_file: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                   |
    /// |-------------------------|---------------------------|
    /// | `HOST`                  | `0.0.0.0`                 |
    /// | `PORT`                  | `3000`                    |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                      |
    /// | `WORKER_CALLBACK_TOKEN` | required                  |
    /// | `PUBLIC_BASE_URL`       | `http://localhost:{PORT}` |
    /// | `DATABASE_URL`          | `sqlite://sonora.db`      |
    /// | `CAPABILITIES_FILE`     | unset (built-in registry) |
    pub fn from_env() -> Result<Self, EnvError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000, "a valid u16")?;

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = env_or("REQUEST_TIMEOUT_SECS", 30, "a valid u64")?;
        let shutdown_timeout_secs = env_or("SHUTDOWN_TIMEOUT_SECS", 30, "a valid u64")?;

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env()?,
            worker_callback_token: env_required("WORKER_CALLBACK_TOKEN")?,
            public_base_url,
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://sonora.db".into()),
            capabilities_file: std::env::var("CAPABILITIES_FILE")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Retry and polling parameters of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Total submission attempts before a job is marked failed.
    pub max_retries: i32,
    /// How long a worker may take to acknowledge a submission.
    pub ack_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Safety-net interval at which the dispatcher re-checks its queues.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ack_timeout: Duration::from_millis(10_000),
            backoff: BackoffConfig::default(),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl DispatchConfig {
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `DISPATCH_MAX_RETRIES`        | `3`     |
    /// | `DISPATCH_ACK_TIMEOUT_MS`     | `10000` |
    /// | `DISPATCH_BACKOFF_INITIAL_MS` | `500`   |
    /// | `DISPATCH_BACKOFF_MAX_MS`     | `30000` |
    /// | `DISPATCH_BACKOFF_MULTIPLIER` | `2.0`   |
    /// | `DISPATCH_POLL_INTERVAL_MS`   | `1000`  |
    pub fn from_env() -> Result<Self, EnvError> {
        let defaults = Self::default();

        let max_retries: i32 = env_or("DISPATCH_MAX_RETRIES", 3, "a positive integer")?;
        if max_retries < 1 {
            return Err(EnvError::Invalid {
                name: "DISPATCH_MAX_RETRIES",
                expected: "a positive integer",
                value: max_retries.to_string(),
            });
        }

        let multiplier: f64 = env_or("DISPATCH_BACKOFF_MULTIPLIER", 2.0, "a number >= 1.0")?;
        if !(multiplier >= 1.0) {
            return Err(EnvError::Invalid {
                name: "DISPATCH_BACKOFF_MULTIPLIER",
                expected: "a number >= 1.0",
                value: multiplier.to_string(),
            });
        }

        Ok(Self {
            max_retries,
            ack_timeout: Duration::from_millis(env_or(
                "DISPATCH_ACK_TIMEOUT_MS",
                10_000,
                "a valid u64",
            )?),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(env_or(
                    "DISPATCH_BACKOFF_INITIAL_MS",
                    500,
                    "a valid u64",
                )?),
                max_delay: Duration::from_millis(env_or(
                    "DISPATCH_BACKOFF_MAX_MS",
                    30_000,
                    "a valid u64",
                )?),
                multiplier,
                jitter: defaults.backoff.jitter,
            },
            poll_interval: Duration::from_millis(env_or(
                "DISPATCH_POLL_INTERVAL_MS",
                1000,
                "a valid u64",
            )?),
        })
    }
}
