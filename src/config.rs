//! Configuration loader for the `water-importer` service.
//!
//! All runtime settings are read once at startup from environment variables
//! (with optional `.env` file support provided by the caller) into an
//! immutable [`Config`]. Nothing else in the crate reads the environment;
//! the store connector and the routes receive the values they need from
//! this snapshot.
use std::{env, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_int {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// InfluxDB host name or address.
    pub influx_host: String,

    /// InfluxDB HTTP API port.
    pub influx_port: u16,

    /// Target database for written points.
    pub influx_db: String,

    /// InfluxDB user name.
    pub influx_user: String,

    /// InfluxDB password.
    pub influx_password: String,

    /// Per-request timeout applied to every call against InfluxDB.
    pub influx_timeout: Duration,

    /// Port the HTTP server listens on (all interfaces).
    pub http_port: u16,

    /// Maximum accepted request body size for uploads, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            influx_host: "localhost".to_string(),
            influx_port: 8086,
            influx_db: "homeassistant".to_string(),
            influx_user: "homeassistant".to_string(),
            influx_password: "homeassistant".to_string(),
            influx_timeout: Duration::from_secs(30),
            http_port: 5000,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `INFLUX_HOST` – store host (default: `localhost`)
/// - `INFLUX_PORT` – store port (default: 8086)
/// - `INFLUX_DB` – database name (default: `homeassistant`)
/// - `INFLUX_USER` / `INFLUX_PASSWORD` – credentials (default: `homeassistant`)
/// - `INFLUX_TIMEOUT_SECS` – store request timeout (default: 30)
/// - `HTTP_PORT` – listen port (default: 5000)
/// - `MAX_UPLOAD_BYTES` – upload body limit (default: 16 MiB)
///
/// Returns an error if any numeric variable is set but cannot be parsed.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();

    let influx_host = env_or!("INFLUX_HOST", defaults.influx_host);
    let influx_port = parse_env_int!("INFLUX_PORT", u16, defaults.influx_port);
    let influx_db = env_or!("INFLUX_DB", defaults.influx_db);
    let influx_user = env_or!("INFLUX_USER", defaults.influx_user);
    let influx_password = env_or!("INFLUX_PASSWORD", defaults.influx_password);
    let timeout_secs = parse_env_int!(
        "INFLUX_TIMEOUT_SECS",
        u64,
        defaults.influx_timeout.as_secs()
    );
    let http_port = parse_env_int!("HTTP_PORT", u16, defaults.http_port);
    let max_upload_bytes = parse_env_int!("MAX_UPLOAD_BYTES", usize, defaults.max_upload_bytes);

    Ok(Config {
        influx_host,
        influx_port,
        influx_db,
        influx_user,
        influx_password,
        influx_timeout: Duration::from_secs(timeout_secs),
        http_port,
        max_upload_bytes,
    })
}

impl Config {
    /// Base URL of the InfluxDB HTTP API, e.g. `http://localhost:8086`.
    ///
    /// A host that already carries a scheme is used as-is.
    pub fn influx_base_url(&self) -> String {
        // ---
        let host = self.influx_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, self.influx_port)
        } else {
            format!("http://{}:{}", host, self.influx_port)
        }
    }

    /// Log the loaded configuration for debugging purposes.
    ///
    /// The password is never printed.
    pub fn log_config(&self) {
        // ---
        let masked_password = if self.influx_password.is_empty() {
            "(empty)"
        } else {
            "****"
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  INFLUX_HOST         : {}", self.influx_host);
        tracing::info!("  INFLUX_PORT         : {}", self.influx_port);
        tracing::info!("  INFLUX_DB           : {}", self.influx_db);
        tracing::info!("  INFLUX_USER         : {}", self.influx_user);
        tracing::info!("  INFLUX_PASSWORD     : {}", masked_password);
        tracing::info!("  INFLUX_TIMEOUT_SECS : {}", self.influx_timeout.as_secs());
        tracing::info!("  HTTP_PORT           : {}", self.http_port);
        tracing::info!("  MAX_UPLOAD_BYTES    : {}", self.max_upload_bytes);
    }
}
