//! Configuration for Marquee
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! has an environment fallback so the service runs from a plain `.env`.

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::db::RetryPolicy;
use crate::types::MarqueeError;

/// Shortest signing secret accepted at startup
pub const MIN_SECRET_LEN: usize = 32;

/// Marquee - movie catalog and recommendation backend
#[derive(Parser, Debug, Clone)]
#[command(name = "marquee")]
#[command(about = "Movie catalog and recommendation backend")]
#[command(version)]
pub struct Args {
    /// MongoDB connection URI (required)
    #[arg(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// Database name used when the URI does not name one
    #[arg(long, env = "MONGO_DB", default_value = "marquee")]
    pub mongo_db: String,

    /// Secret used to sign identity tokens (required)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Token lifetime, e.g. "7d", "12h", "30m" or plain seconds
    #[arg(long, env = "JWT_EXPIRES_IN", default_value = "7d", value_parser = parse_ttl)]
    pub jwt_expires_in: Duration,

    /// Maximum number of store connection attempts at startup
    #[arg(long, env = "DB_CONNECT_RETRIES", default_value = "5")]
    pub db_connect_retries: u32,

    /// Fixed delay between store connection attempts, in milliseconds
    #[arg(long, env = "DB_RETRY_DELAY_MS", default_value = "3000")]
    pub db_retry_delay_ms: u64,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Argon2 time cost used when hashing new passwords
    #[arg(long, env = "HASH_WORK_FACTOR", default_value = "2")]
    pub hash_work_factor: u32,

    /// API key for the TMDB movie metadata provider
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    pub tmdb_api_key: Option<String>,

    /// Base URL of the TMDB API
    #[arg(long, env = "TMDB_BASE_URL", default_value = "https://api.themoviedb.org/3")]
    pub tmdb_base_url: String,

    /// Comma-separated list of allowed CORS origins ("*" allows any)
    #[arg(long, env = "CORS_ORIGINS")]
    pub cors_origins: Option<String>,

    /// Upper bound on how long shutdown waits for in-flight requests, in seconds
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value = "30")]
    pub drain_timeout_secs: u64,

    /// Runtime environment; "test" runs without binding a socket
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl Args {
    /// Validate configuration
    ///
    /// Runs before any connection attempt; a failure here means the process
    /// exits without touching the store.
    pub fn validate(&self) -> Result<(), MarqueeError> {
        match self.mongo_uri.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(MarqueeError::Config("MONGO_URI is required".into()));
            }
            Some(_) => {}
        }

        match self.jwt_secret.as_deref() {
            None | Some("") => {
                return Err(MarqueeError::Config("JWT_SECRET is required".into()));
            }
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(MarqueeError::Config(format!(
                    "JWT_SECRET must be at least {} characters",
                    MIN_SECRET_LEN
                )));
            }
            Some(_) => {}
        }

        if self.db_connect_retries == 0 {
            return Err(MarqueeError::Config(
                "DB_CONNECT_RETRIES must be at least 1".into(),
            ));
        }

        if !(1..=10).contains(&self.hash_work_factor) {
            return Err(MarqueeError::Config(
                "HASH_WORK_FACTOR must be between 1 and 10".into(),
            ));
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(MarqueeError::Config(
                "LOG_FORMAT must be 'pretty' or 'json'".into(),
            ));
        }

        Ok(())
    }

    /// Socket address the server binds
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the process runs under a test harness
    pub fn is_test_mode(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("test")
    }

    /// Store connection retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.db_connect_retries,
            delay: Duration::from_millis(self.db_retry_delay_ms),
        }
    }

    /// Drain deadline applied during shutdown
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Allowed CORS origins, trimmed and without empties
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse a token lifetime such as "7d", "12h", "30m", "45s" or "3600"
pub fn parse_ttl(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }

    let (digits, multiplier) = match value.char_indices().last() {
        Some((idx, 'd')) => (&value[..idx], 24 * 60 * 60),
        Some((idx, 'h')) => (&value[..idx], 60 * 60),
        Some((idx, 'm')) => (&value[..idx], 60),
        Some((idx, 's')) => (&value[..idx], 1),
        _ => (value, 1),
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{}': expected e.g. 7d, 12h, 30m, 45s", value))?;

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", value))
}
