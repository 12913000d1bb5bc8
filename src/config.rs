//! Configuration handling.
//!
//! [`ConnectionConfig`] holds the PostgreSQL connection parameters and renders them into a
//! connection URI. It can be filled from CLI flags or `POSTGRES_*` environment variables.
//! [`Config`] is the command line of the `txstorage` binary.

use crate::error::{DbError, DbResult};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_SCHEMA: &str = "public";
pub const URI_SCHEME: &str = "postgresql";

// Pool configuration defaults
pub const DEFAULT_MAX_CONN_LIFETIME_SECS: u64 = 4 * 60 * 60;
pub const DEFAULT_MAX_IDLE_CONNS: u32 = 20;
pub const DEFAULT_MAX_OPEN_CONNS: u32 = 20;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// Connect retry defaults
pub const DEFAULT_CONNECT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// PostgreSQL connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ConnectionConfig {
    /// Database host. May embed a port as `host:port`, which wins over `--db-port`.
    #[arg(long = "db-host", env = "POSTGRES_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long = "db-port", env = "POSTGRES_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long = "db-user", env = "POSTGRES_USER", default_value = "")]
    pub user: String,

    /// Contains sensitive data - never log
    #[arg(
        long = "db-password",
        env = "POSTGRES_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    pub password: String,

    #[arg(long = "db-name", env = "POSTGRES_DATABASE", default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Rendered as `search_path`.
    #[arg(long = "db-schema", env = "POSTGRES_SCHEMA", default_value = DEFAULT_SCHEMA)]
    pub schema: String,

    /// Free-form driver flags, e.g. `sslmode=disable&client_encoding=UTF8`
    #[arg(long = "db-flags", env = "POSTGRES_FLAGS", default_value = "")]
    pub flags: String,

    /// Maximum lifetime of a pooled connection in seconds (0 = unlimited)
    #[arg(
        long = "db-max-conn-lifetime",
        env = "POSTGRES_MAX_CONN_LIFETIME",
        default_value_t = DEFAULT_MAX_CONN_LIFETIME_SECS
    )]
    pub max_conn_lifetime_secs: u64,

    #[arg(
        long = "db-max-idle-conns",
        env = "POSTGRES_MAX_IDLE_CONNS",
        default_value_t = DEFAULT_MAX_IDLE_CONNS
    )]
    pub max_idle_conns: u32,

    #[arg(
        long = "db-max-open-conns",
        env = "POSTGRES_MAX_OPEN_CONNS",
        default_value_t = DEFAULT_MAX_OPEN_CONNS
    )]
    pub max_open_conns: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            database: DEFAULT_DATABASE.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            flags: String::new(),
            max_conn_lifetime_secs: DEFAULT_MAX_CONN_LIFETIME_SECS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
        }
    }
}

impl ConnectionConfig {
    /// Render the connection URI.
    ///
    /// ```text
    /// postgresql://[user[:password]@][host][:port][/dbname][?search_path=schema][&flags]
    /// ```
    pub fn uri(&self) -> String {
        let mut uri = format!("{URI_SCHEME}://");

        if !self.user.is_empty() {
            uri.push_str(&self.user);
            if !self.password.is_empty() {
                uri.push(':');
                uri.push_str(&self.password);
            }
            uri.push('@');
        }

        if !self.host.is_empty() {
            let mut parts = self.host.split(':');
            uri.push_str(parts.next().unwrap_or_default());

            // A port embedded in the host takes precedence over the port field.
            match parts.next() {
                Some(port) => {
                    uri.push(':');
                    uri.push_str(port);
                }
                None if self.port != 0 => {
                    uri.push_str(&format!(":{}", self.port));
                }
                None => {}
            }
        }

        if !self.database.is_empty() {
            uri.push('/');
            uri.push_str(&self.database);
        }

        let mut flags_prefix = '?';
        if !self.schema.is_empty() {
            flags_prefix = '&';
            uri.push_str(&format!("?search_path={}", self.schema));
        }

        if !self.flags.is_empty() {
            uri.push(flags_prefix);
            uri.push_str(&self.flags);
        }

        uri
    }

    /// Get a display-safe version of the URI (password masked).
    pub fn masked_uri(&self) -> String {
        mask_password(&self.uri())
    }

    /// Pool tuning derived from this configuration.
    pub fn pool_tuning(&self) -> PoolTuning {
        PoolTuning {
            max_conn_lifetime: Duration::from_secs(self.max_conn_lifetime_secs),
            max_idle_conns: self.max_idle_conns,
            max_open_conns: self.max_open_conns,
        }
    }
}

/// Replace the password of a connection URL with `****`.
///
/// Strings that do not parse as URLs are returned unchanged.
pub fn mask_password(connection_string: &str) -> String {
    match Url::parse(connection_string) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("****")).is_ok() {
                url.to_string()
            } else {
                connection_string.to_string()
            }
        }
        _ => connection_string.to_string(),
    }
}

/// Connection pool limits applied when a pool is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    /// Zero means connections are never recycled by age.
    pub max_conn_lifetime: Duration,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            max_conn_lifetime: Duration::from_secs(DEFAULT_MAX_CONN_LIFETIME_SECS),
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
        }
    }
}

impl PoolTuning {
    /// Validate pool limits.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_open_conns == 0 {
            return Err(DbError::config("max_open_conns must be greater than 0"));
        }
        if self.max_idle_conns > self.max_open_conns {
            return Err(DbError::config(format!(
                "max_idle_conns ({}) cannot exceed max_open_conns ({})",
                self.max_idle_conns, self.max_open_conns
            )));
        }
        Ok(())
    }

    /// Lifetime as understood by the pool (`None` = unlimited).
    pub fn max_lifetime(&self) -> Option<Duration> {
        (!self.max_conn_lifetime.is_zero()).then_some(self.max_conn_lifetime)
    }

    /// Idle reaping for the pool.
    ///
    /// The pool cannot cap the number of idle connections, so a cap below the open limit
    /// is approximated by closing idle connections after a timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.max_idle_conns >= self.max_open_conns {
            None
        } else {
            Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS))
        }
    }
}

/// Fixed-delay retry policy for connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(DEFAULT_CONNECT_RETRY_DELAY_SECS),
            max_retries: DEFAULT_CONNECT_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Total number of connection attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Command line of the `txstorage` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "txstorage",
    about = "Connect to PostgreSQL and apply forward-only SQL migrations",
    version,
    author
)]
pub struct Config {
    #[command(flatten)]
    pub connection: ConnectionConfig,

    /// Retries after a failed connection attempt
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_RETRIES,
        env = "TXSTORAGE_CONNECT_RETRIES"
    )]
    pub connect_retries: u32,

    /// Delay between connection attempts in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_RETRY_DELAY_SECS,
        env = "TXSTORAGE_CONNECT_RETRY_DELAY"
    )]
    pub connect_retry_delay_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TXSTORAGE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "TXSTORAGE_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Connect and verify the database is reachable
    Ping,
    /// Apply every `*up.sql` file found under a directory, breadth first
    Migrate {
        /// Root directory of the migration files
        #[arg(long, env = "TXSTORAGE_MIGRATIONS_DIR")]
        dir: PathBuf,
    },
}

impl Config {
    /// Retry policy from the command line.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.connect_retry_delay_secs),
            max_retries: self.connect_retries,
        }
    }
}
