//! Error types for the storage layer.
//!
//! Every public operation returns [`DbResult`]. Connection, transaction and migration
//! failures carry the stage that failed so callers and logs can tell them apart; driver
//! failures keep their SQLSTATE code and constraint kind for inspection.

use crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS;
use std::fmt;
use thiserror::Error;

/// Stage of connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Parse,
    Open,
    Ping,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Open => write!(f, "open"),
            Self::Ping => write!(f, "ping"),
        }
    }
}

/// Lifecycle phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Begin,
    Commit,
    Rollback,
    /// The handle was used after commit or rollback.
    Closed,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Closed => write!(f, "use"),
        }
    }
}

/// Stage of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    ReadDir,
    ReadFile,
    Exec,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadDir => write!(f, "read dir"),
            Self::ReadFile => write!(f, "read file"),
            Self::Exec => write!(f, "exec"),
        }
    }
}

/// Constraint classification reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
    #[default]
    Other,
}

impl From<sqlx::error::ErrorKind> for ConstraintKind {
    fn from(kind: sqlx::error::ErrorKind) -> Self {
        match kind {
            sqlx::error::ErrorKind::UniqueViolation => Self::Unique,
            sqlx::error::ErrorKind::ForeignKeyViolation => Self::ForeignKey,
            sqlx::error::ErrorKind::NotNullViolation => Self::NotNull,
            sqlx::error::ErrorKind::CheckViolation => Self::Check,
            _ => Self::Other,
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Connection failed ({stage}): {message}")]
    Connection {
        stage: ConnectStage,
        message: String,
        suggestion: String,
    },

    #[error("Connection failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Transaction {phase} failed: {message} (transaction: {transaction_id})")]
    Transaction {
        phase: TxPhase,
        message: String,
        transaction_id: String,
    },

    #[error("Migration {stage} failed for '{path}': {message}")]
    Migration {
        stage: MigrationStage,
        path: String,
        message: String,
    },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation on PostgreSQL
        sql_state: Option<String>,
        kind: ConstraintKind,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error for the given stage with a helpful suggestion.
    pub fn connection(
        stage: ConnectStage,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Connection {
            stage,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Wrap the last connection error after all attempts failed.
    pub fn retry_exhausted(attempts: u32, last: DbError) -> Self {
        Self::RetryExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Create a transaction lifecycle error.
    pub fn transaction(
        phase: TxPhase,
        message: impl Into<String>,
        transaction_id: impl Into<String>,
    ) -> Self {
        Self::Transaction {
            phase,
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a migration error for the given stage and path.
    pub fn migration(
        stage: MigrationStage,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Migration {
            stage,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            kind: ConstraintKind::Other,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::RetryExhausted { source, .. } => source.suggestion(),
            _ => None,
        }
    }

    /// Get the SQLSTATE (or driver-specific) code of a database error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check whether this is a unique-constraint violation raised by the database.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Database {
                kind: ConstraintKind::Unique,
                ..
            }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => DbError::Database {
                message: db_err.message().to_string(),
                sql_state: db_err.code().map(|c| c.to_string()),
                kind: db_err.kind().into(),
                suggestion: "Check the SQL syntax, referenced objects and constraints".to_string(),
            },
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                u32::try_from(DEFAULT_ACQUIRE_TIMEOUT_SECS).unwrap_or(u32::MAX),
            ),
            sqlx::Error::PoolClosed => DbError::internal("Connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::database(
                format!("I/O error: {}", io_err),
                None,
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::database(
                format!("TLS error: {}", tls_err),
                None,
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::database(
                format!("Protocol error: {}", msg),
                None,
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                DbError::invalid_input(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::invalid_input(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
