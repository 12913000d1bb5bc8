//! Data models shared by the database layer.

pub mod connection;
pub mod query;

pub use connection::DatabaseType;
pub use query::{ExecResult, QueryParam};
