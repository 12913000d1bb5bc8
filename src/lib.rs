//! Transaction-propagating storage layer.
//!
//! Application code issues queries and writes through a [`Database`] (or the free
//! functions in [`db`]) without knowing whether it runs inside a transaction. A
//! transaction opened by [`Database::in_tx`] is bound to the [`Context`] handed to the unit
//! of work, and every call made with that context, or one derived from it, joins it.
//! Nested `in_tx` calls reuse the bound transaction instead of opening another.
//!
//! Connection setup ([`db::connect_with_retry`]) and forward-only migrations
//! ([`migrate::migrate_up`]) complete the crate.

pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod models;

pub use config::{Config, ConnectionConfig, RetryPolicy};
pub use db::{Context, Database, DbPool, TxOptions, in_tx};
pub use error::{DbError, DbResult};
