//! Database access layer.
//!
//! This module provides:
//! - Connection pools per backend, with retrying connect
//! - The execution [`Context`] that carries the active transaction
//! - Capability traits and transaction-aware routing of statements
//! - The run-in-transaction orchestrator and the [`Database`] facade
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod context;
pub mod database;
pub mod dispatch;
pub mod executor;
pub(crate) mod params;
pub mod pool;
pub mod row;
pub mod transaction;

pub use context::Context;
pub use database::Database;
pub use dispatch::{Beginner, Execer, Queryer, RowQueryer, exec, query, query_row};
pub use pool::{DbPool, connect, connect_url, connect_with_retry};
pub use row::DbRow;
pub use transaction::{DbTransaction, IsolationLevel, TxHandle, TxOptions, in_tx};
