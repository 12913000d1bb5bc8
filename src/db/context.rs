//! Ambient execution context.
//!
//! A [`Context`] is passed explicitly through every query, exec and transaction call. It
//! carries an optional deadline and, while inside [`in_tx`](crate::db::in_tx), the
//! transaction that calls should run through. Contexts are immutable: deriving a new one
//! (`with_timeout`, binding a transaction) leaves the parent untouched, and a derived
//! context inherits everything its parent holds.
//!
//! The bound transaction lives in a private field, so code outside this crate can observe
//! whether one is bound but can never bind or replace it.

use crate::db::transaction::TxHandle;
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct Context {
    tx: Option<TxHandle>,
    deadline: Option<Instant>,
}

impl Context {
    /// An empty context: no deadline, no transaction.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context with the given deadline, keeping the parent's if it is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            tx: self.tx.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a transaction is bound to this context chain.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Id of the bound transaction, for logging.
    pub fn transaction_id(&self) -> Option<&str> {
        self.tx.as_ref().map(TxHandle::id)
    }

    /// Derive a context with `tx` bound.
    ///
    /// Only the transaction orchestrator binds, and only after checking that nothing is
    /// bound yet; a binding is never replaced.
    pub(crate) fn bind(&self, tx: TxHandle) -> Self {
        debug_assert!(self.tx.is_none(), "a transaction is already bound");
        Self {
            tx: Some(tx),
            deadline: self.deadline,
        }
    }

    /// The bound transaction, or `None`. Never fails.
    pub(crate) fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    /// Run an I/O future under this context's deadline.
    pub(crate) async fn run<F, T>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => {
                let started = Instant::now();
                match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(DbError::timeout(
                        operation,
                        started.elapsed().as_secs().try_into().unwrap_or(u32::MAX),
                    )),
                }
            }
        }
    }

    /// Whether the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Instant::now())
    }
}
