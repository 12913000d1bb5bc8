//! Transactions and the run-in-transaction orchestrator.
//!
//! [`in_tx`] runs a unit of work inside a transaction. If the context already carries one,
//! the unit of work simply runs inside it and the outer caller keeps ownership of commit
//! and rollback, so nested calls never open a second transaction. Otherwise a transaction
//! is begun, bound into a derived context and resolved once the unit of work returns:
//! committed on success, rolled back on error. A drop guard rolls back on every other exit
//! path (panic, cancelled future).

use crate::db::context::Context;
use crate::db::dispatch::Beginner;
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult, TxPhase};
use crate::models::DatabaseType;
use async_trait::async_trait;
use sqlx::{Postgres, Sqlite, Transaction};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    /// PostgreSQL transaction
    Postgres(Transaction<'static, Postgres>),
    /// SQLite transaction
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            Postgres(tx) => tx.commit().await.map_err(DbError::from),
            SQLite(tx) => tx.commit().await.map_err(DbError::from),
        })
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        impl_db_dispatch!(DbTransaction, self, {
            Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        })
    }
}

/// Isolation level requested when beginning a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for beginning a transaction. The default keeps the server's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// `SET TRANSACTION` statement applying these options, if any.
    pub(crate) fn postgres_statement(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }
        (!modes.is_empty()).then(|| format!("SET TRANSACTION {}", modes.join(", ")))
    }
}

/// Handle to an open transaction.
///
/// Clones share the same transaction. The transaction is in flight until [`commit`] or
/// [`rollback`] is called once; afterwards every use fails with a
/// [`TxPhase::Closed`] error. The handle serialises access internally, but statements
/// issued concurrently through one handle run in whatever order they acquire it.
///
/// [`commit`]: TxHandle::commit
/// [`rollback`]: TxHandle::rollback
#[derive(Clone)]
pub struct TxHandle {
    id: Arc<str>,
    db_type: DatabaseType,
    pub(crate) inner: Arc<Mutex<Option<DbTransaction>>>,
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxHandle")
            .field("id", &self.id)
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

impl TxHandle {
    pub(crate) fn new(id: String, tx: DbTransaction) -> Self {
        Self {
            id: id.into(),
            db_type: tx.db_type(),
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Unique transaction identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Whether neither commit nor rollback has been called yet.
    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    /// Commit the transaction.
    pub async fn commit(&self) -> DbResult<()> {
        let tx = self.take().await?;
        tx.commit()
            .await
            .map_err(|e| DbError::transaction(TxPhase::Commit, e.to_string(), self.id()))?;
        info!(transaction_id = %self.id, "Transaction committed");
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(&self) -> DbResult<()> {
        let tx = self.take().await?;
        tx.rollback()
            .await
            .map_err(|e| DbError::transaction(TxPhase::Rollback, e.to_string(), self.id()))?;
        info!(transaction_id = %self.id, "Transaction rolled back");
        Ok(())
    }

    async fn take(&self) -> DbResult<DbTransaction> {
        self.inner.lock().await.take().ok_or_else(|| self.closed_error())
    }

    pub(crate) fn closed_error(&self) -> DbError {
        DbError::transaction(
            TxPhase::Closed,
            "transaction already committed or rolled back",
            self.id(),
        )
    }

    /// Drop the transaction without waiting, if the handle is not in use.
    ///
    /// The driver issues the rollback when the transaction is dropped. Returns `false`
    /// if another caller holds the handle right now.
    fn abandon(&self) -> bool {
        match self.inner.try_lock() {
            Ok(mut guard) => {
                if guard.take().is_some() {
                    warn!(transaction_id = %self.id, "Transaction abandoned, rolling back");
                }
                true
            }
            Err(_) => false,
        }
    }
}

fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl Beginner for DbPool {
    async fn begin(&self, ctx: &Context, options: Option<TxOptions>) -> DbResult<TxHandle> {
        let transaction_id = generate_transaction_id();
        let options = options.unwrap_or_default();

        let tx = ctx
            .run("begin", async {
                match self {
                    DbPool::Postgres(pool) => {
                        let mut tx = pool.begin().await?;
                        if let Some(statement) = options.postgres_statement() {
                            sqlx::query(&statement).execute(&mut *tx).await?;
                        }
                        Ok::<_, DbError>(DbTransaction::Postgres(tx))
                    }
                    DbPool::SQLite(pool) => {
                        if !options.is_default() {
                            return Err(DbError::invalid_input(
                                "SQLite does not support isolation level or read-only transaction options",
                            ));
                        }
                        Ok(DbTransaction::SQLite(pool.begin().await?))
                    }
                }
            })
            .await
            .map_err(|e| DbError::transaction(TxPhase::Begin, e.to_string(), &transaction_id))?;

        info!(
            transaction_id = %transaction_id,
            db_type = %tx.db_type(),
            options = ?options,
            "Transaction started"
        );

        Ok(TxHandle::new(transaction_id, tx))
    }
}

/// Rolls the transaction back on every exit path unless it was resolved explicitly.
struct TxGuard {
    handle: TxHandle,
    armed: bool,
}

impl TxGuard {
    fn new(handle: TxHandle) -> Self {
        Self {
            handle,
            armed: true,
        }
    }

    async fn commit(mut self, ctx: &Context) -> DbResult<()> {
        let result = ctx.run("commit", self.handle.commit()).await;
        if result.is_ok() {
            self.armed = false;
        }
        result
    }

    /// Rollback errors are logged, never returned: the unit of work's error wins.
    /// Runs without the context deadline so an expired context still rolls back.
    async fn rollback(mut self) {
        if let Err(e) = self.handle.rollback().await {
            warn!(
                transaction_id = %self.handle.id(),
                error = %e,
                "Rollback failed"
            );
        }
        self.armed = false;
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if !self.armed || self.handle.abandon() {
            return;
        }

        // The handle is busy; finish the rollback once it is released.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let handle = self.handle.clone();
            runtime.spawn(async move {
                if let Err(e) = handle.rollback().await {
                    debug!(transaction_id = %handle.id(), error = %e, "Deferred rollback skipped");
                }
            });
        }
    }
}

/// Run `unit_of_work` inside a transaction.
///
/// - If `ctx` already carries a transaction, `unit_of_work` runs with `ctx` as is and its
///   result is returned unchanged. No transaction is opened and nothing is committed or
///   rolled back; that stays with the caller that opened it. `options` are ignored.
/// - Otherwise a transaction is begun on `beginner` with `options` (server defaults when
///   `None`). A begin failure is returned without running `unit_of_work`. The unit of
///   work receives a derived context with the transaction bound. On `Ok` the transaction
///   is committed and a commit failure is returned; on `Err` it is rolled back and the
///   unit of work's error is returned as is.
///
/// # Example
///
/// ```ignore
/// in_tx(&ctx, &db, |ctx| async move {
///     db.exec(&ctx, "INSERT INTO tests (id) VALUES ($1)", &["a".into()]).await?;
///     db.exec(&ctx, "INSERT INTO tests (id) VALUES ($1)", &["b".into()]).await?;
///     Ok::<_, DbError>(())
/// }, None)
/// .await?;
/// ```
pub async fn in_tx<B, F, Fut, T, E>(
    ctx: &Context,
    beginner: &B,
    unit_of_work: F,
    options: Option<TxOptions>,
) -> Result<T, E>
where
    B: Beginner + ?Sized,
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    if let Some(tx) = ctx.transaction() {
        debug!(transaction_id = %tx.id(), "Reusing bound transaction");
        return unit_of_work(ctx.clone()).await;
    }

    let tx = beginner.begin(ctx, options).await?;
    let guard = TxGuard::new(tx.clone());
    let scoped = ctx.bind(tx);

    match unit_of_work(scoped).await {
        Ok(value) => {
            guard.commit(ctx).await?;
            Ok(value)
        }
        Err(err) => {
            guard.rollback().await;
            Err(err)
        }
    }
}
