//! Capability traits and transaction-aware routing.
//!
//! Pools and transaction handles both implement [`Queryer`], [`RowQueryer`] and
//! [`Execer`]. The free functions [`query`], [`query_row`] and [`exec`] run a statement
//! through the transaction bound to the context when there is one, and through the
//! given base target otherwise. They add nothing else: no retry, no validation, no
//! result transformation.

use crate::db::context::Context;
use crate::db::row::DbRow;
use crate::db::transaction::{TxHandle, TxOptions};
use crate::error::DbResult;
use crate::models::{ExecResult, QueryParam};
use async_trait::async_trait;

/// Runs statements that return a set of rows.
#[async_trait]
pub trait Queryer: Send + Sync {
    async fn query(&self, ctx: &Context, sql: &str, params: &[QueryParam])
    -> DbResult<Vec<DbRow>>;
}

/// Runs statements expected to return at most one row.
#[async_trait]
pub trait RowQueryer: Send + Sync {
    /// `Ok(None)` when no row matched.
    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<DbRow>>;
}

/// Runs statements that do not return rows.
#[async_trait]
pub trait Execer: Send + Sync {
    async fn exec(&self, ctx: &Context, sql: &str, params: &[QueryParam])
    -> DbResult<ExecResult>;
}

/// Starts transactions.
#[async_trait]
pub trait Beginner: Send + Sync {
    async fn begin(&self, ctx: &Context, options: Option<TxOptions>) -> DbResult<TxHandle>;
}

/// Run a row-set query through the bound transaction, or `queryer` if none is bound.
pub async fn query<Q>(
    ctx: &Context,
    queryer: &Q,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Vec<DbRow>>
where
    Q: Queryer + ?Sized,
{
    match ctx.transaction() {
        Some(tx) => tx.query(ctx, sql, params).await,
        None => queryer.query(ctx, sql, params).await,
    }
}

/// Run a single-row query through the bound transaction, or `queryer` if none is bound.
pub async fn query_row<Q>(
    ctx: &Context,
    queryer: &Q,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<Option<DbRow>>
where
    Q: RowQueryer + ?Sized,
{
    match ctx.transaction() {
        Some(tx) => tx.query_row(ctx, sql, params).await,
        None => queryer.query_row(ctx, sql, params).await,
    }
}

/// Run a write statement through the bound transaction, or `execer` if none is bound.
pub async fn exec<X>(
    ctx: &Context,
    execer: &X,
    sql: &str,
    params: &[QueryParam],
) -> DbResult<ExecResult>
where
    X: Execer + ?Sized,
{
    match ctx.transaction() {
        Some(tx) => tx.exec(ctx, sql, params).await,
        None => execer.exec(ctx, sql, params).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::db::transaction::in_tx;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Execer that only counts how often it was called.
    #[derive(Default)]
    struct CountingExecer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Execer for CountingExecer {
        async fn exec(
            &self,
            _ctx: &Context,
            _sql: &str,
            _params: &[QueryParam],
        ) -> DbResult<ExecResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExecResult::default())
        }
    }

    async fn sqlite_pool() -> DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_exec_without_transaction_uses_base_target() {
        let base = CountingExecer::default();
        exec(&Context::background(), &base, "DELETE FROM t", &[])
            .await
            .unwrap();
        assert_eq!(base.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exec_with_bound_transaction_bypasses_base_target() {
        let pool = sqlite_pool().await;
        let base = CountingExecer::default();

        in_tx(
            &Context::background(),
            &pool,
            |ctx| {
                let base = &base;
                async move {
                    let result = exec(&ctx, base, "CREATE TABLE t (id INTEGER)", &[]).await?;
                    assert_eq!(result.rows_affected, 0);
                    Ok::<_, DbError>(())
                }
            },
            None,
        )
        .await
        .unwrap();

        assert_eq!(base.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_row_returns_none_for_no_match() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        exec(&ctx, &pool, "CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        let row = query_row(&ctx, &pool, "SELECT id FROM t WHERE id = ?", &[1.into()])
            .await
            .unwrap();
        assert!(row.is_none());
    }
}
