//! Statement execution against pools and transactions.
//!
//! Implements the capability traits for [`DbPool`] and [`TxHandle`]. Every call runs under
//! the context deadline. Statements without parameters go through the simple query
//! protocol, so a single string may hold several statements (migration files rely on
//! this). Parameterised statements are prepared.

use crate::db::context::Context;
use crate::db::dispatch::{Execer, Queryer, RowQueryer};
use crate::db::params;
use crate::db::pool::DbPool;
use crate::db::row::DbRow;
use crate::db::transaction::{DbTransaction, TxHandle};
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, QueryParam};
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgQueryResult};
use sqlx::sqlite::{SqliteConnection, SqliteQueryResult};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

fn pg_result(result: PgQueryResult) -> ExecResult {
    ExecResult {
        rows_affected: result.rows_affected(),
        last_insert_id: None,
    }
}

fn sqlite_result(result: SqliteQueryResult) -> ExecResult {
    ExecResult {
        rows_affected: result.rows_affected(),
        last_insert_id: Some(result.last_insert_rowid()),
    }
}

// Raw SQL on a transaction connection goes through these so the executor lifetime is
// concrete; inline in an `async_trait` body the future is not provably `Send`.
fn pg_raw_exec<'a>(
    conn: &'a mut PgConnection,
    sql: &'a str,
) -> Pin<Box<dyn Future<Output = Result<PgQueryResult, sqlx::Error>> + Send + 'a>> {
    sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
}

fn sqlite_raw_exec<'a>(
    conn: &'a mut SqliteConnection,
    sql: &'a str,
) -> Pin<Box<dyn Future<Output = Result<SqliteQueryResult, sqlx::Error>> + Send + 'a>> {
    sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
}

#[async_trait]
impl Queryer for DbPool {
    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DbRow>> {
        debug!(sql = %sql, params = params.len(), "Executing query");

        ctx.run("query", async {
            let rows = match self {
                DbPool::Postgres(pool) => params::postgres_query(sql, params)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(DbRow::from)
                    .collect(),
                DbPool::SQLite(pool) => params::sqlite_query(sql, params)
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(DbRow::from)
                    .collect(),
            };
            Ok::<Vec<DbRow>, DbError>(rows)
        })
        .await
    }
}

#[async_trait]
impl RowQueryer for DbPool {
    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<DbRow>> {
        debug!(sql = %sql, params = params.len(), "Executing single-row query");

        ctx.run("query_row", async {
            let row = match self {
                DbPool::Postgres(pool) => params::postgres_query(sql, params)
                    .fetch_optional(pool)
                    .await?
                    .map(DbRow::from),
                DbPool::SQLite(pool) => params::sqlite_query(sql, params)
                    .fetch_optional(pool)
                    .await?
                    .map(DbRow::from),
            };
            Ok::<Option<DbRow>, DbError>(row)
        })
        .await
    }
}

#[async_trait]
impl Execer for DbPool {
    async fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        debug!(sql = %sql, params = params.len(), "Executing statement");

        ctx.run("exec", async {
            let result = match self {
                DbPool::Postgres(pool) if params.is_empty() => {
                    pg_result(sqlx::raw_sql(sql).execute(pool).await?)
                }
                DbPool::Postgres(pool) => {
                    pg_result(params::postgres_query(sql, params).execute(pool).await?)
                }
                DbPool::SQLite(pool) if params.is_empty() => {
                    sqlite_result(sqlx::raw_sql(sql).execute(pool).await?)
                }
                DbPool::SQLite(pool) => {
                    sqlite_result(params::sqlite_query(sql, params).execute(pool).await?)
                }
            };
            Ok::<ExecResult, DbError>(result)
        })
        .await
    }
}

#[async_trait]
impl Queryer for TxHandle {
    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DbRow>> {
        debug!(transaction_id = %self.id(), sql = %sql, params = params.len(), "Executing query");

        ctx.run("query", async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or_else(|| self.closed_error())?;
            let rows = match tx {
                DbTransaction::Postgres(tx) => params::postgres_query(sql, params)
                    .fetch_all(&mut **tx)
                    .await?
                    .into_iter()
                    .map(DbRow::from)
                    .collect(),
                DbTransaction::SQLite(tx) => params::sqlite_query(sql, params)
                    .fetch_all(&mut **tx)
                    .await?
                    .into_iter()
                    .map(DbRow::from)
                    .collect(),
            };
            Ok::<Vec<DbRow>, DbError>(rows)
        })
        .await
    }
}

#[async_trait]
impl RowQueryer for TxHandle {
    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<DbRow>> {
        debug!(
            transaction_id = %self.id(),
            sql = %sql,
            params = params.len(),
            "Executing single-row query"
        );

        ctx.run("query_row", async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or_else(|| self.closed_error())?;
            let row = match tx {
                DbTransaction::Postgres(tx) => params::postgres_query(sql, params)
                    .fetch_optional(&mut **tx)
                    .await?
                    .map(DbRow::from),
                DbTransaction::SQLite(tx) => params::sqlite_query(sql, params)
                    .fetch_optional(&mut **tx)
                    .await?
                    .map(DbRow::from),
            };
            Ok::<Option<DbRow>, DbError>(row)
        })
        .await
    }
}

#[async_trait]
impl Execer for TxHandle {
    async fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        debug!(transaction_id = %self.id(), sql = %sql, params = params.len(), "Executing statement");

        ctx.run("exec", async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or_else(|| self.closed_error())?;
            let result = match tx {
                DbTransaction::Postgres(tx) if params.is_empty() => {
                    pg_result(pg_raw_exec(&mut **tx, sql).await?)
                }
                DbTransaction::Postgres(tx) => {
                    pg_result(params::postgres_query(sql, params).execute(&mut **tx).await?)
                }
                DbTransaction::SQLite(tx) if params.is_empty() => {
                    sqlite_result(sqlite_raw_exec(&mut **tx, sql).await?)
                }
                DbTransaction::SQLite(tx) => {
                    sqlite_result(params::sqlite_query(sql, params).execute(&mut **tx).await?)
                }
            };
            Ok::<ExecResult, DbError>(result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dispatch::Beginner;
    use crate::error::TxPhase;

    async fn sqlite_pool() -> DbPool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_exec_multi_statement_without_params() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        pool.exec(
            &ctx,
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO t (name) VALUES ('a');",
            &[],
        )
        .await
        .unwrap();

        let rows = pool.query(&ctx, "SELECT name FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].try_get::<String, _>("name").unwrap(), "a");
    }

    #[tokio::test]
    async fn test_transaction_exec_multi_statement_without_params() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        let tx = pool.begin(&ctx, None).await.unwrap();
        tx.exec(
            &ctx,
            "CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t (id) VALUES (1); INSERT INTO t (id) VALUES (2);",
            &[],
        )
        .await
        .unwrap();

        let rows = tx.query(&ctx, "SELECT id FROM t ORDER BY id", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        tx.commit().await.unwrap();

        let row = pool
            .query_row(&ctx, "SELECT COUNT(*) AS n FROM t", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("n").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_exec_with_params_reports_rows_and_rowid() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        pool.exec(&ctx, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .await
            .unwrap();

        let result = pool
            .exec(&ctx, "INSERT INTO t (name) VALUES (?)", &["x".into()])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));

        let row = pool
            .query_row(&ctx, "SELECT id, name FROM t WHERE name = ?", &["x".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.try_get::<i64, _>("id").unwrap(), 1);
        assert_eq!(row.columns(), vec!["id", "name"]);
    }

    #[tokio::test]
    async fn test_handle_rejects_use_after_commit() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        let tx = pool.begin(&ctx, None).await.unwrap();
        tx.exec(&ctx, "CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        let err = tx.query(&ctx, "SELECT id FROM t", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Transaction {
                phase: TxPhase::Closed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unique_violation_is_classified() {
        let pool = sqlite_pool().await;
        let ctx = Context::background();
        pool.exec(&ctx, "CREATE TABLE t (k TEXT PRIMARY KEY)", &[])
            .await
            .unwrap();
        pool.exec(&ctx, "INSERT INTO t (k) VALUES (?)", &["k1".into()])
            .await
            .unwrap();

        let err = pool
            .exec(&ctx, "INSERT INTO t (k) VALUES (?)", &["k1".into()])
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }
}
