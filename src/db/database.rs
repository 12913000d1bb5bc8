//! Database facade.

use crate::db::context::Context;
use crate::db::dispatch::{self, Beginner, Execer, Queryer, RowQueryer};
use crate::db::pool::DbPool;
use crate::db::row::DbRow;
use crate::db::transaction::{self, TxHandle, TxOptions};
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, QueryParam};
use async_trait::async_trait;
use std::future::Future;

/// A connection pool whose operations follow the transaction bound to the context.
///
/// `query`, `query_row` and `exec` run through the bound transaction when there is one and
/// through the pool otherwise. `in_tx` opens a transaction only when none is bound.
/// Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for operations that must bypass any bound transaction.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DbRow>> {
        dispatch::query(ctx, &self.pool, sql, params).await
    }

    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<DbRow>> {
        dispatch::query_row(ctx, &self.pool, sql, params).await
    }

    pub async fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        dispatch::exec(ctx, &self.pool, sql, params).await
    }

    /// Begin a transaction on the pool.
    ///
    /// Always opens a new transaction, even when `ctx` already carries one. The caller
    /// owns the handle and must commit or roll it back.
    pub async fn begin(&self, ctx: &Context, options: Option<TxOptions>) -> DbResult<TxHandle> {
        self.pool.begin(ctx, options).await
    }

    /// Run `f` in a transaction with server-default options. See [`transaction::in_tx`].
    pub async fn in_tx<F, Fut, T, E>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        transaction::in_tx(ctx, &self.pool, f, None).await
    }

    /// Run `f` in a transaction begun with `options`. Options are ignored when a
    /// transaction is already bound.
    pub async fn in_tx_with<F, Fut, T, E>(
        &self,
        ctx: &Context,
        options: TxOptions,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        transaction::in_tx(ctx, &self.pool, f, Some(options)).await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

impl From<DbPool> for Database {
    fn from(pool: DbPool) -> Self {
        Self::new(pool)
    }
}

#[async_trait]
impl Queryer for Database {
    async fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Vec<DbRow>> {
        Database::query(self, ctx, sql, params).await
    }
}

#[async_trait]
impl RowQueryer for Database {
    async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<DbRow>> {
        Database::query_row(self, ctx, sql, params).await
    }
}

#[async_trait]
impl Execer for Database {
    async fn exec(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        Database::exec(self, ctx, sql, params).await
    }
}

#[async_trait]
impl Beginner for Database {
    async fn begin(&self, ctx: &Context, options: Option<TxOptions>) -> DbResult<TxHandle> {
        Database::begin(self, ctx, options).await
    }
}
