//! Backend dispatch macro.
//!
//! Pools and transactions are enums with one variant per backend. This macro expands
//! to a plain `match` over such an enum, keeping every arm readable at the call site.

/// Generate backend dispatch match arms.
///
/// The first argument is the enum type (`DbPool`, `DbTransaction`), the second the value
/// to match on.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($enum:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::$enum::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;

#[cfg(test)]
mod tests {
    use crate::db::DbPool;
    use crate::models::DatabaseType;

    fn backend_name(pool: &DbPool) -> &'static str {
        impl_db_dispatch!(DbPool, pool, {
            Postgres(_p) => "postgres",
            SQLite(_p) => "sqlite",
        })
    }

    #[tokio::test]
    async fn test_dispatch_selects_variant() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .unwrap();
        let pool = DbPool::SQLite(pool);
        assert_eq!(backend_name(&pool), "sqlite");
        assert_eq!(pool.db_type(), DatabaseType::SQLite);
    }
}
