//! Backend-neutral result rows.

use crate::error::{DbError, DbResult};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Postgres, Row, Sqlite, Type};
use std::fmt;

/// A row returned by a query, from whichever backend ran it.
pub enum DbRow {
    Postgres(PgRow),
    SQLite(SqliteRow),
}

impl DbRow {
    /// Decode a column by name or position.
    ///
    /// `T` must be decodable by every supported backend (e.g. `i64`, `String`, `bool`,
    /// `f64`, `Option<_>` of those, `chrono::DateTime<Utc>`).
    pub fn try_get<T, I>(&self, index: I) -> DbResult<T>
    where
        I: ColumnIndex<PgRow> + ColumnIndex<SqliteRow>,
        T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        match self {
            DbRow::Postgres(row) => row.try_get(index).map_err(DbError::from),
            DbRow::SQLite(row) => row.try_get(index).map_err(DbError::from),
        }
    }

    /// Column names in result order.
    pub fn columns(&self) -> Vec<String> {
        match self {
            DbRow::Postgres(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            DbRow::SQLite(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DbRow::Postgres(row) => row.len(),
            DbRow::SQLite(row) => row.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// SqliteRow has no Debug impl.
impl fmt::Debug for DbRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self {
            DbRow::Postgres(_) => "Postgres",
            DbRow::SQLite(_) => "SQLite",
        };
        f.debug_struct("DbRow")
            .field("backend", &backend)
            .field("columns", &self.columns())
            .finish()
    }
}

impl From<PgRow> for DbRow {
    fn from(row: PgRow) -> Self {
        DbRow::Postgres(row)
    }
}

impl From<SqliteRow> for DbRow {
    fn from(row: SqliteRow) -> Self {
        DbRow::SQLite(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_debug_lists_backend_and_columns() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let row: SqliteRow = sqlx::query("SELECT 1 AS a, 'x' AS b")
            .fetch_one(&pool)
            .await
            .unwrap();
        let row = DbRow::from(row);

        let rendered = format!("{row:?}");
        assert!(rendered.contains("SQLite"), "{rendered}");
        assert!(rendered.contains("\"a\""), "{rendered}");
        assert!(rendered.contains("\"b\""), "{rendered}");
        assert_eq!(row.len(), 2);
    }
}
