//! Integration tests for the migration runner against real files and a real database.

use std::fs;
use std::path::Path;
use tempfile::TempDir;
use txstorage::config::PoolTuning;
use txstorage::db::{Context, Database, connect_url};
use txstorage::error::{DbError, MigrationStage};
use txstorage::migrate::{DirSource, FileSource, MemorySource, SourceEntry, migrate_up};

fn write(root: &Path, path: &str, contents: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

async fn sqlite_db(dir: &TempDir) -> Database {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("migrate.db").display());
    let pool = connect_url(&Context::background(), &url, &PoolTuning::default())
        .await
        .unwrap();
    Database::new(pool)
}

async fn table_names(db: &Database) -> Vec<String> {
    db.query(
        &Context::background(),
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .map(|row| row.try_get::<String, _>("name").unwrap())
    .collect()
}

#[test]
fn test_dir_source_lists_entries() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/1.up.sql", "SELECT 1;");
    write(dir.path(), "top.up.sql", "SELECT 1;");

    let source = DirSource::new(dir.path());
    let root = source.read_dir(".").unwrap();
    assert_eq!(
        root,
        vec![SourceEntry::dir("a"), SourceEntry::file("top.up.sql")]
    );
    assert_eq!(source.read_file("a/1.up.sql").unwrap(), "SELECT 1;");
}

#[test]
fn test_dir_source_lists_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["0003_c.up.sql", "0001_a.up.sql", "0004_d.up.sql", "0002_b.up.sql"] {
        write(dir.path(), name, "SELECT 1;");
    }

    let names: Vec<String> = DirSource::new(dir.path())
        .read_dir(".")
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(
        names,
        vec!["0001_a.up.sql", "0002_b.up.sql", "0003_c.up.sql", "0004_d.up.sql"]
    );
}

#[tokio::test]
async fn test_dependent_migrations_apply_in_name_order() {
    let migrations = tempfile::tempdir().unwrap();
    // written out of order so the listing cannot follow creation order
    write(
        migrations.path(),
        "0004_index.up.sql",
        "CREATE INDEX t_label ON t (label);",
    );
    write(
        migrations.path(),
        "0002_alter.up.sql",
        "ALTER TABLE t ADD COLUMN label TEXT;",
    );
    write(
        migrations.path(),
        "0003_seed.up.sql",
        "INSERT INTO t (id, label) VALUES (1, 'one');",
    );
    write(
        migrations.path(),
        "0001_create.up.sql",
        "CREATE TABLE t (id INTEGER PRIMARY KEY);",
    );

    let db_dir = tempfile::tempdir().unwrap();
    let db = sqlite_db(&db_dir).await;
    let ctx = Context::background();

    let applied = migrate_up(&ctx, &db, &DirSource::new(migrations.path()))
        .await
        .unwrap();
    assert_eq!(applied, 4);

    let label: String = db
        .query_row(&ctx, "SELECT label FROM t WHERE id = 1", &[])
        .await
        .unwrap()
        .unwrap()
        .try_get("label")
        .unwrap();
    assert_eq!(label, "one");
}

#[tokio::test]
async fn test_migrations_in_nested_directories() {
    let migrations = tempfile::tempdir().unwrap();
    write(
        migrations.path(),
        "users/users.up.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);\n\
         CREATE INDEX users_name ON users (name);",
    );
    write(migrations.path(), "users/users.down.sql", "DROP TABLE users;");
    write(
        migrations.path(),
        "orders/archive/orders.up.sql",
        "CREATE TABLE orders (id INTEGER PRIMARY KEY);",
    );
    write(migrations.path(), "orders/notes.txt", "not a migration");

    let db_dir = tempfile::tempdir().unwrap();
    let db = sqlite_db(&db_dir).await;

    let applied = migrate_up(
        &Context::background(),
        &db,
        &DirSource::new(migrations.path()),
    )
    .await
    .unwrap();

    assert_eq!(applied, 2);
    assert_eq!(table_names(&db).await, vec!["orders", "users"]);
}

#[tokio::test]
async fn test_rerun_fails_without_ledger() {
    let source = MemorySource::new().with_file("0001/schema.up.sql", "CREATE TABLE t (id INTEGER);");
    let db_dir = tempfile::tempdir().unwrap();
    let db = sqlite_db(&db_dir).await;
    let ctx = Context::background();

    assert_eq!(migrate_up(&ctx, &db, &source).await.unwrap(), 1);

    let err = migrate_up(&ctx, &db, &source).await.unwrap_err();
    match err {
        DbError::Migration { stage, path, .. } => {
            assert_eq!(stage, MigrationStage::Exec);
            assert_eq!(path, "0001/schema.up.sql");
        }
        other => panic!("expected migration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_migration_keeps_earlier_ones() {
    let source = MemorySource::new()
        .with_file("1.up.sql", "CREATE TABLE first (id INTEGER);")
        .with_file("2.up.sql", "CREATE TABLE broken (;");
    let db_dir = tempfile::tempdir().unwrap();
    let db = sqlite_db(&db_dir).await;

    let err = migrate_up(&Context::background(), &db, &source)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("2.up.sql"), "unexpected error: {err}");
    assert_eq!(table_names(&db).await, vec!["first"]);
}
