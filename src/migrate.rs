//! Forward-only schema migrations.
//!
//! [`migrate_up`] walks a [`FileSource`] breadth-first from its root and executes every file
//! whose name ends in [`UP_SUFFIX`], in the order the source lists them. Nothing records
//! which migrations already ran, so callers must not re-run a set against a schema that
//! already has it.

use crate::db::context::Context;
use crate::db::dispatch::Execer;
use crate::error::{DbError, DbResult, MigrationStage};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

/// Suffix that marks a file as a migration.
pub const UP_SUFFIX: &str = "up.sql";

/// Root path of every file source.
pub const ROOT: &str = ".";

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub is_dir: bool,
}

impl SourceEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Read-only hierarchical file source.
///
/// Paths are `/`-separated and relative to the source root, which is [`ROOT`].
pub trait FileSource: Send + Sync {
    fn read_dir(&self, path: &str) -> io::Result<Vec<SourceEntry>>;

    fn read_file(&self, path: &str) -> io::Result<String>;
}

/// Join a directory path and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir == ROOT || dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Apply every migration in `source` through `execer`.
///
/// Directories are visited breadth-first. Within a directory, migration files run as soon
/// as they are listed (name order for [`DirSource`]) and subdirectories are queued. Stops
/// at the first error; migrations already applied stay applied. Returns the number of
/// migrations executed.
pub async fn migrate_up<X, S>(ctx: &Context, execer: &X, source: &S) -> DbResult<usize>
where
    X: Execer + ?Sized,
    S: FileSource + ?Sized,
{
    let mut queue = VecDeque::from([ROOT.to_string()]);
    let mut applied = 0;

    while let Some(dir) = queue.pop_front() {
        let entries = source
            .read_dir(&dir)
            .map_err(|e| DbError::migration(MigrationStage::ReadDir, &dir, e.to_string()))?;

        for entry in entries {
            let path = join_path(&dir, &entry.name);
            if entry.is_dir {
                queue.push_back(path);
                continue;
            }
            if !entry.name.ends_with(UP_SUFFIX) {
                debug!(path = %path, "Skipping non-migration file");
                continue;
            }

            let sql = source
                .read_file(&path)
                .map_err(|e| DbError::migration(MigrationStage::ReadFile, &path, e.to_string()))?;

            debug!(path = %path, "Applying migration");
            execer
                .exec(ctx, &sql, &[])
                .await
                .map_err(|e| DbError::migration(MigrationStage::Exec, &path, e.to_string()))?;
            applied += 1;
        }
    }

    info!(applied = applied, "Migrations applied");
    Ok(applied)
}

/// Migrations in a directory on disk, listed in name order.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path == ROOT {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl FileSource for DirSource {
    /// Entries sorted by name; the platform's listing order is unspecified.
    fn read_dir(&self, path: &str) -> io::Result<Vec<SourceEntry>> {
        let mut entries = std::fs::read_dir(self.resolve(path))?
            .map(|entry| {
                let entry = entry?;
                Ok(SourceEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    is_dir: entry.file_type()?.is_dir(),
                })
            })
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(path))
    }
}

/// Migrations held in memory, typically `include_str!` contents.
///
/// Directory listings follow insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: Vec<(String, String)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file at `path` (e.g. `"0001_init/schema.up.sql"`).
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }
}

impl FileSource for MemorySource {
    fn read_dir(&self, path: &str) -> io::Result<Vec<SourceEntry>> {
        let prefix = match path {
            ROOT | "" => String::new(),
            dir => format!("{}/", dir.trim_end_matches('/')),
        };

        let mut entries: Vec<SourceEntry> = Vec::new();
        for (file, _) in &self.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => SourceEntry::dir(dir),
                None => SourceEntry::file(rest),
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        if entries.is_empty() && !prefix.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", path),
            ));
        }
        Ok(entries)
    }

    fn read_file(&self, path: &str) -> io::Result<String> {
        self.files
            .iter()
            .find(|(file, _)| file == path)
            .map(|(_, contents)| contents.clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("file not found: {}", path))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbResult;
    use crate::models::{ExecResult, QueryParam};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every statement it is asked to execute.
    #[derive(Default)]
    struct RecordingExecer {
        statements: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingExecer {
        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Execer for RecordingExecer {
        async fn exec(
            &self,
            _ctx: &Context,
            sql: &str,
            _params: &[QueryParam],
        ) -> DbResult<ExecResult> {
            if self.fail_on == Some(sql) {
                return Err(DbError::database("syntax error", None, ""));
            }
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(ExecResult::default())
        }
    }

    fn nested_source() -> MemorySource {
        MemorySource::new()
            .with_file("a/1.up.sql", "create a")
            .with_file("a/README.md", "not a migration")
            .with_file("a/b/2.up.sql", "create b")
            .with_file("a/b/2.down.sql", "drop b")
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(".", "a"), "a");
        assert_eq!(join_path("a", "b"), "a/b");
        assert_eq!(join_path("a/", "b"), "a/b");
    }

    #[test]
    fn test_memory_source_listing() {
        let source = nested_source();
        assert_eq!(source.read_dir(".").unwrap(), vec![SourceEntry::dir("a")]);
        assert_eq!(
            source.read_dir("a").unwrap(),
            vec![
                SourceEntry::file("1.up.sql"),
                SourceEntry::file("README.md"),
                SourceEntry::dir("b"),
            ]
        );
        assert!(source.read_dir("missing").is_err());
        assert_eq!(source.read_file("a/b/2.up.sql").unwrap(), "create b");
    }

    #[tokio::test]
    async fn test_only_up_files_are_executed() {
        let execer = RecordingExecer::default();
        let applied = migrate_up(&Context::background(), &execer, &nested_source())
            .await
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(execer.statements(), vec!["create a", "create b"]);
    }

    #[tokio::test]
    async fn test_breadth_first_order() {
        let source = MemorySource::new()
            .with_file("x/deep/3.up.sql", "third")
            .with_file("1.up.sql", "first")
            .with_file("y/2.up.sql", "second");
        let execer = RecordingExecer::default();
        migrate_up(&Context::background(), &execer, &source)
            .await
            .unwrap();

        // root files run first, then each directory level in listing order
        assert_eq!(execer.statements(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_exec_failure_stops_and_names_path() {
        let execer = RecordingExecer {
            fail_on: Some("create a"),
            ..Default::default()
        };
        let err = migrate_up(&Context::background(), &execer, &nested_source())
            .await
            .unwrap_err();

        match err {
            DbError::Migration { stage, path, .. } => {
                assert_eq!(stage, MigrationStage::Exec);
                assert_eq!(path, "a/1.up.sql");
            }
            other => panic!("expected migration error, got {other:?}"),
        }
        assert!(execer.statements().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_is_read_dir_error() {
        let source = DirSource::new("/nonexistent/migrations/root");
        let err = migrate_up(&Context::background(), &RecordingExecer::default(), &source)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Migration {
                stage: MigrationStage::ReadDir,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_source_applies_nothing() {
        let applied = migrate_up(
            &Context::background(),
            &RecordingExecer::default(),
            &MemorySource::new(),
        )
        .await
        .unwrap();
        assert_eq!(applied, 0);
    }
}
