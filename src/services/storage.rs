use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Timelike};
use sqlx::SqlitePool;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::models::task::ImageTask;

/// Gives up looking for a free output name after this many same-day collisions.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Writes compressed copies under a dated directory and records them in SQLite.
pub struct ArchiveStore {
    pool: SqlitePool,
    out_dir: PathBuf,
}

/// Result of a committed task.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub path: PathBuf,
}

impl ArchiveStore {
    pub fn new(pool: SqlitePool, out_dir: PathBuf) -> Self {
        Self { pool, out_dir }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist `compressed` and `text` for `task` under today's directory.
    pub async fn commit(
        &self,
        task: &ImageTask,
        compressed: &[u8],
        text: &str,
    ) -> Result<StoredRecord, StorageError> {
        self.commit_on(task, compressed, text, Local::now().date_naive())
            .await
    }

    /// Persist under `{out_dir}/{day}/`.
    ///
    /// The bytes go to a temporary file, the record is inserted, the file is renamed
    /// into place and only then is the transaction committed. Any failure removes
    /// what was written so a rolled-back task leaves nothing behind.
    pub async fn commit_on(
        &self,
        task: &ImageTask,
        compressed: &[u8],
        text: &str,
        day: NaiveDate,
    ) -> Result<StoredRecord, StorageError> {
        let day_dir = self.out_dir.join(day.format("%Y%m%d").to_string());
        fs::create_dir_all(&day_dir)
            .await
            .map_err(|source| StorageError::Io {
                path: day_dir.clone(),
                source,
            })?;

        let target = reserve_target(&day_dir, task).await?;
        let staging = day_dir.join(format!(".{}.partial", Uuid::new_v4()));

        match self.write_and_record(task, compressed, text, &staging, &target).await {
            Ok(id) => {
                debug!(path = %target.display(), id, "Record committed");
                Ok(StoredRecord { id, path: target })
            }
            Err(e) => {
                discard(&staging).await;
                discard(&target).await;
                Err(e)
            }
        }
    }

    async fn write_and_record(
        &self,
        task: &ImageTask,
        compressed: &[u8],
        text: &str,
        staging: &Path,
        target: &Path,
    ) -> Result<i64, StorageError> {
        fs::write(staging, compressed)
            .await
            .map_err(|source| StorageError::Io {
                path: staging.to_path_buf(),
                source,
            })?;

        let modified = task.modified.naive_local();
        let modified = modified.with_nanosecond(0).unwrap_or(modified);

        let mut tx = self.pool.begin().await?;
        let id = queries::insert_record(&mut tx, modified, &target.to_string_lossy(), text).await?;

        fs::rename(staging, target)
            .await
            .map_err(|source| StorageError::Io {
                path: target.to_path_buf(),
                source,
            })?;

        tx.commit().await?;
        Ok(id)
    }
}

/// Claim the first free `{basename}_o[_N].{format}` in `day_dir`.
///
/// The slot is created empty with create-new semantics, so two tasks with the same
/// basename can never be handed the same path.
async fn reserve_target(day_dir: &Path, task: &ImageTask) -> Result<PathBuf, StorageError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{}_o.{}", task.basename, task.format),
            n => format!("{}_o_{}.{}", task.basename, n, task.format),
        };
        let candidate = day_dir.join(name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(source) => {
                return Err(StorageError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }
    Err(StorageError::NoFreeName {
        dir: day_dir.to_path_buf(),
        basename: task.basename.clone(),
    })
}

async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to clean up output file"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free output name for {basename} in {}", dir.display())]
    NoFreeName { dir: PathBuf, basename: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::task::ImageFormat;

    async fn store() -> (tempfile::TempDir, ArchiveStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("records.db").display());
        let pool = db::init_pool(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let out_dir = dir.path().join("out");
        (dir, ArchiveStore::new(pool, out_dir))
    }

    fn task(basename: &str) -> ImageTask {
        ImageTask {
            dir: PathBuf::from("/nowhere"),
            basename: basename.to_string(),
            format: ImageFormat::Jpg,
            file_name: format!("{basename}.jpg"),
            modified: Local::now(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[tokio::test]
    async fn test_commit_writes_dated_file_and_row() {
        let (dir, store) = store().await;
        let stored = store
            .commit_on(&task("invoice"), b"jpeg-bytes", "Total 42", day())
            .await
            .unwrap();

        let expected = dir.path().join("out/20240601/invoice_o.jpg");
        assert_eq!(stored.path, expected);
        assert_eq!(std::fs::read(&expected).unwrap(), b"jpeg-bytes");

        let rows = queries::search_records(store.pool(), "Total", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, stored.id);
        assert_eq!(rows[0].path, expected.to_string_lossy());
    }

    #[tokio::test]
    async fn test_same_basename_same_day_gets_distinct_paths() {
        let (_dir, store) = store().await;
        let first = store
            .commit_on(&task("scan"), b"first", "one", day())
            .await
            .unwrap();
        let second = store
            .commit_on(&task("scan"), b"second", "two", day())
            .await
            .unwrap();

        assert_ne!(first.path, second.path);
        assert!(second.path.ends_with("scan_o_1.jpg"));
        assert_eq!(std::fs::read(&first.path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
        assert_eq!(queries::count_records(store.pool()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_no_files() {
        let (dir, store) = store().await;
        sqlx::query("DROP TABLE ocr_records")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store.commit_on(&task("broken"), b"bytes", "text", day()).await;
        assert!(matches!(result, Err(StorageError::Database(_))));

        let day_dir = dir.path().join("out/20240601");
        let leftovers: Vec<_> = std::fs::read_dir(&day_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "orphaned files: {leftovers:?}");
    }
}
