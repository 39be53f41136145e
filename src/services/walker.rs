//! Depth-first discovery of image files under the root directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::fs;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::run::RunCounters;
use crate::models::task::ImageTask;

/// How the walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Every entry was visited.
    Completed,
    /// Cancellation was raised, or the consumer went away.
    Aborted,
}

/// Walk statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkSummary {
    pub emitted: u64,
    pub invalid: u64,
    pub end: WalkEnd,
}

/// Emits one [`ImageTask`] per recognized image under `root`.
///
/// Entries are visited in file-name order within each directory and sub-directories
/// are fully walked where they are listed. Every call to [`Walker::walk`] starts over.
#[derive(Debug, Clone)]
pub struct Walker {
    root: PathBuf,
    recursive: bool,
    counters: Arc<RunCounters>,
}

struct Entry {
    path: PathBuf,
    file_name: String,
    is_dir: bool,
}

impl Walker {
    pub fn new(root: PathBuf, recursive: bool, counters: Arc<RunCounters>) -> Self {
        Self {
            root,
            recursive,
            counters,
        }
    }

    /// Send tasks into `tx` until the tree is exhausted or `cancel` fires.
    ///
    /// Files with unrecognized names are logged and counted as failures on the spot.
    /// Symbolic links are treated as files, never descended into.
    /// Only a directory read error aborts the walk.
    pub async fn walk(
        &self,
        tx: Sender<ImageTask>,
        cancel: CancellationToken,
    ) -> Result<WalkSummary, WalkError> {
        let mut summary = WalkSummary {
            emitted: 0,
            invalid: 0,
            end: WalkEnd::Completed,
        };
        let mut stack = vec![list_dir(&self.root).await?.into_iter()];

        while let Some(level) = stack.last_mut() {
            if cancel.is_cancelled() {
                summary.end = WalkEnd::Aborted;
                break;
            }
            let Some(entry) = level.next() else {
                stack.pop();
                continue;
            };

            if entry.is_dir {
                if self.recursive {
                    stack.push(list_dir(&entry.path).await?.into_iter());
                }
                continue;
            }

            let task = match to_task(entry).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid image file");
                    self.counters.record_failure();
                    summary.invalid += 1;
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.end = WalkEnd::Aborted;
                    break;
                }
                sent = tx.send(task) => {
                    if sent.is_err() {
                        summary.end = WalkEnd::Aborted;
                        break;
                    }
                    summary.emitted += 1;
                }
            }
        }

        debug!(
            emitted = summary.emitted,
            invalid = summary.invalid,
            end = ?summary.end,
            "Walk finished"
        );
        Ok(summary)
    }
}

/// Directory entries sorted by file name.
async fn list_dir(dir: &Path) -> Result<Vec<Entry>, WalkError> {
    let read_error = |source| WalkError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut reader = fs::read_dir(dir).await.map_err(read_error)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(read_error)? {
        let path = entry.path();
        // Links are never followed as directories; a link back up the tree would loop.
        let is_dir = match entry.file_type().await {
            Ok(file_type) => file_type.is_dir(),
            Err(_) => false,
        };
        entries.push(Entry {
            path,
            file_name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }
    entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(entries)
}

async fn to_task(entry: Entry) -> Result<ImageTask, WalkError> {
    let (basename, format) =
        ImageTask::parse_name(&entry.file_name).ok_or_else(|| WalkError::InvalidFile {
            path: entry.path.clone(),
        })?;

    let meta = fs::metadata(&entry.path)
        .await
        .map_err(|source| WalkError::Stat {
            path: entry.path.clone(),
            source,
        })?;
    let modified = meta
        .modified()
        .map(DateTime::<Local>::from)
        .map_err(|source| WalkError::Stat {
            path: entry.path.clone(),
            source,
        })?;

    let dir = entry
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    Ok(ImageTask {
        dir,
        basename,
        format,
        file_name: entry.file_name,
        modified,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("Failed to read directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a recognized image file: {}", path.display())]
    InvalidFile { path: PathBuf },

    #[error("Failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.png");
        touch(dir.path(), "a.JPG");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "sub/c.jpeg");
        touch(dir.path(), "sub/deeper/d.jpg");
        touch(dir.path(), "sub/README");
        touch(dir.path(), "z.png");
        dir
    }

    async fn collect(walker: &Walker) -> (Vec<String>, WalkSummary) {
        let (tx, mut rx) = mpsc::channel(64);
        let summary = walker.walk(tx, CancellationToken::new()).await.unwrap();
        let mut names = Vec::new();
        while let Some(task) = rx.recv().await {
            names.push(task.file_name);
        }
        (names, summary)
    }

    #[tokio::test]
    async fn test_depth_first_in_name_order() {
        let dir = tree();
        let counters = Arc::new(RunCounters::default());
        let walker = Walker::new(dir.path().to_path_buf(), true, counters.clone());

        let (names, summary) = collect(&walker).await;
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg", "d.jpg", "z.png"]);
        assert_eq!(summary.emitted, 5);
        assert_eq!(summary.invalid, 2);
        assert_eq!(summary.end, WalkEnd::Completed);
        assert_eq!(counters.failed(), 2);
    }

    #[tokio::test]
    async fn test_non_recursive_skips_directories() {
        let dir = tree();
        let counters = Arc::new(RunCounters::default());
        let walker = Walker::new(dir.path().to_path_buf(), false, counters.clone());

        let (names, _) = collect(&walker).await;
        assert_eq!(names, vec!["a.JPG", "b.png", "z.png"]);
        assert_eq!(counters.failed(), 1);
    }

    #[tokio::test]
    async fn test_each_walk_starts_over() {
        let dir = tree();
        let walker = Walker::new(dir.path().to_path_buf(), true, Arc::new(RunCounters::default()));
        let (first, _) = collect(&walker).await;
        let (second, _) = collect(&walker).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_task_fields() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "sub/Receipt.Jpeg");
        let walker = Walker::new(dir.path().to_path_buf(), true, Arc::new(RunCounters::default()));
        let (tx, mut rx) = mpsc::channel(4);
        walker.walk(tx, CancellationToken::new()).await.unwrap();

        let task = rx.recv().await.unwrap();
        assert_eq!(task.dir, dir.path().join("sub"));
        assert_eq!(task.basename, "Receipt");
        assert_eq!(task.format, crate::models::task::ImageFormat::Jpeg);
        assert_eq!(task.path(), dir.path().join("sub/Receipt.Jpeg"));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_full_channel() {
        let dir = tree();
        let walker = Walker::new(dir.path().to_path_buf(), true, Arc::new(RunCounters::default()));
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { walker.walk(tx, cancel).await })
        };

        // Take one task, leave the channel full, then cancel.
        assert!(rx.recv().await.is_some());
        cancel.cancel();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.end, WalkEnd::Aborted);
        assert!(summary.emitted < 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_directory_is_not_descended() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.png");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        let counters = Arc::new(RunCounters::default());
        let walker = Walker::new(dir.path().to_path_buf(), true, counters.clone());

        let (names, summary) = collect(&walker).await;
        assert_eq!(names, vec!["a.png"]);
        assert_eq!(summary.end, WalkEnd::Completed);
        // The link has no image extension, so it is an invalid file.
        assert_eq!(summary.invalid, 1);
        assert_eq!(counters.failed(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_walk_stops_counting_invalid_files() {
        let dir = tree();
        let counters = Arc::new(RunCounters::default());
        let walker = Walker::new(dir.path().to_path_buf(), true, counters.clone());
        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = walker.walk(tx, cancel).await.unwrap();
        assert_eq!(summary.end, WalkEnd::Aborted);
        assert_eq!(summary.emitted, 0);
        assert_eq!(summary.invalid, 0);
        assert_eq!(counters.failed(), 0);
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let walker = Walker::new(dir.path().join("missing"), true, Arc::new(RunCounters::default()));
        let (tx, _rx) = mpsc::channel(1);
        let result = walker.walk(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(WalkError::ReadDir { .. })));
    }
}
