//! Orchestrates a run: walker → bounded worker pool → OCR → archive store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::run::{RunCounters, RunReport};
use crate::models::task::ImageTask;
use crate::services::imaging::{self, CompressSettings, ImagingError};
use crate::services::limiter::RateLimiter;
use crate::services::ocr::{OcrError, Recognizer};
use crate::services::storage::{ArchiveStore, StorageError, StoredRecord};
use crate::services::walker::{WalkEnd, Walker};

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub root: PathBuf,
    pub recursive: bool,
    pub max_concurrency: usize,
    pub channel_capacity: usize,
    pub compress: CompressSettings,
}

/// Everything one task needs, shared by all workers.
struct Worker {
    recognizer: Arc<dyn Recognizer>,
    store: Arc<ArchiveStore>,
    compress: CompressSettings,
}

pub struct Pipeline {
    worker: Arc<Worker>,
    limiter: Arc<dyn RateLimiter>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        store: Arc<ArchiveStore>,
        limiter: Arc<dyn RateLimiter>,
        settings: PipelineSettings,
    ) -> Self {
        let worker = Arc::new(Worker {
            recognizer,
            store,
            compress: settings.compress,
        });
        Self {
            worker,
            limiter,
            settings,
        }
    }

    /// Process every image under the configured root.
    ///
    /// `cancel` is raised by the pipeline itself when the OCR circuit opens and may
    /// be raised from outside (e.g. Ctrl-C). Either way admission stops, the walker
    /// aborts and tasks already admitted run to completion before the report.
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        let counters = Arc::new(RunCounters::default());
        let (tx, mut rx) = mpsc::channel::<ImageTask>(self.settings.channel_capacity.max(1));

        let walker = Walker::new(
            self.settings.root.clone(),
            self.settings.recursive,
            counters.clone(),
        );
        let walk_handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { walker.walk(tx, cancel).await })
        };

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut workers = JoinSet::new();

        info!(
            root = %self.settings.root.display(),
            max_concurrency = self.settings.max_concurrency,
            "Run started"
        );

        loop {
            let task = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(task) => task,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.limiter.acquire() => {}
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = self.worker.clone();
            let counters = counters.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let path = task.path();
                let started = Instant::now();
                match worker.process(&task).await {
                    Ok(stored) => {
                        counters.record_success();
                        info!(
                            path = %path.display(),
                            output = %stored.path.display(),
                            id = stored.id,
                            "Image archived"
                        );
                    }
                    Err(e) => {
                        counters.record_failure();
                        error!(path = %path.display(), error = %e, "Image failed");
                        if e.is_circuit_open() && !cancel.is_cancelled() {
                            warn!("Too many consecutive OCR failures, no new images will be admitted");
                            cancel.cancel();
                        }
                    }
                }
                metrics::histogram!("ocr_archive_task_seconds").record(started.elapsed().as_secs_f64());
                drop(permit);
            });
        }

        // Unblocks a walker parked on a full channel.
        drop(rx);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                counters.record_failure();
                error!(error = %e, "Worker task panicked");
            }
        }

        let mut traversal_error = None;
        let mut aborted = cancel.is_cancelled();
        match walk_handle.await {
            Ok(Ok(summary)) => {
                if summary.end == WalkEnd::Aborted {
                    aborted = true;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Directory walk aborted");
                traversal_error = Some(e.to_string());
            }
            Err(e) => {
                error!(error = %e, "Walker task panicked");
                traversal_error = Some(e.to_string());
            }
        }

        let report = RunReport {
            succeeded: counters.succeeded(),
            failed: counters.failed(),
            cancelled: aborted,
            traversal_error,
        };
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "Run finished"
        );
        report
    }
}

impl Worker {
    /// load → resize → compress → recognize → persist → delete original.
    async fn process(&self, task: &ImageTask) -> Result<StoredRecord, TaskError> {
        let source = task.path();
        let raw = tokio::fs::read(&source)
            .await
            .map_err(|e| TaskError::Read {
                path: source.clone(),
                source: e,
            })?;

        let format = task.format;
        let settings = self.compress;
        let compressed =
            tokio::task::spawn_blocking(move || imaging::shrink(&raw, format, settings)).await??;

        let text = self.recognizer.recognize(&compressed).await?;
        let stored = self.store.commit(task, &compressed, &text).await?;

        tokio::fs::remove_file(&source)
            .await
            .map_err(|e| TaskError::RemoveOriginal {
                path: source,
                source: e,
            })?;

        Ok(stored)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("Image worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The record is committed but the source file is still on disk.
    #[error("Archived but failed to remove original {}: {source}", path.display())]
    RemoveOriginal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, TaskError::Ocr(e) if e.is_circuit_open())
    }
}
