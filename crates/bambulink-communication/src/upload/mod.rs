//! Upload bridge
//!
//! Moves a file from the host to the printer storage on a dedicated thread.
//! The host learns the outcome through a callback triple: `started` fires
//! before `upload` returns, then exactly one of `succeeded` or `failed`
//! fires with the elapsed time. Failed uploads are not retried.

pub mod storage;

pub use storage::{assign_short_names, is_printable, LocalDirStorage, RemoteStorage, SdFile};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bambulink_core::UploadError;

/// `(local name, remote name)`
pub type UploadStarted = Box<dyn FnOnce(&str, &str) + Send>;
/// `(local name, remote name, elapsed)`
pub type UploadFinished = Box<dyn FnOnce(&str, &str, Duration) + Send>;

/// Callbacks reporting an upload's progress to the host
pub struct UploadCallbacks {
    /// Called synchronously when the upload is accepted
    pub started: UploadStarted,
    /// Called once on success
    pub succeeded: UploadFinished,
    /// Called once on failure
    pub failed: UploadFinished,
}

impl UploadCallbacks {
    /// Create a callback triple
    pub fn new<S, OK, ERR>(started: S, succeeded: OK, failed: ERR) -> Self
    where
        S: FnOnce(&str, &str) + Send + 'static,
        OK: FnOnce(&str, &str, Duration) + Send + 'static,
        ERR: FnOnce(&str, &str, Duration) + Send + 'static,
    {
        Self {
            started: Box::new(started),
            succeeded: Box::new(succeeded),
            failed: Box::new(failed),
        }
    }
}

/// Terminal outcome of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The file is on the printer
    Succeeded {
        /// Time spent transferring.
        elapsed: Duration,
    },
    /// The transfer failed
    Failed {
        /// Why the transfer failed.
        error: UploadError,
        /// Time spent before failing.
        elapsed: Duration,
    },
}

/// One upload request
struct UploadTask {
    filename: String,
    local_path: PathBuf,
    succeeded: UploadFinished,
    failed: UploadFinished,
}

impl UploadTask {
    fn run(self, storage: &dyn RemoteStorage) -> UploadOutcome {
        let started_at = Instant::now();
        tracing::debug!(
            "Uploading {} as {}",
            self.local_path.display(),
            self.filename
        );

        let result = storage.upload_file(&self.local_path, &self.filename);
        let elapsed = started_at.elapsed();

        match result {
            Ok(()) => {
                tracing::info!("Uploaded {} in {:.1}s", self.filename, elapsed.as_secs_f64());
                (self.succeeded)(&self.filename, &self.filename, elapsed);
                UploadOutcome::Succeeded { elapsed }
            }
            Err(error) => {
                tracing::error!("Upload of {} failed: {}", self.filename, error);
                (self.failed)(&self.filename, &self.filename, elapsed);
                UploadOutcome::Failed { error, elapsed }
            }
        }
    }
}

/// Handle to a running upload
pub struct UploadHandle {
    remote_name: String,
    worker: JoinHandle<UploadOutcome>,
}

impl UploadHandle {
    /// Name the file will have on the printer
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Wait for the upload to finish
    pub fn join(self) -> UploadOutcome {
        match self.worker.join() {
            Ok(outcome) => outcome,
            Err(_) => UploadOutcome::Failed {
                error: UploadError::Storage {
                    reason: "upload worker panicked".to_string(),
                },
                elapsed: Duration::ZERO,
            },
        }
    }
}

/// Uploads files to a [`RemoteStorage`]
#[derive(Clone)]
pub struct UploadBridge {
    storage: Arc<dyn RemoteStorage>,
}

impl UploadBridge {
    /// Create a bridge over a storage backend
    pub fn new(storage: Arc<dyn RemoteStorage>) -> Self {
        Self { storage }
    }

    /// Start uploading `local_path` as `filename`
    ///
    /// Rejects files the printer cannot start before any callback runs.
    /// Otherwise `started` has fired when this returns and the transfer
    /// continues in the background.
    pub fn upload(
        &self,
        filename: &str,
        local_path: &Path,
        callbacks: UploadCallbacks,
    ) -> Result<UploadHandle, UploadError> {
        let filename = filename.trim().trim_start_matches('/').to_string();
        if !is_printable(&filename) {
            return Err(UploadError::UnsupportedFileType { filename });
        }

        (callbacks.started)(&filename, &filename);

        let task = UploadTask {
            filename: filename.clone(),
            local_path: local_path.to_path_buf(),
            succeeded: callbacks.succeeded,
            failed: callbacks.failed,
        };
        let storage = Arc::clone(&self.storage);

        let worker = std::thread::Builder::new()
            .name("bambulink-upload".to_string())
            .spawn(move || task.run(storage.as_ref()))
            .map_err(|e| UploadError::Storage {
                reason: format!("failed to start upload worker: {}", e),
            })?;

        Ok(UploadHandle {
            remote_name: filename,
            worker,
        })
    }

    /// Storage backend
    pub fn storage(&self) -> &Arc<dyn RemoteStorage> {
        &self.storage
    }
}
