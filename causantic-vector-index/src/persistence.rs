//! Background flush loop for the packed vector index: periodically
//! writes in-memory state to disk when dirty, the same shape the
//! teacher crate used to drain its redb write buffer on an interval,
//! just swapped to plain file writes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::error;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for the background persistence task.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    path: PathBuf,
    interval: Duration,
}

impl PersistenceConfig {
    /// Builds a config pointing at `path` with the default flush interval.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), interval: DEFAULT_INTERVAL }
    }

    /// Overrides the default flush interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Owns the background flush task for one packed vector index file.
/// Dropping the manager aborts the task; callers that want a guaranteed
/// final flush must call [`Self::stop_background_task`] after an
/// explicit flush.
pub struct PersistenceManager {
    config: PersistenceConfig,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PersistenceManager {
    #[must_use]
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config, handle: Mutex::new(None) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Spawns a loop that calls `flush` on the configured interval
    /// whenever `was_dirty` reports changes since the last flush.
    /// Replaces any previously running task.
    pub fn start_background_task<F, D>(&self, flush: F, was_dirty: D)
    where
        F: Fn() -> std::io::Result<()> + Send + Sync + 'static,
        D: Fn() -> bool + Send + Sync + 'static,
    {
        self.stop_background_task();
        let interval = self.config.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if was_dirty() {
                    let result = tokio::task::block_in_place(&flush);
                    if let Err(e) = result {
                        error!("background vector index flush failed: {e}");
                    }
                }
            }
        });
        *self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Aborts the running background task, if any.
    pub fn stop_background_task(&self) {
        if let Some(handle) =
            self.handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
        {
            handle.abort();
        }
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        self.stop_background_task();
    }
}
