use crate::config::StorageConfig;
use crate::services::storage::{StorageRoots, remove_file_if_exists};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Removes staged uploads and delete backups that no operation finished.
///
/// `reset()` leaves staged uploads in the temp root, and a crash between
/// commit and `finish()` leaves backups behind; both age out here.
pub struct BackgroundWorker {
    roots: Arc<StorageRoots>,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        roots: Arc<StorageRoots>,
        config: &StorageConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            roots,
            max_age: Duration::from_secs(config.temp_cleanup_age_hours * 3600),
            interval: Duration::from_secs(config.temp_cleanup_interval_secs),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        tracing::info!("🧹 Sweeping temp root {:?}...", self.roots.temp_root());

        match self.sweep_temp_root(SystemTime::now()).await {
            Ok(removed) => tracing::info!("✅ Temp sweep completed, {} file(s) removed", removed),
            Err(e) => tracing::error!("Temp sweep failed: {}", e),
        }
    }

    /// Deletes regular files in the temp root last modified before `now - max_age`.
    pub async fn sweep_temp_root(&self, now: SystemTime) -> std::io::Result<usize> {
        let temp_root = self.roots.temp_root();
        if !tokio::fs::try_exists(temp_root).await? {
            return Ok(0);
        }

        let Some(cutoff) = now.checked_sub(self.max_age) else {
            return Ok(0);
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(temp_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Finished by its operation in the meantime
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified()?;
            if modified < cutoff {
                tracing::debug!("Removing stale temp file {:?}", entry.path());
                remove_file_if_exists(&entry.path()).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
