use crate::services::chunk::ChunkAssembler;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes staging files of chunked uploads that were abandoned
/// before their final part arrived.
pub struct StagingJanitor {
    assembler: Arc<ChunkAssembler>,
    retention: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingJanitor {
    pub fn new(
        assembler: Arc<ChunkAssembler>,
        retention: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            assembler,
            retention,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            "🚀 Staging janitor started (retention {:?}, every {:?})",
            self.retention,
            self.interval
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging janitor shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    pub async fn sweep(&self) -> usize {
        match self.assembler.sweep_stale(self.retention).await {
            Ok(0) => 0,
            Ok(removed) => {
                tracing::info!("🧹 Removed {} abandoned staging file(s)", removed);
                removed
            }
            Err(e) => {
                tracing::error!(
                    "Failed to sweep staging directory {}: {}",
                    self.assembler.staging_dir().display(),
                    e
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FolderKey;
    use crate::services::chunk::{NameOptions, PartHeaders, PartOutcome};

    #[tokio::test]
    async fn test_sweep_removes_abandoned_upload() {
        let root = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let assembler = Arc::new(ChunkAssembler::new(root.path(), staging.path()));

        let key = FolderKey::parse("videos").unwrap();
        let part = PartHeaders::new("abandoned", 0, 3, 4);
        let outcome = assembler
            .append_part(&key, &part, b"abcd", &NameOptions::default())
            .await;
        assert!(matches!(outcome, PartOutcome::Accepted { parts_received: 1 }));

        sleep(Duration::from_millis(50)).await;
        let (_tx, rx) = watch::channel(false);
        let janitor = StagingJanitor::new(assembler.clone(), Duration::from_millis(1), Duration::from_secs(60), rx);

        assert_eq!(janitor.sweep().await, 1);
        assert!(!assembler.staging_path("abandoned").exists());
        assert!(assembler.session("abandoned").is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let assembler = Arc::new(ChunkAssembler::new(root.path(), root.path().join("staging")));

        let (tx, rx) = watch::channel(false);
        let janitor = StagingJanitor::new(assembler, Duration::from_secs(3600), Duration::from_secs(3600), rx);
        let handle = tokio::spawn(janitor.run());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("janitor did not stop")
            .unwrap();
    }
}
