//! Operational helpers: logging, directory preparation, ingest counters.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};
use watchpost_types::{config::OpsConfig, telemetry::CameraCounters, Result, WatchpostError};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| WatchpostError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| WatchpostError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_directory(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir).map_err(|err| WatchpostError::storage(&dir, err))?;
    info!(directory = %dir.display(), "directory ready");
    Ok(dir)
}

/// Counters for one camera plus the totals across all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub total: CameraCounters,
    pub cameras: BTreeMap<String, CameraCounters>,
}

/// Per-camera ingest counters shared by every intake path.
#[derive(Clone, Default)]
pub struct IngestCounters {
    cameras: Arc<Mutex<BTreeMap<String, CameraCounters>>>,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, camera: &str, apply: impl FnOnce(&mut CameraCounters)) {
        let mut cameras = self.cameras.lock().await;
        match cameras.get_mut(camera) {
            Some(counters) => apply(counters),
            None => apply(cameras.entry(camera.to_string()).or_default()),
        }
    }

    pub async fn record_received(&self, camera: &str) {
        self.update(camera, |c| c.received += 1).await;
    }

    pub async fn record_rejected(&self, camera: &str) {
        self.update(camera, |c| c.rejected += 1).await;
    }

    pub async fn record_archive_queued(&self, camera: &str) {
        self.update(camera, |c| c.archive_queued += 1).await;
    }

    pub async fn record_archive_skipped(&self, camera: &str) {
        self.update(camera, |c| c.archive_skipped += 1).await;
    }

    pub async fn camera(&self, camera: &str) -> CameraCounters {
        self.cameras
            .lock()
            .await
            .get(camera)
            .copied()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> CountersSnapshot {
        let cameras = self.cameras.lock().await.clone();
        let total = cameras
            .values()
            .fold(CameraCounters::default(), |mut total, c| {
                total.received += c.received;
                total.rejected += c.rejected;
                total.archive_queued += c.archive_queued;
                total.archive_skipped += c.archive_skipped;
                total
            });
        CountersSnapshot { total, cameras }
    }
}
