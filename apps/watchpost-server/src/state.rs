use std::sync::Arc;

use watchpost_archive::PictureArchive;
use watchpost_cameras::{CameraRegistry, LivenessMonitor};
use watchpost_intake::FrameIntake;
use watchpost_network::BroadcastHub;
use watchpost_ops::IngestCounters;
use watchpost_types::{config::WatchpostConfig, Result};

pub type Intake = FrameIntake<BroadcastHub, PictureArchive>;

/// Everything the HTTP and UDP surfaces share.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WatchpostConfig>,
    pub hub: BroadcastHub,
    pub archive: Arc<PictureArchive>,
    pub intake: Arc<Intake>,
    pub monitor: Arc<LivenessMonitor>,
    pub counters: IngestCounters,
}

impl AppState {
    /// Opens the archive and wires the components. Spawns the archive
    /// writer, so it must run inside the tokio runtime.
    pub async fn build(config: WatchpostConfig) -> Result<Self> {
        let registry =
            CameraRegistry::with_known(config.server.cameras.iter().map(|c| c.id.clone()));
        let hub = BroadcastHub::new(config.hub.queue_capacity);
        let archive = Arc::new(PictureArchive::open(&config.archive).await?);
        let counters = IngestCounters::new();
        let monitor = Arc::new(LivenessMonitor::new(registry.clone(), &config.liveness));
        let intake = Arc::new(FrameIntake::new(
            &config.intake,
            hub.clone(),
            archive.clone(),
            registry,
            counters.clone(),
        ));
        Ok(Self {
            config: Arc::new(config),
            hub,
            archive,
            intake,
            monitor,
            counters,
        })
    }
}
