//! Frame intake: validate, relay live, then hand selected frames to the
//! archive without waiting on viewers or on disk.

mod policy;
mod writer;

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};
use watchpost_archive::PictureStore;
use watchpost_cameras::CameraRegistry;
use watchpost_network::LiveBroadcaster;
use watchpost_ops::IngestCounters;
use watchpost_types::{
    config::IntakeConfig,
    frame::{Detection, Frame},
    picture::NewPicture,
    Result,
};

pub use policy::ArchiveMode;

use policy::{ArchiveSelector, Decision};
use writer::{ArchiveWriter, Rejected};

/// Receipt for an accepted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub sequence: u64,
    /// Viewers the frame was queued for.
    pub viewers: usize,
    /// Whether a copy was queued for the archive.
    pub archived: bool,
}

pub struct FrameIntake<B, S>
where
    B: LiveBroadcaster,
    S: PictureStore + 'static,
{
    hub: B,
    registry: CameraRegistry,
    counters: IngestCounters,
    selector: ArchiveSelector,
    writer: ArchiveWriter,
    store: Arc<S>,
}

impl<B, S> FrameIntake<B, S>
where
    B: LiveBroadcaster,
    S: PictureStore + 'static,
{
    /// Spawns the archive writer, so this needs a running tokio runtime.
    pub fn new(
        config: &IntakeConfig,
        hub: B,
        store: Arc<S>,
        registry: CameraRegistry,
        counters: IngestCounters,
    ) -> Self {
        Self {
            writer: ArchiveWriter::spawn(store.clone(), config.writer_queue),
            selector: ArchiveSelector::new(config),
            hub,
            registry,
            counters,
            store,
        }
    }

    pub fn hub(&self) -> &B {
        &self.hub
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    pub fn counters(&self) -> &IngestCounters {
        &self.counters
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn submit(
        &self,
        camera: impl Into<String>,
        image: impl Into<Bytes>,
        detections: Vec<Detection>,
    ) -> Result<Accepted> {
        let frame = Frame::new(camera, image).with_detections(detections);
        self.submit_with(frame, ArchiveMode::Policy).await
    }

    /// Validates and relays one frame. The broadcast always happens before
    /// the archive copy is queued and is never undone by archive trouble.
    pub async fn submit_with(&self, frame: Frame, mode: ArchiveMode) -> Result<Accepted> {
        if let Err(err) = frame.validate() {
            warn!(camera = %frame.camera, error = %err, "rejected frame");
            self.counters.record_rejected(frame.camera.trim()).await;
            return Err(err);
        }

        self.registry.record_frame(&frame.camera, frame.received_at);
        let receipt = self.hub.publish(&frame);
        self.counters.record_received(&frame.camera).await;

        let archived = match self.selector.decide(&frame, mode, Instant::now()) {
            Decision::NotSelected => false,
            Decision::Throttled => {
                debug!(camera = %frame.camera, "archive throttled");
                self.counters.record_archive_skipped(&frame.camera).await;
                false
            }
            Decision::Archive => self.queue_archive(&frame).await,
        };

        Ok(Accepted {
            sequence: receipt.sequence,
            viewers: receipt.delivered,
            archived,
        })
    }

    async fn queue_archive(&self, frame: &Frame) -> bool {
        let picture = NewPicture {
            camera: frame.camera.clone(),
            captured_at: frame.received_at.with_timezone(&Local).naive_local(),
            labels: frame.labels(),
            data: frame.image.clone(),
        };
        match self.writer.enqueue(picture) {
            Ok(()) => {
                self.counters.record_archive_queued(&frame.camera).await;
                true
            }
            Err(Rejected::Full) => {
                warn!(camera = %frame.camera, "archive queue full, skipping archive copy");
                self.counters.record_archive_skipped(&frame.camera).await;
                false
            }
            Err(Rejected::Closed) => {
                debug!(camera = %frame.camera, "archive writer closed");
                self.counters.record_archive_skipped(&frame.camera).await;
                false
            }
        }
    }

    /// Drains pending archive writes. Frames submitted afterwards are still
    /// relayed live but no longer archived.
    pub async fn close(&self) {
        self.writer.close().await;
    }
}
