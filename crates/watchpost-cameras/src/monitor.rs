use std::{
    collections::HashMap,
    future::Future,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::{stream::BoxStream, StreamExt};
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};
use watchpost_types::{camera::CameraStatus, config::LivenessConfig, events::StatusEvent};

use crate::CameraRegistry;

const EVENT_CAPACITY: usize = 64;

/// Derives per-camera active flags from the registry on a fixed period and
/// announces only the flips.
pub struct LivenessMonitor {
    registry: CameraRegistry,
    interval: Duration,
    stale_timeout: Duration,
    active: RwLock<HashMap<String, bool>>,
    events: broadcast::Sender<StatusEvent>,
}

impl LivenessMonitor {
    pub fn new(registry: CameraRegistry, config: &LivenessConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            interval: config.interval(),
            stale_timeout: config.stale_timeout(),
            active: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    /// One evaluation pass at `now`. Returns the status changes it emitted.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Vec<StatusEvent> {
        let mut changes = Vec::new();
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        for (camera, last_seen_at) in self.registry.snapshot() {
            let is_active = last_seen_at.is_some_and(|last| {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                elapsed < self.stale_timeout
            });
            let previous = active.insert(camera.clone(), is_active).unwrap_or(false);
            if previous != is_active {
                info!(camera = %camera, active = is_active, "camera status changed");
                changes.push(StatusEvent::new(CameraStatus {
                    camera,
                    active: is_active,
                    last_seen_at,
                }));
            }
        }
        drop(active);

        for event in &changes {
            // No subscribers is fine; statuses stay queryable.
            let _ = self.events.send(event.clone());
        }
        changes
    }

    /// Status as of the last evaluation. Unknown cameras are inactive.
    pub fn current_status(&self, camera: &str) -> CameraStatus {
        let active = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera)
            .copied()
            .unwrap_or(false);
        CameraStatus {
            camera: camera.to_string(),
            active,
            last_seen_at: self.registry.last_frame_at(camera),
        }
    }

    pub fn statuses(&self) -> Vec<CameraStatus> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        self.registry
            .snapshot()
            .into_iter()
            .map(|(camera, last_seen_at)| CameraStatus {
                active: active.get(&camera).copied().unwrap_or(false),
                camera,
                last_seen_at,
            })
            .collect()
    }

    pub fn subscribe(&self) -> BoxStream<'static, StatusEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| async move { event.ok() })
            .boxed()
    }

    /// Evaluates every interval until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            stale_timeout_ms = self.stale_timeout.as_millis() as u64,
            "liveness monitor started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let changes = self.evaluate(Utc::now());
                    debug!(changes = changes.len(), "liveness tick");
                }
            }
        }
        info!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn monitor(registry: CameraRegistry) -> LivenessMonitor {
        LivenessMonitor::new(
            registry,
            &LivenessConfig {
                interval_ms: 10,
                stale_timeout_ms: 10_000,
            },
        )
    }

    #[test]
    fn never_seen_camera_is_inactive_without_timestamp() {
        let monitor = monitor(CameraRegistry::with_known(["drzwi"]));
        assert!(monitor.evaluate(Utc::now()).is_empty());
        let status = monitor.current_status("drzwi");
        assert!(!status.active);
        assert_eq!(status.last_seen_at, None);
        assert_eq!(monitor.current_status("nowhere"), CameraStatus::unknown("nowhere"));
    }

    #[test]
    fn frame_flips_active_on_next_tick_and_staleness_flips_back() {
        let registry = CameraRegistry::with_known(["balkon"]);
        let monitor = monitor(registry.clone());
        let t0 = Utc::now();
        monitor.evaluate(t0);

        registry.record_frame("balkon", t0);
        assert!(!monitor.current_status("balkon").active);
        let changes = monitor.evaluate(t0 + ChronoDuration::seconds(1));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].status.active);
        assert!(monitor.current_status("balkon").active);

        assert!(monitor.evaluate(t0 + ChronoDuration::seconds(5)).is_empty());

        let changes = monitor.evaluate(t0 + ChronoDuration::seconds(10));
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].status.active);
        assert_eq!(changes[0].status.last_seen_at, Some(t0));
    }

    #[test]
    fn statuses_cover_every_known_camera() {
        let registry = CameraRegistry::with_known(["brama", "drzwi"]);
        let monitor = monitor(registry.clone());
        let now = Utc::now();
        registry.record_frame("drzwi", now);
        monitor.evaluate(now);
        let statuses = monitor.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].active);
        assert!(statuses[1].active);
    }

    #[tokio::test]
    async fn run_publishes_flips_to_subscribers() {
        let registry = CameraRegistry::default();
        let monitor = Arc::new(monitor(registry.clone()));
        let mut events = monitor.subscribe();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let runner = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                monitor
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        registry.record_frame("balkon", Utc::now());
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.next())
            .await
            .expect("status event in time")
            .expect("stream open");
        assert_eq!(event.status.camera, "balkon");
        assert!(event.status.active);

        stop_tx.send(()).expect("monitor still running");
        runner.await.expect("monitor task joins");
    }
}
