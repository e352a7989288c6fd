//! Camera bookkeeping: who has sent frames, and when.

mod monitor;

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use tracing::info;

pub use monitor::LivenessMonitor;

/// Last relayed frame time per camera id. One entry per camera.
#[derive(Clone, Debug, Default)]
pub struct CameraRegistry {
    cameras: Arc<RwLock<BTreeMap<String, Option<DateTime<Utc>>>>>,
}

impl CameraRegistry {
    /// Registry pre-populated with configured cameras that have not sent
    /// anything yet.
    pub fn with_known<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cameras = known.into_iter().map(|id| (id.into(), None)).collect();
        Self {
            cameras: Arc::new(RwLock::new(cameras)),
        }
    }

    /// Records a relayed frame. Returns true the first time a camera is seen.
    pub fn record_frame(&self, camera: &str, at: DateTime<Utc>) -> bool {
        let mut cameras = self
            .cameras
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match cameras.get_mut(camera) {
            Some(last) => {
                let first = last.is_none();
                if last.map_or(true, |previous| previous < at) {
                    *last = Some(at);
                }
                first
            }
            None => {
                cameras.insert(camera.to_string(), Some(at));
                info!(camera, "new camera registered");
                true
            }
        }
    }

    pub fn last_frame_at(&self, camera: &str) -> Option<DateTime<Utc>> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera)
            .copied()
            .flatten()
    }

    pub fn contains(&self, camera: &str) -> bool {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(camera)
    }

    /// Cameras in id order with their last frame time.
    pub fn snapshot(&self) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, last)| (id.clone(), *last))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cameras
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn known_cameras_start_unseen() {
        let registry = CameraRegistry::with_known(["drzwi", "brama"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("drzwi"));
        assert_eq!(registry.last_frame_at("drzwi"), None);
    }

    #[test]
    fn later_frames_overwrite_single_entry() {
        let registry = CameraRegistry::default();
        let t0 = Utc::now();
        assert!(registry.record_frame("balkon", t0));
        assert!(!registry.record_frame("balkon", t0 + Duration::seconds(3)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.last_frame_at("balkon"),
            Some(t0 + Duration::seconds(3))
        );
    }

    #[test]
    fn out_of_order_timestamps_do_not_move_backwards() {
        let registry = CameraRegistry::default();
        let t0 = Utc::now();
        registry.record_frame("balkon", t0);
        registry.record_frame("balkon", t0 - Duration::seconds(5));
        assert_eq!(registry.last_frame_at("balkon"), Some(t0));
    }
}
