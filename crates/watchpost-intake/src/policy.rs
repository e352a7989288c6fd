use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use watchpost_types::{
    config::{ArchivePolicy, IntakeConfig},
    frame::Frame,
};

/// Per-submission override of the configured archive policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    #[default]
    Policy,
    /// Archive regardless of policy and throttle.
    Force,
    Skip,
}

/// Outcome of the archive decision for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Archive,
    NotSelected,
    Throttled,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

/// Fixed-window limiter: at most `burst` archived frames per camera per window.
#[derive(Debug)]
pub(crate) struct ArchiveThrottle {
    burst: u32,
    window: Duration,
    cameras: Mutex<HashMap<String, Window>>,
}

impl ArchiveThrottle {
    pub(crate) fn new(burst: u32, window: Duration) -> Self {
        Self {
            burst: burst.max(1),
            window,
            cameras: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn allow(&self, camera: &str, now: Instant) -> bool {
        let mut cameras = self.cameras.lock().unwrap_or_else(PoisonError::into_inner);
        let window = cameras.entry(camera.to_string()).or_insert(Window {
            started: now,
            used: 0,
        });
        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.used = 0;
        }
        if window.used < self.burst {
            window.used += 1;
            true
        } else {
            false
        }
    }
}

/// Applies the archive policy, the per-camera frame counter for
/// `every_nth`, and the throttle.
#[derive(Debug)]
pub(crate) struct ArchiveSelector {
    policy: ArchivePolicy,
    frames: Mutex<HashMap<String, u64>>,
    throttle: ArchiveThrottle,
}

impl ArchiveSelector {
    pub(crate) fn new(config: &IntakeConfig) -> Self {
        Self {
            policy: config.policy,
            frames: Mutex::new(HashMap::new()),
            throttle: ArchiveThrottle::new(config.throttle_burst, config.throttle_window()),
        }
    }

    pub(crate) fn decide(&self, frame: &Frame, mode: ArchiveMode, now: Instant) -> Decision {
        let count = {
            let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let count = frames.entry(frame.camera.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let selected = match mode {
            ArchiveMode::Force => return Decision::Archive,
            ArchiveMode::Skip => false,
            ArchiveMode::Policy => match self.policy {
                ArchivePolicy::Never => false,
                ArchivePolicy::Always => true,
                ArchivePolicy::WithDetections => !frame.detections.is_empty(),
                ArchivePolicy::EveryNth { n } => count % u64::from(n.max(1)) == 0,
            },
        };
        if !selected {
            Decision::NotSelected
        } else if self.throttle.allow(&frame.camera, now) {
            Decision::Archive
        } else {
            Decision::Throttled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_types::frame::Detection;

    fn config(policy: ArchivePolicy) -> IntakeConfig {
        IntakeConfig {
            policy,
            throttle_burst: 2,
            throttle_window_ms: 1_000,
            ..IntakeConfig::default()
        }
    }

    fn frame(camera: &str) -> Frame {
        Frame::new(camera, vec![0xFFu8, 0xD8])
    }

    #[test]
    fn throttle_resets_after_window() {
        let throttle = ArchiveThrottle::new(2, Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(throttle.allow("balkon", t0));
        assert!(throttle.allow("balkon", t0));
        assert!(!throttle.allow("balkon", t0 + Duration::from_secs(29)));
        assert!(throttle.allow("drzwi", t0));
        assert!(throttle.allow("balkon", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn with_detections_needs_a_detection() {
        let selector = ArchiveSelector::new(&config(ArchivePolicy::WithDetections));
        let now = Instant::now();
        assert_eq!(
            selector.decide(&frame("balkon"), ArchiveMode::Policy, now),
            Decision::NotSelected
        );
        let detected = frame("balkon").with_detections(vec![Detection::new("person", 0.8)]);
        assert_eq!(
            selector.decide(&detected, ArchiveMode::Policy, now),
            Decision::Archive
        );
        assert_eq!(
            selector.decide(&detected, ArchiveMode::Skip, now),
            Decision::NotSelected
        );
    }

    #[test]
    fn every_nth_counts_per_camera() {
        let selector = ArchiveSelector::new(&config(ArchivePolicy::EveryNth { n: 3 }));
        let now = Instant::now();
        let picks: Vec<_> = (0..6)
            .map(|_| selector.decide(&frame("brama"), ArchiveMode::Policy, now))
            .collect();
        assert_eq!(picks[2], Decision::Archive);
        assert_eq!(picks[5], Decision::Archive);
        assert_eq!(
            picks.iter().filter(|d| **d == Decision::NotSelected).count(),
            4
        );
        assert_eq!(
            selector.decide(&frame("drzwi"), ArchiveMode::Policy, now),
            Decision::NotSelected
        );
    }

    #[test]
    fn force_bypasses_policy_and_throttle() {
        let selector = ArchiveSelector::new(&config(ArchivePolicy::Always));
        let now = Instant::now();
        assert_eq!(selector.decide(&frame("balkon"), ArchiveMode::Policy, now), Decision::Archive);
        assert_eq!(selector.decide(&frame("balkon"), ArchiveMode::Policy, now), Decision::Archive);
        assert_eq!(selector.decide(&frame("balkon"), ArchiveMode::Policy, now), Decision::Throttled);
        assert_eq!(selector.decide(&frame("balkon"), ArchiveMode::Force, now), Decision::Archive);

        let never = ArchiveSelector::new(&config(ArchivePolicy::Never));
        assert_eq!(never.decide(&frame("balkon"), ArchiveMode::Force, now), Decision::Archive);
        assert_eq!(never.decide(&frame("balkon"), ArchiveMode::Policy, now), Decision::NotSelected);
    }
}
