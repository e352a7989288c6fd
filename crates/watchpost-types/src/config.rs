use std::{collections::HashSet, fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, WatchpostError};

/// A camera known ahead of time. `address` maps UDP senders to the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraEndpoint {
    pub id: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub http_port: u16,
    pub udp_port: Option<u16>,
    pub udp_max_frame_bytes: usize,
    /// URL prefix under which archived files are served.
    pub images_route: String,
    pub cameras: Vec<CameraEndpoint>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            http_port: 8080,
            udp_port: None,
            udp_max_frame_bytes: 4 * 1024 * 1024,
            images_route: "/images".into(),
            cameras: vec![
                CameraEndpoint {
                    id: "drzwi".into(),
                    address: Some("192.168.1.32".into()),
                },
                CameraEndpoint {
                    id: "brama".into(),
                    address: Some("192.168.1.29".into()),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Frames buffered per viewer before the oldest are replaced.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub interval_ms: u64,
    pub stale_timeout_ms: u64,
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            stale_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub directory: String,
    pub max_size_bytes: u64,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: "static/images".into(),
            max_size_bytes: 2 * 1024 * 1024 * 1024,
            default_page_size: 24,
            max_page_size: 200,
        }
    }
}

/// Which accepted frames are copied into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ArchivePolicy {
    Never,
    Always,
    #[default]
    WithDetections,
    EveryNth {
        n: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub policy: ArchivePolicy,
    /// Archived frames allowed per camera within one throttle window.
    pub throttle_burst: u32,
    pub throttle_window_ms: u64,
    /// Pending archive writes before new ones are skipped.
    pub writer_queue: usize,
}

impl IntakeConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            policy: ArchivePolicy::default(),
            throttle_burst: 10,
            throttle_window_ms: 30_000,
            writer_queue: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchpostConfig {
    pub server: ServerConfig,
    pub hub: HubConfig,
    pub liveness: LivenessConfig,
    pub archive: ArchiveConfig,
    pub intake: IntakeConfig,
    pub ops: OpsConfig,
}

impl WatchpostConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            WatchpostError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            WatchpostError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            return Err(config_error("server.http_port must be a valid port (>0)"));
        }
        if self.server.udp_port == Some(0) {
            return Err(config_error("server.udp_port must be a valid port (>0)"));
        }
        if self.server.udp_max_frame_bytes == 0 {
            return Err(config_error(
                "server.udp_max_frame_bytes must be greater than zero",
            ));
        }
        if !self.server.images_route.starts_with('/') || self.server.images_route.len() < 2 {
            return Err(config_error(
                "server.images_route must start with '/' and name a path segment",
            ));
        }
        let mut seen = HashSet::new();
        for camera in &self.server.cameras {
            if camera.id.trim().is_empty() {
                return Err(config_error("server.cameras entries need a non-empty id"));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(config_error(format!(
                    "server.cameras lists '{}' more than once",
                    camera.id
                )));
            }
        }
        if self.hub.queue_capacity == 0 {
            return Err(config_error("hub.queue_capacity must be greater than zero"));
        }
        if self.liveness.interval_ms == 0 {
            return Err(config_error("liveness.interval_ms must be greater than zero"));
        }
        if self.liveness.stale_timeout_ms == 0 {
            return Err(config_error(
                "liveness.stale_timeout_ms must be greater than zero",
            ));
        }
        if self.archive.max_size_bytes == 0 {
            return Err(config_error("archive.max_size_bytes must be greater than zero"));
        }
        if self.archive.max_page_size == 0
            || self.archive.default_page_size == 0
            || self.archive.default_page_size > self.archive.max_page_size
        {
            return Err(config_error(
                "archive.default_page_size must be between 1 and archive.max_page_size",
            ));
        }
        if let ArchivePolicy::EveryNth { n: 0 } = self.intake.policy {
            return Err(config_error("intake.policy every_nth needs n > 0"));
        }
        if self.intake.throttle_burst == 0 || self.intake.throttle_window_ms == 0 {
            return Err(config_error(
                "intake.throttle_burst and intake.throttle_window_ms must be greater than zero",
            ));
        }
        if self.intake.writer_queue == 0 {
            return Err(config_error("intake.writer_queue must be greater than zero"));
        }
        Ok(())
    }

    /// Camera id registered for a UDP source address, if any.
    pub fn camera_for_address(&self, address: &str) -> Option<&str> {
        self.server
            .cameras
            .iter()
            .find(|c| c.address.as_deref() == Some(address))
            .map(|c| c.id.as_str())
    }
}

fn config_error(message: impl Into<String>) -> WatchpostError {
    WatchpostError::Configuration(message.into())
}
