use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pull-based view of a camera's liveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatus {
    pub camera: String,
    pub active: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl CameraStatus {
    pub fn unknown(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            active: false,
            last_seen_at: None,
        }
    }
}
