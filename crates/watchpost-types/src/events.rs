use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::camera::CameraStatus;

/// Notification emitted when a camera's active flag flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: CameraStatus,
}

impl StatusEvent {
    pub fn new(status: CameraStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status,
        }
    }
}
