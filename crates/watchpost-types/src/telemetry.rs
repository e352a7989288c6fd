use serde::{Deserialize, Serialize};

/// Per-camera ingest counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CameraCounters {
    pub received: u64,
    pub rejected: u64,
    pub archive_queued: u64,
    pub archive_skipped: u64,
}
