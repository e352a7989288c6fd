use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, WatchpostError};

/// Longest camera identifier accepted at ingest.
pub const MAX_CAMERA_ID_LEN: usize = 64;

/// One labelled bounding box computed by an external detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        }
    }

    pub fn with_box(mut self, x: i32, y: i32, width: u32, height: u32) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }
}

/// A still image pushed by a camera, alive for one ingest cycle.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera: String,
    pub image: Bytes,
    pub detections: Vec<Detection>,
    pub received_at: DateTime<Utc>,
}

impl Frame {
    /// Surrounding whitespace is stripped from `camera`.
    pub fn new(camera: impl Into<String>, image: impl Into<Bytes>) -> Self {
        let camera = camera.into();
        let camera = if camera.trim().len() == camera.len() {
            camera
        } else {
            camera.trim().to_string()
        };
        Self {
            camera,
            image: image.into(),
            detections: Vec::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    /// Checks the frame is worth relaying. Empty payloads, blank or padded
    /// camera ids and malformed detections are rejected.
    pub fn validate(&self) -> Result<()> {
        let camera = self.camera.trim();
        if camera.is_empty() {
            return Err(invalid_frame("camera id is missing"));
        }
        if camera.len() != self.camera.len() {
            return Err(invalid_frame("camera id has surrounding whitespace"));
        }
        if camera.len() > MAX_CAMERA_ID_LEN {
            return Err(invalid_frame(format!(
                "camera id longer than {MAX_CAMERA_ID_LEN} bytes"
            )));
        }
        if self.image.is_empty() {
            return Err(invalid_frame("image payload is empty"));
        }
        for detection in &self.detections {
            if detection.label.trim().is_empty() {
                return Err(invalid_frame("detection label is blank"));
            }
            if !(0.0..=1.0).contains(&detection.confidence) {
                return Err(invalid_frame(format!(
                    "detection '{}' has confidence {} outside [0, 1]",
                    detection.label, detection.confidence
                )));
            }
        }
        Ok(())
    }

    /// Distinct detection labels in first-seen order.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for detection in &self.detections {
            if !labels.iter().any(|l| l == &detection.label) {
                labels.push(detection.label.clone());
            }
        }
        labels
    }
}

pub fn invalid_frame(message: impl Into<String>) -> WatchpostError {
    WatchpostError::InvalidFrame(message.into())
}
