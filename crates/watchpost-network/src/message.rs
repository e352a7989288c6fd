use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use watchpost_types::frame::{Detection, Frame};

/// A frame as delivered to viewers, stamped with its per-camera sequence.
#[derive(Debug)]
pub struct LiveFrame {
    pub camera: String,
    pub sequence: u64,
    pub image: Bytes,
    pub detections: Vec<Detection>,
    pub received_at: DateTime<Utc>,
    envelope: OnceLock<String>,
}

impl LiveFrame {
    pub fn new(frame: &Frame, sequence: u64) -> Self {
        Self {
            camera: frame.camera.clone(),
            sequence,
            image: frame.image.clone(),
            detections: frame.detections.clone(),
            received_at: frame.received_at,
            envelope: OnceLock::new(),
        }
    }

    /// JSON envelope pushed over the live feed. Encoded once and shared by
    /// every viewer.
    pub fn envelope(&self) -> &str {
        self.envelope.get_or_init(|| {
            let mut body = json!({
                "camera": self.camera,
                "image": STANDARD.encode(&self.image),
                "sequence": self.sequence,
            });
            if !self.detections.is_empty() {
                body["detections"] =
                    Value::Array(self.detections.iter().map(detection_json).collect());
            }
            body.to_string()
        })
    }
}

fn detection_json(detection: &Detection) -> Value {
    json!({
        "label": detection.label,
        "confidence": detection.confidence,
        "x": detection.x,
        "y": detection.y,
        "width": detection.width,
        "height": detection.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_base64_image_and_detections() {
        let frame = Frame::new("balkon", vec![0xFFu8, 0xD8, 0xFF, 0xD9])
            .with_detections(vec![Detection::new("person", 0.5).with_box(1, 2, 30, 40)]);
        let live = LiveFrame::new(&frame, 7);
        let parsed: Value = serde_json::from_str(live.envelope()).unwrap();
        assert_eq!(parsed["camera"], "balkon");
        assert_eq!(parsed["image"], "/9j/2Q==");
        assert_eq!(parsed["sequence"], 7);
        assert_eq!(parsed["detections"][0]["label"], "person");
        assert_eq!(parsed["detections"][0]["width"], 30);
    }

    #[test]
    fn envelope_omits_empty_detections() {
        let live = LiveFrame::new(&Frame::new("drzwi", vec![1u8]), 1);
        let parsed: Value = serde_json::from_str(live.envelope()).unwrap();
        assert!(parsed.get("detections").is_none());
    }
}
