//! Lenient parsing of listing and ingest parameters. Malformed values are
//! ignored rather than rejected, the way browser form inputs expect.

use axum::http::HeaderValue;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use watchpost_intake::ArchiveMode;
use watchpost_types::{
    frame::{invalid_frame, Detection},
    picture::PictureFilter,
    Result,
};

pub const DETECTIONS_HEADER: &str = "x-detections";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PictureParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub camera: Option<String>,
    pub object: Option<String>,
    pub date_after: Option<String>,
    pub date_before: Option<String>,
    pub time_after: Option<String>,
    pub time_before: Option<String>,
}

impl PictureParams {
    pub fn page(&self) -> usize {
        positive_or(self.page.as_deref(), 1)
    }

    pub fn limit(&self, default: usize) -> usize {
        positive_or(self.limit.as_deref(), default)
    }

    pub fn filter(&self) -> PictureFilter {
        PictureFilter {
            camera: non_blank(self.camera.as_deref()),
            object: non_blank(self.object.as_deref()),
            date_after: self.date_after.as_deref().and_then(parse_date),
            date_before: self.date_before.as_deref().and_then(parse_date),
            time_after: self.time_after.as_deref().and_then(parse_time),
            time_before: self.time_before.as_deref().and_then(parse_time),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameParams {
    pub archive: Option<ArchiveMode>,
}

fn positive_or(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Detections attached to an HTTP frame upload as a JSON array header.
pub fn detections_header(value: Option<&HeaderValue>) -> Result<Vec<Detection>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let raw = value
        .to_str()
        .map_err(|_| invalid_frame(format!("{DETECTIONS_HEADER} is not valid text")))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|err| invalid_frame(format!("{DETECTIONS_HEADER} is not a detection list: {err}")))
}
