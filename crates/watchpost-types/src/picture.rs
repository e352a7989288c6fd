use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize, Serializer};

/// Bytes in one GiB, used when quotas are shown to people.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Metadata record of one archived picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Picture {
    pub filename: String,
    pub camera: String,
    /// Local wall-clock capture time.
    pub captured_at: NaiveDateTime,
    #[serde(default)]
    pub labels: Vec<String>,
    pub size: u64,
}

impl Picture {
    pub fn date(&self) -> NaiveDate {
        self.captured_at.date()
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.captured_at.time()
    }

    pub fn has_label(&self, wanted: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(wanted))
    }

    pub fn summary(&self) -> PictureSummary {
        PictureSummary {
            name: self.filename.clone(),
            camera: self.camera.clone(),
            date: self.date(),
            time_of_day: self.time_of_day(),
            objects: self.labels.clone(),
            size: self.size,
        }
    }
}

/// A picture waiting to be written into the archive.
#[derive(Debug, Clone)]
pub struct NewPicture {
    pub camera: String,
    pub captured_at: NaiveDateTime,
    pub labels: Vec<String>,
    pub data: Bytes,
}

/// Listing entry returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PictureSummary {
    pub name: String,
    pub camera: String,
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_hour_minute")]
    pub time_of_day: NaiveTime,
    pub objects: Vec<String>,
    pub size: u64,
}

fn serialize_hour_minute<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format("%H:%M").to_string())
}

/// Optional listing filters. `None` means the field is not applied.
///
/// Every provided field must match. Date bounds are inclusive. Time bounds
/// are inclusive and compared at minute precision, so a window whose start
/// is later than its end (`22:00..06:00`) matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PictureFilter {
    pub camera: Option<String>,
    pub object: Option<String>,
    pub date_after: Option<NaiveDate>,
    pub date_before: Option<NaiveDate>,
    pub time_after: Option<NaiveTime>,
    pub time_before: Option<NaiveTime>,
}

impl PictureFilter {
    pub fn camera(mut self, camera: impl Into<String>) -> Self {
        self.camera = Some(camera.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn dates(mut self, after: Option<NaiveDate>, before: Option<NaiveDate>) -> Self {
        self.date_after = after;
        self.date_before = before;
        self
    }

    pub fn times(mut self, after: Option<NaiveTime>, before: Option<NaiveTime>) -> Self {
        self.time_after = after;
        self.time_before = before;
        self
    }

    pub fn matches(&self, picture: &Picture) -> bool {
        if let Some(camera) = &self.camera {
            if &picture.camera != camera {
                return false;
            }
        }
        if let Some(object) = &self.object {
            if !picture.has_label(object) {
                return false;
            }
        }
        let date = picture.date();
        if self.date_after.is_some_and(|after| date < after) {
            return false;
        }
        if self.date_before.is_some_and(|before| date > before) {
            return false;
        }
        self.matches_time(picture.time_of_day())
    }

    fn matches_time(&self, time: NaiveTime) -> bool {
        let minute = time.hour() * 60 + time.minute();
        let to_minute = |t: NaiveTime| t.hour() * 60 + t.minute();
        match (self.time_after.map(to_minute), self.time_before.map(to_minute)) {
            (None, None) => true,
            (Some(after), None) => minute >= after,
            (None, Some(before)) => minute <= before,
            (Some(after), Some(before)) => minute >= after && minute <= before,
        }
    }
}

/// One page of a filtered listing together with archive totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PicturePage {
    pub items: Vec<PictureSummary>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub page_size: usize,
    pub current_size: u64,
    pub max_size: u64,
}

/// Distinct values available for filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub cameras: Vec<String>,
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub total_images: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub per_camera: BTreeMap<String, usize>,
    pub per_object: BTreeMap<String, usize>,
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}
