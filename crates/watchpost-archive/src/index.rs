use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use watchpost_types::picture::Picture;

pub(crate) const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

/// In-memory metadata of every archived picture. `total` always equals the
/// sum of the recorded sizes.
#[derive(Debug, Default)]
pub(crate) struct ArchiveIndex {
    pictures: HashMap<String, Picture>,
    order: BTreeSet<(NaiveDateTime, String)>,
    total: u64,
}

impl ArchiveIndex {
    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn len(&self) -> usize {
        self.pictures.len()
    }

    pub(crate) fn contains(&self, filename: &str) -> bool {
        self.pictures.contains_key(filename)
    }

    pub(crate) fn insert(&mut self, picture: Picture) {
        if let Some(previous) = self.remove(&picture.filename) {
            tracing::warn!(filename = %previous.filename, "replacing index entry");
        }
        self.total += picture.size;
        self.order
            .insert((picture.captured_at, picture.filename.clone()));
        self.pictures.insert(picture.filename.clone(), picture);
    }

    pub(crate) fn remove(&mut self, filename: &str) -> Option<Picture> {
        let picture = self.pictures.remove(filename)?;
        self.order
            .remove(&(picture.captured_at, picture.filename.clone()));
        self.total -= picture.size;
        Some(picture)
    }

    /// Oldest picture by capture time, filename breaking ties.
    pub(crate) fn oldest(&self) -> Option<&Picture> {
        self.order
            .iter()
            .next()
            .and_then(|(_, filename)| self.pictures.get(filename))
    }

    /// Newest first; equal timestamps in descending filename order.
    pub(crate) fn newest_first(&self) -> impl Iterator<Item = &Picture> {
        self.order
            .iter()
            .rev()
            .filter_map(|(_, filename)| self.pictures.get(filename))
    }

    pub(crate) fn drain(&mut self) -> Vec<Picture> {
        self.order.clear();
        self.total = 0;
        self.pictures.drain().map(|(_, picture)| picture).collect()
    }

    pub(crate) fn to_file(&self) -> IndexFile {
        IndexFile {
            version: INDEX_VERSION,
            pictures: self.newest_first().cloned().collect(),
        }
    }
}

/// On-disk form of the index.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IndexFile {
    pub(crate) version: u32,
    pub(crate) pictures: Vec<Picture>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn picture(name: &str, minute: u32, size: u64) -> Picture {
        Picture {
            filename: name.into(),
            camera: "balkon".into(),
            captured_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(12, minute, 0)
                .unwrap(),
            labels: Vec::new(),
            size,
        }
    }

    #[test]
    fn totals_follow_inserts_and_removals() {
        let mut index = ArchiveIndex::default();
        index.insert(picture("a.jpg", 1, 10));
        index.insert(picture("b.jpg", 2, 20));
        assert_eq!(index.total(), 30);
        index.insert(picture("a.jpg", 3, 5));
        assert_eq!(index.total(), 25);
        assert_eq!(index.len(), 2);
        assert!(index.remove("b.jpg").is_some());
        assert!(index.remove("b.jpg").is_none());
        assert_eq!(index.total(), 5);
    }

    #[test]
    fn ordering_is_time_then_filename() {
        let mut index = ArchiveIndex::default();
        index.insert(picture("b.jpg", 1, 1));
        index.insert(picture("a.jpg", 1, 1));
        index.insert(picture("c.jpg", 0, 1));
        assert_eq!(index.oldest().map(|p| p.filename.as_str()), Some("c.jpg"));
        let names: Vec<_> = index.newest_first().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["b.jpg", "a.jpg", "c.jpg"]);
    }
}
