//! Disk-backed picture archive with a byte quota.
//!
//! Files live flat in one directory next to an `index.json` holding their
//! metadata. The index is held in memory behind one lock, so listings always
//! see a size that matches the pictures they enumerate. When a save would
//! exceed the quota the oldest pictures are evicted first.

mod index;
mod naming;

use std::{
    collections::{BTreeMap, BTreeSet},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};
use tracing::{debug, error, info, warn};
use watchpost_types::{
    config::ArchiveConfig,
    picture::{
        ArchiveStats, FilterOptions, NewPicture, Picture, PictureFilter, PicturePage,
        PictureSummary,
    },
    Result, WatchpostError,
};

use index::{ArchiveIndex, IndexFile, INDEX_FILE};
use naming::{extension_for, is_plain_filename, parse_filename, picture_filename};

#[async_trait]
pub trait PictureStore: Send + Sync {
    async fn save(&self, picture: NewPicture) -> Result<PictureSummary>;
    async fn list(&self, filter: &PictureFilter, page: usize, page_size: usize) -> PicturePage;
    async fn delete(&self, filename: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

pub struct PictureArchive {
    directory: PathBuf,
    max_size: u64,
    max_page_size: usize,
    index: RwLock<ArchiveIndex>,
}

impl PictureArchive {
    pub async fn open(config: &ArchiveConfig) -> Result<Self> {
        Self::open_at(&config.directory, config.max_size_bytes, config.max_page_size).await
    }

    /// Opens (or creates) an archive directory, reconciling the saved index
    /// with the files actually present.
    pub async fn open_at(
        directory: impl AsRef<Path>,
        max_size: u64,
        max_page_size: usize,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .await
            .map_err(|err| WatchpostError::storage(&directory, err))?;

        let archive = Self {
            directory,
            max_size,
            max_page_size: max_page_size.max(1),
            index: RwLock::new(ArchiveIndex::default()),
        };
        let mut index = archive.load_index().await?;
        let evicted = archive.evict_until_fits(&mut index, 0).await?;
        if evicted > 0 {
            warn!(evicted, "archive exceeded quota on open, evicted oldest pictures");
        }
        archive.persist(&index).await;
        info!(
            directory = %archive.directory.display(),
            pictures = index.len(),
            size = index.total(),
            max_size = archive.max_size,
            "picture archive ready"
        );
        *archive.index.write().await = index;
        Ok(archive)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub async fn current_size(&self) -> u64 {
        self.index.read().await.total()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Location of an archived file, if the picture exists.
    pub async fn path_of(&self, filename: &str) -> Option<PathBuf> {
        if !is_plain_filename(filename) {
            return None;
        }
        self.index
            .read()
            .await
            .contains(filename)
            .then(|| self.directory.join(filename))
    }

    pub async fn filters(&self) -> FilterOptions {
        let index = self.index.read().await;
        let mut cameras = BTreeSet::new();
        let mut objects = BTreeSet::new();
        for picture in index.newest_first() {
            cameras.insert(picture.camera.clone());
            objects.extend(picture.labels.iter().cloned());
        }
        FilterOptions {
            cameras: cameras.into_iter().collect(),
            objects: objects.into_iter().collect(),
        }
    }

    pub async fn stats(&self) -> ArchiveStats {
        let index = self.index.read().await;
        let mut per_camera = BTreeMap::new();
        let mut per_object = BTreeMap::new();
        for picture in index.newest_first() {
            *per_camera.entry(picture.camera.clone()).or_insert(0) += 1;
            for label in &picture.labels {
                *per_object.entry(label.clone()).or_insert(0) += 1;
            }
        }
        ArchiveStats {
            total_images: index.len(),
            total_size_bytes: index.total(),
            max_size_bytes: self.max_size,
            per_camera,
            per_object,
        }
    }

    async fn load_index(&self) -> Result<ArchiveIndex> {
        let mut index = ArchiveIndex::default();
        let index_path = self.directory.join(INDEX_FILE);
        match fs::read(&index_path).await {
            Ok(raw) => match serde_json::from_slice::<IndexFile>(&raw) {
                Ok(file) => {
                    for picture in file.pictures {
                        self.restore(&mut index, picture).await;
                    }
                }
                Err(err) => warn!(
                    path = %index_path.display(),
                    error = %err,
                    "archive index unreadable, rebuilding from directory"
                ),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(WatchpostError::storage(index_path, err)),
        }
        self.adopt_orphans(&mut index).await?;
        Ok(index)
    }

    /// Keeps an index entry only if its file is still there, with the size
    /// found on disk.
    async fn restore(&self, index: &mut ArchiveIndex, mut picture: Picture) {
        if !is_plain_filename(&picture.filename) {
            warn!(filename = %picture.filename, "ignoring suspicious index entry");
            return;
        }
        match fs::metadata(self.directory.join(&picture.filename)).await {
            Ok(meta) if meta.is_file() => {
                picture.size = meta.len();
                index.insert(picture);
            }
            _ => debug!(filename = %picture.filename, "indexed picture missing on disk"),
        }
    }

    async fn adopt_orphans(&self, index: &mut ArchiveIndex) -> Result<()> {
        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|err| WatchpostError::storage(&self.directory, err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| WatchpostError::storage(&self.directory, err))?
        {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if index.contains(&filename) {
                continue;
            }
            let Some((camera, captured_at)) = parse_filename(&filename) else {
                continue;
            };
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            info!(filename = %filename, "adopting unindexed picture");
            index.insert(Picture {
                filename,
                camera,
                captured_at,
                labels: Vec::new(),
                size: meta.len(),
            });
        }
        Ok(())
    }

    /// Removes oldest pictures until `incoming` more bytes fit in the quota.
    async fn evict_until_fits(&self, index: &mut ArchiveIndex, incoming: u64) -> Result<usize> {
        let mut evicted = 0;
        while index.total() + incoming > self.max_size {
            let Some(oldest) = index.oldest().map(|p| p.filename.clone()) else {
                break;
            };
            self.remove_file(&oldest).await?;
            if let Some(picture) = index.remove(&oldest) {
                debug!(filename = %picture.filename, size = picture.size, "evicted picture");
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    async fn remove_file(&self, filename: &str) -> Result<()> {
        let path = self.directory.join(filename);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(WatchpostError::storage(path, err)),
        }
    }

    /// Mirrors the index to disk. Failures are logged: the in-memory index
    /// stays authoritative and unindexed files are adopted on the next open.
    async fn persist(&self, index: &ArchiveIndex) {
        let path = self.directory.join(INDEX_FILE);
        let tmp = self.directory.join(format!("{INDEX_FILE}.tmp"));
        let raw = match serde_json::to_vec(&index.to_file()) {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "failed to encode archive index");
                return;
            }
        };
        if let Err(err) = fs::write(&tmp, raw).await {
            error!(path = %tmp.display(), error = %err, "failed to write archive index");
            return;
        }
        if let Err(err) = fs::rename(&tmp, &path).await {
            error!(path = %path.display(), error = %err, "failed to replace archive index");
        }
    }

    fn unique_filename(&self, index: &ArchiveIndex, picture: &NewPicture) -> String {
        let extension = extension_for(&picture.data);
        let mut attempt = 1;
        loop {
            let name = picture_filename(&picture.camera, picture.captured_at, extension, attempt);
            if !index.contains(&name) {
                return name;
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl PictureStore for PictureArchive {
    async fn save(&self, picture: NewPicture) -> Result<PictureSummary> {
        let size = picture.data.len() as u64;
        if size > self.max_size {
            return Err(WatchpostError::ArchiveFull {
                size,
                max: self.max_size,
            });
        }

        let mut index = self.index.write().await;
        let evicted = match self.evict_until_fits(&mut index, size).await {
            Ok(evicted) => evicted,
            Err(err) => {
                self.persist(&index).await;
                return Err(err);
            }
        };
        if evicted > 0 {
            info!(evicted, "evicted oldest pictures to make room");
        }

        let filename = self.unique_filename(&index, &picture);
        let path = self.directory.join(&filename);
        if let Err(err) = fs::write(&path, &picture.data).await {
            let _ = fs::remove_file(&path).await;
            if evicted > 0 {
                self.persist(&index).await;
            }
            return Err(WatchpostError::storage(path, err));
        }

        let record = Picture {
            filename,
            camera: picture.camera,
            captured_at: picture.captured_at,
            labels: picture.labels,
            size,
        };
        let summary = record.summary();
        index.insert(record);
        self.persist(&index).await;
        debug!(
            filename = %summary.name,
            size,
            total = index.total(),
            "picture archived"
        );
        Ok(summary)
    }

    async fn list(&self, filter: &PictureFilter, page: usize, page_size: usize) -> PicturePage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, self.max_page_size);
        let skip = (page - 1).saturating_mul(page_size);

        let index = self.index.read().await;
        let mut total_count = 0;
        let mut items = Vec::new();
        for picture in index.newest_first().filter(|p| filter.matches(p)) {
            if total_count >= skip && items.len() < page_size {
                items.push(picture.summary());
            }
            total_count += 1;
        }
        PicturePage {
            items,
            current_page: page,
            total_pages: total_count.div_ceil(page_size),
            total_count,
            page_size,
            current_size: index.total(),
            max_size: self.max_size,
        }
    }

    async fn delete(&self, filename: &str) -> Result<()> {
        if !is_plain_filename(filename) {
            return Err(WatchpostError::NotFound(filename.to_string()));
        }
        let mut index = self.index.write().await;
        if !index.contains(filename) {
            return Err(WatchpostError::NotFound(filename.to_string()));
        }
        self.remove_file(filename).await?;
        index.remove(filename);
        self.persist(&index).await;
        info!(filename, "picture deleted");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        let pictures = index.drain();
        let mut failed = 0;
        for picture in &pictures {
            if let Err(err) = self.remove_file(&picture.filename).await {
                failed += 1;
                error!(error = %err, "failed to delete picture while clearing");
            }
        }
        self.persist(&index).await;
        info!(
            removed = pictures.len() - failed,
            failed,
            directory = %self.directory.display(),
            "archive cleared"
        );
        Ok(())
    }
}
