use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Utc;
use humanize_bytes::humanize_bytes_binary;
use itertools::Itertools;
use log::{debug, error, info, warn};
use tempfile::TempPath;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use crate::config::MediaDirs;
use crate::db::SharedDb;
use crate::entities::*;
use crate::error::{MediaError, TranscodeError, ValidationCode};
use crate::transcoder::{Dimensions, Transcoder};
use crate::utils::hash_utils::StreamingHasher;
use crate::utils::str_utils::{file_extension, normalize_tags};
use crate::variants::VariantCache;

const GENERIC_MIME: &str = "application/octet-stream";
const THUMBNAIL_EXTENSION: &str = "jpg";
const READ_CHUNK: usize = 64 * 1024;

/// Upload bytes being written to a temp file under the media root, hashed on the way in.
///
/// The temp file disappears when this is dropped unless it was moved into place.
pub struct StagedUpload {
    file: Option<tokio::fs::File>,
    temp: Option<TempPath>,
    hasher: StreamingHasher,
    size: u64,
    max_size: u64,
}

impl StagedUpload {
    pub async fn create(dir: &Path, max_size: u64) -> Result<Self, MediaError> {
        let dir = dir.to_path_buf();
        let named = tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(dir))
            .await
            .map_err(|e| MediaError::Internal(e.into()))??;
        let (file, temp) = named.into_parts();
        Ok(Self {
            file: Some(tokio::fs::File::from_std(file)),
            temp: Some(temp),
            hasher: StreamingHasher::default(),
            size: 0,
            max_size,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.temp.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Appends a chunk. Going over the size limit removes the temp file and fails with
    /// `too_large`.
    pub async fn push(&mut self, chunk: &[u8]) -> Result<(), MediaError> {
        self.size += chunk.len() as u64;
        if self.size > self.max_size {
            self.discard();
            return Err(MediaError::validation(ValidationCode::TooLarge));
        }
        let file = self.file.as_mut().ok_or(MediaError::validation(ValidationCode::TooLarge))?;
        self.hasher.update(chunk);
        file.write_all(chunk).await?;
        Ok(())
    }

    pub async fn push_reader<R: tokio::io::AsyncRead + Unpin>(&mut self, mut reader: R) -> Result<(), MediaError> {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            self.push(&buf[..n]).await?;
        }
    }

    fn discard(&mut self) {
        self.file.take();
        if let Some(temp) = self.temp.take() {
            let path = temp.to_path_buf();
            if let Err(e) = temp.close() {
                warn!("Failed to remove temp upload {}: {}", path.display(), e);
            }
        }
    }

    pub async fn finish(mut self) -> Result<(TempPath, String, u64), MediaError> {
        let mut file = self.file.take().ok_or(MediaError::validation(ValidationCode::TooLarge))?;
        file.flush().await?;
        drop(file);
        let temp = self.temp.take().ok_or(MediaError::validation(ValidationCode::TooLarge))?;
        let hasher = std::mem::take(&mut self.hasher);
        Ok((temp, hasher.finish(), self.size))
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        self.discard();
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub declared_mime: Option<String>,
    pub uploader_id: String,
    pub title: Option<String>,
    pub tags: BTreeSet<String>,
    pub comment: Option<String>,
    pub gallery_visible: bool,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, declared_mime: Option<String>, uploader_id: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            declared_mime,
            uploader_id: uploader_id.into(),
            title: None,
            tags: BTreeSet::new(),
            comment: None,
            gallery_visible: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub title: String,
    pub tags: Vec<String>,
    pub gallery_visible: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Ingested {
    pub id: AssetId,
    pub existing: bool,
}

pub struct AssetStore {
    db: SharedDb,
    dirs: MediaDirs,
    transcoder: Arc<dyn Transcoder>,
    cache: Arc<VariantCache>,
    max_upload_size: u64,
}

impl AssetStore {
    pub fn new(db: SharedDb, dirs: MediaDirs, transcoder: Arc<dyn Transcoder>, cache: Arc<VariantCache>, max_upload_size: u64) -> Self {
        Self { db, dirs, transcoder, cache, max_upload_size }
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    pub fn original_path(&self, asset: &MediaAsset) -> PathBuf {
        self.dirs.originals.join(&asset.storage_key)
    }

    pub fn thumbnail_path(&self, asset: &MediaAsset) -> Option<PathBuf> {
        asset.thumbnail_key.as_ref().map(|key| self.dirs.thumbnails.join(key))
    }

    /// Thumbnail path when one is recorded and still on disk.
    pub async fn existing_thumbnail_path(&self, asset: &MediaAsset) -> Option<PathBuf> {
        existing_file(self.thumbnail_path(asset)?).await
    }

    pub async fn stage(&self) -> Result<StagedUpload, MediaError> {
        StagedUpload::create(&self.dirs.tmp, self.max_upload_size).await
    }

    pub async fn ingest(&self, bytes: &[u8], request: UploadRequest) -> Result<Ingested, MediaError> {
        let mut staged = self.stage().await?;
        staged.push(bytes).await?;
        self.ingest_staged(staged, request).await
    }

    /// Ingests a file from the local filesystem, leaving the source untouched.
    pub async fn import_file(&self, path: &Path, uploader_id: &str) -> Result<Ingested, MediaError> {
        let filename = path.file_name()
            .map(|x| x.to_string_lossy().to_string())
            .ok_or(MediaError::validation(ValidationCode::MissingFile))?;
        let file = tokio::fs::File::open(path).await?;
        let mut staged = self.stage().await?;
        staged.push_reader(file).await?;
        self.ingest_staged(staged, UploadRequest::new(filename, None, uploader_id)).await
    }

    pub async fn ingest_staged(&self, staged: StagedUpload, request: UploadRequest) -> Result<Ingested, MediaError> {
        let (temp, hash, size) = staged.finish().await?;
        if size == 0 {
            return Err(MediaError::validation(ValidationCode::MissingFile));
        }

        if let Some(existing) = self.db.read().await.get_asset_by_hash(&hash) {
            debug!("Upload of {} matches asset {}", request.filename, existing.id);
            return Ok(Ingested { id: existing.id, existing: true });
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let storage_key = match file_extension(&request.filename) {
            Some(ext) => format!("{}.{}", token, ext),
            None => token.clone(),
        };
        let original = self.dirs.originals.join(&storage_key);
        temp.persist(&original).map_err(|e| MediaError::FileIOError(e.error))?;

        let mime_type = resolve_mime(self.transcoder.as_ref(), &original, &request.filename, request.declared_mime.as_deref()).await;
        let top_level = mime_type.split('/').next().unwrap_or_default();
        let visual = matches!(top_level, "image" | "video");

        let thumbnail_key = if visual || top_level == "audio" {
            match self.make_thumbnail(&original, &token).await {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Thumbnail for {} failed: {}", storage_key, e);
                    None
                }
            }
        } else {
            None
        };

        let dimensions = if visual {
            self.transcoder.probe_dimensions(&original).await
                .unwrap_or_else(|e| {
                    warn!("Probing {} failed: {}", storage_key, e);
                    None
                })
        } else {
            None
        };

        let title = request.title.as_deref()
            .map(str::trim)
            .filter(|x| !x.is_empty())
            .unwrap_or(&request.filename)
            .to_string();
        let asset = MediaAsset {
            id: 0,
            uploader_id: request.uploader_id,
            title,
            original_filename: request.filename,
            mime_type,
            storage_key,
            tags: normalize_tags(&request.tags),
            gallery_visible: request.gallery_visible,
            thumbnail_key,
            size_bytes: size,
            content_hash: hash,
            width: dimensions.map(|d| d.width),
            height: dimensions.map(|d| d.height),
            comment: request.comment.map(|x| x.trim().to_string()).filter(|x| !x.is_empty()),
            created_at: Utc::now(),
        };

        let inserted = self.db.write().await.insert_asset(asset.clone()).await;
        match inserted {
            Ok(InsertResult::New(asset)) => {
                info!("Ingested asset {} ({}, {}, {})", asset.id, asset.original_filename, asset.mime_type, humanize_bytes_binary!(asset.size_bytes));
                Ok(Ingested { id: asset.id, existing: false })
            }
            Ok(InsertResult::Existing(existing)) => {
                // a concurrent upload of the same bytes won the insert
                self.remove_files(&asset).await;
                Ok(Ingested { id: existing.id, existing: true })
            }
            Err(e) => {
                error!("Failed to persist asset {}; leaving files in place: {}", asset.storage_key, e);
                Err(e)
            }
        }
    }

    async fn make_thumbnail(&self, source: &Path, token: &str) -> Result<String, TranscodeError> {
        let key = format!("{}.{}", token, THUMBNAIL_EXTENSION);
        let output = self.dirs.thumbnails.join(&key);
        if let Err(e) = self.transcoder.thumbnail(source, &output).await {
            remove_file_logged(&output).await;
            return Err(e);
        }
        Ok(key)
    }

    pub async fn edit(&self, id: AssetId, request: EditRequest) -> Result<MediaAsset, MediaError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(MediaError::validation(ValidationCode::InvalidTitle));
        }
        let mut db = self.db.write().await;
        let mut asset = db.get_asset(id).ok_or(MediaError::NotFound)?;
        asset.title = title.to_string();
        asset.tags = normalize_tags(&request.tags);
        asset.gallery_visible = request.gallery_visible;
        asset.comment = request.comment.map(|x| x.trim().to_string()).filter(|x| !x.is_empty());
        let updated = db.update_asset(asset).await?;
        debug!("Edited asset {}: tags [{}]", updated.id, updated.tags.iter().join(", "));
        Ok(updated)
    }

    /// Removes rows first, then files. File removal failures are logged and never roll the row
    /// deletion back.
    pub async fn delete(&self, ids: &[AssetId]) -> Result<usize, MediaError> {
        let mut deleted = 0;
        for id in ids {
            let removed = self.db.write().await.delete_asset(*id).await?;
            let Some(asset) = removed else {
                debug!("Delete of unknown asset {} ignored", id);
                continue;
            };
            self.remove_files(&asset).await;
            if let Err(e) = self.cache.evict_base(&asset.storage_key).await {
                warn!("Failed to evict variants of {}: {}", asset.storage_key, e);
            }
            info!("Deleted asset {} ({})", asset.id, asset.storage_key);
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn remove_files(&self, asset: &MediaAsset) {
        remove_file_logged(&self.original_path(asset)).await;
        if let Some(thumbnail) = self.thumbnail_path(asset) {
            remove_file_logged(&thumbnail).await;
        }
    }

    /// Probes and stores dimensions for an asset that has none yet.
    pub async fn backfill_dimensions(&self, id: AssetId) -> Result<Option<Dimensions>, MediaError> {
        let asset = self.fetch_by_id(id).await.ok_or(MediaError::NotFound)?;
        if let (Some(width), Some(height)) = (asset.width, asset.height) {
            return Ok(Some(Dimensions { width, height }));
        }
        let Some(dimensions) = self.transcoder.probe_dimensions(&self.original_path(&asset)).await? else {
            return Ok(None);
        };
        let mut db = self.db.write().await;
        let mut current = db.get_asset(id).ok_or(MediaError::NotFound)?;
        current.width = Some(dimensions.width);
        current.height = Some(dimensions.height);
        db.update_asset(current).await?;
        Ok(Some(dimensions))
    }

    /// Probes every image or video asset still missing dimensions, skipping failures. Returns
    /// how many assets gained dimensions.
    pub async fn backfill_missing_dimensions(&self) -> usize {
        let pending: Vec<AssetId> = self.db.read().await.all_assets()
            .filter(|asset| asset.width.is_none() || asset.height.is_none())
            .filter(|asset| matches!(asset.top_level_type(), "image" | "video"))
            .map(|asset| asset.id)
            .collect();
        let mut updated = 0;
        for id in pending {
            match self.backfill_dimensions(id).await {
                Ok(Some(_)) => updated += 1,
                Ok(None) => debug!("No dimensions reported for asset {}", id),
                Err(e) => warn!("Backfilling dimensions of asset {} failed: {}", id, e),
            }
        }
        if updated > 0 {
            info!("Backfilled dimensions of {} assets", updated);
        }
        updated
    }

    pub async fn fetch_by_id(&self, id: AssetId) -> Option<MediaAsset> {
        self.db.read().await.get_asset(id)
    }

    pub async fn fetch_by_hash(&self, hash: &str) -> Option<MediaAsset> {
        self.db.read().await.get_asset_by_hash(hash)
    }

    pub async fn fetch_gallery_visible_by_tags(&self, tags: &BTreeSet<String>, offset: usize, limit: usize, order: SortOrder) -> Vec<MediaAsset> {
        self.db.read().await.gallery_visible_by_tags(tags, offset, limit, order)
    }

    pub async fn count_gallery_visible_by_tags(&self, tags: &BTreeSet<String>) -> usize {
        self.db.read().await.count_gallery_visible_by_tags(tags)
    }
}

/// The declared type wins unless it is missing or generic, in which case the magic bytes
/// decide, then the file name.
pub async fn resolve_mime(transcoder: &dyn Transcoder, path: &Path, filename: &str, declared: Option<&str>) -> String {
    let declared = declared
        .map(|x| x.trim().to_ascii_lowercase())
        .filter(|x| !x.is_empty() && x != GENERIC_MIME);
    if let Some(declared) = declared {
        return declared;
    }
    if let Some(sniffed) = transcoder.sniff_mime(path).await {
        return sniffed;
    }
    mime_guess::from_path(filename)
        .first()
        .map(|x| x.essence_str().to_string())
        .unwrap_or_else(|| GENERIC_MIME.to_string())
}

/// `path` when it names a regular file. Stat failures other than absence are logged.
pub(crate) async fn existing_file(path: PathBuf) -> Option<PathBuf> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Some(path),
        Ok(_) => None,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Cannot stat {}: {}", path.display(), e);
            }
            None
        }
    }
}

pub(crate) async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use super::*;
    use crate::config::AppConfig;
    use crate::db::MediaDb;
    use crate::storage::FileStorage;
    use crate::transcoder::fake::FakeTranscoder;

    pub const PNG_BYTES: [u8; 10] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 1];

    pub struct Fixture {
        pub _dir: tempfile::TempDir,
        pub config: AppConfig,
        pub transcoder: Arc<FakeTranscoder>,
        pub cache: Arc<VariantCache>,
        pub store: AssetStore,
    }

    pub async fn fixture_with(transcoder: FakeTranscoder, max_upload_size: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_root(dir.path());
        let mut db = MediaDb::new(Box::new(FileStorage::new(config.dirs.db_path.clone())));
        db.init().await.unwrap();
        let transcoder = Arc::new(transcoder);
        let cache = Arc::new(VariantCache::new(config.dirs.cache.clone(), transcoder.clone()));
        let store = AssetStore::new(db.into_shared(), config.dirs.clone(), transcoder.clone(), cache.clone(), max_upload_size);
        Fixture { _dir: dir, config, transcoder, cache, store }
    }

    pub async fn fixture() -> Fixture {
        fixture_with(FakeTranscoder::with_dimensions(640, 480), 1024).await
    }

    fn png_upload() -> UploadRequest {
        UploadRequest::new("Holiday Photo.PNG", Some("image/png".into()), "alice")
    }

    fn edit(title: &str, tags: &[&str]) -> EditRequest {
        EditRequest { title: title.into(), tags: tags.iter().map(|x| x.to_string()).collect(), gallery_visible: true, comment: None }
    }

    fn dir_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn identical_bytes_dedup_to_the_same_id() {
        let f = fixture().await;
        let first = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap();
        assert_eq!(first, Ingested { id: 1, existing: false });

        let mut renamed = png_upload();
        renamed.filename = "other-name.png".into();
        let second = f.store.ingest(&PNG_BYTES, renamed).await.unwrap();
        assert_eq!(second, Ingested { id: 1, existing: true });

        assert_eq!(std::fs::read_dir(&f.config.dirs.originals).unwrap().count(), 1);
        assert!(dir_is_empty(&f.config.dirs.tmp));
    }

    #[tokio::test]
    async fn ingest_records_metadata_thumbnail_and_dimensions() {
        let f = fixture().await;
        let ingested = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap();
        let asset = f.store.fetch_by_id(ingested.id).await.unwrap();

        assert!(asset.storage_key.ends_with(".png"));
        assert_ne!(asset.storage_key, "Holiday Photo.PNG");
        assert_eq!(asset.title, "Holiday Photo.PNG");
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(asset.size_bytes, 10);
        assert_eq!((asset.width, asset.height), (Some(640), Some(480)));
        assert_eq!(std::fs::read(f.store.original_path(&asset)).unwrap(), PNG_BYTES);
        assert!(f.store.thumbnail_path(&asset).unwrap().exists());
        assert_eq!(f.store.fetch_by_hash(&asset.content_hash).await.unwrap().id, asset.id);
    }

    #[tokio::test]
    async fn generic_mime_is_sniffed() {
        let f = fixture().await;
        let request = UploadRequest::new("blob", Some("application/octet-stream".into()), "alice");
        let ingested = f.store.ingest(&PNG_BYTES, request).await.unwrap();
        let asset = f.store.fetch_by_id(ingested.id).await.unwrap();
        assert_eq!(asset.mime_type, "image/png");
        assert!(!asset.storage_key.contains('.'));

        let text = UploadRequest::new("notes.txt", None, "alice");
        let ingested = f.store.ingest(b"plain words", text).await.unwrap();
        let asset = f.store.fetch_by_id(ingested.id).await.unwrap();
        assert_eq!(asset.mime_type, "text/plain");
        assert!(asset.thumbnail_key.is_none());
        assert_eq!(f.transcoder.thumbnails.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_thumbnail_does_not_fail_upload() {
        let f = fixture_with(FakeTranscoder::failing(), 1024).await;
        let ingested = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap();
        let asset = f.store.fetch_by_id(ingested.id).await.unwrap();
        assert!(asset.thumbnail_key.is_none());
        assert!(asset.width.is_none());
        assert!(dir_is_empty(&f.config.dirs.thumbnails));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_temp_removed() {
        let f = fixture_with(FakeTranscoder::default(), 8).await;
        let mut staged = f.store.stage().await.unwrap();
        let temp_path = staged.path().unwrap().to_path_buf();
        assert!(temp_path.exists());
        staged.push(&PNG_BYTES[..5]).await.unwrap();
        let result = staged.push(&PNG_BYTES[5..]).await;
        assert!(matches!(result, Err(MediaError::Validation(ValidationCode::TooLarge))));
        assert!(!temp_path.exists());
        drop(staged);

        let result = f.store.ingest(&PNG_BYTES, png_upload()).await;
        assert!(matches!(result, Err(MediaError::Validation(ValidationCode::TooLarge))));
        assert!(dir_is_empty(&f.config.dirs.tmp));
        assert!(dir_is_empty(&f.config.dirs.originals));
    }

    #[tokio::test]
    async fn empty_upload_is_missing_file() {
        let f = fixture().await;
        let result = f.store.ingest(b"", png_upload()).await;
        assert!(matches!(result, Err(MediaError::Validation(ValidationCode::MissingFile))));
        assert!(dir_is_empty(&f.config.dirs.tmp));
    }

    #[tokio::test]
    async fn edit_normalizes_and_validates() {
        let f = fixture().await;
        let id = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap().id;

        let result = f.store.edit(id, edit("   ", &[])).await;
        assert!(matches!(result, Err(MediaError::Validation(ValidationCode::InvalidTitle))));
        let result = f.store.edit(999, edit("title", &[])).await;
        assert!(matches!(result, Err(MediaError::NotFound)));

        let mut request = edit("  Beach day ", &[" Sea", "sand,", "SEA", " "]);
        request.gallery_visible = false;
        request.comment = Some("  ".into());
        let asset = f.store.edit(id, request).await.unwrap();
        assert_eq!(asset.title, "Beach day");
        assert_eq!(asset.tags.iter().cloned().collect::<Vec<_>>(), vec!["sand", "sea"]);
        assert!(!asset.gallery_visible);
        assert!(asset.comment.is_none());
    }

    #[tokio::test]
    async fn delete_removes_row_then_files() {
        let f = fixture().await;
        let id = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap().id;
        let asset = f.store.fetch_by_id(id).await.unwrap();
        let original = f.store.original_path(&asset);
        let thumbnail = f.store.thumbnail_path(&asset).unwrap();
        f.cache.get_or_create_scaled(&asset.storage_key, &original, Some(5), None, "png").await.unwrap();

        assert_eq!(f.store.delete(&[id, 12345]).await.unwrap(), 1);
        assert!(f.store.fetch_by_id(id).await.is_none());
        assert!(!original.exists());
        assert!(!thumbnail.exists());
        assert!(dir_is_empty(&f.config.dirs.cache));

        let again = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap();
        assert_eq!(again, Ingested { id: 2, existing: false });
    }

    #[tokio::test]
    async fn import_streams_local_file() {
        let f = fixture().await;
        let source = f.config.dirs.root.join("import-me.png");
        std::fs::write(&source, PNG_BYTES).unwrap();
        let ingested = f.store.import_file(&source, "alice").await.unwrap();
        assert!(!ingested.existing);
        assert!(source.exists());
        let asset = f.store.fetch_by_id(ingested.id).await.unwrap();
        assert_eq!(asset.original_filename, "import-me.png");
        assert_eq!(asset.mime_type, "image/png");
    }

    #[tokio::test]
    async fn backfill_fills_missing_dimensions_once() {
        let f = fixture_with(FakeTranscoder::with_dimensions(32, 16), 1024).await;
        let request = UploadRequest::new("notes.txt", Some("text/plain".into()), "alice");
        let id = f.store.ingest(b"not an image", request).await.unwrap().id;
        assert_eq!(f.transcoder.probes.load(Ordering::SeqCst), 0);

        let dims = f.store.backfill_dimensions(id).await.unwrap();
        assert_eq!(dims, Some(Dimensions { width: 32, height: 16 }));
        f.store.backfill_dimensions(id).await.unwrap();
        assert_eq!(f.transcoder.probes.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.fetch_by_id(id).await.unwrap().width, Some(32));
    }

    #[tokio::test]
    async fn backfill_sweep_only_measures_visual_assets() {
        let transcoder = FakeTranscoder { fail: AtomicBool::new(true), ..FakeTranscoder::with_dimensions(32, 16) };
        let f = fixture_with(transcoder, 1024).await;
        let image = f.store.ingest(&PNG_BYTES, png_upload()).await.unwrap().id;
        let text = UploadRequest::new("notes.txt", Some("text/plain".into()), "alice");
        let text = f.store.ingest(b"plain words", text).await.unwrap().id;
        assert!(f.store.fetch_by_id(image).await.unwrap().width.is_none());
        assert_eq!(f.transcoder.probes.load(Ordering::SeqCst), 1);

        assert_eq!(f.store.backfill_missing_dimensions().await, 0);
        f.transcoder.fail.store(false, Ordering::SeqCst);
        assert_eq!(f.store.backfill_missing_dimensions().await, 1);
        assert_eq!(f.store.backfill_missing_dimensions().await, 0);
        assert_eq!(f.transcoder.probes.load(Ordering::SeqCst), 3);

        let image = f.store.fetch_by_id(image).await.unwrap();
        assert_eq!((image.width, image.height), (Some(32), Some(16)));
        assert!(f.store.fetch_by_id(text).await.unwrap().width.is_none());
    }

    #[tokio::test]
    async fn concurrent_identical_uploads_keep_one_copy() {
        let f = fixture().await;
        let mut first = f.store.stage().await.unwrap();
        first.push(&PNG_BYTES).await.unwrap();
        let mut second = f.store.stage().await.unwrap();
        second.push(&PNG_BYTES).await.unwrap();

        let (a, b) = tokio::join!(
            f.store.ingest_staged(first, png_upload()),
            f.store.ingest_staged(second, png_upload()),
        );
        let mut results = vec![a.unwrap(), b.unwrap()];
        results.sort_by_key(|x| x.existing);
        assert_eq!(results, vec![Ingested { id: 1, existing: false }, Ingested { id: 1, existing: true }]);

        assert_eq!(std::fs::read_dir(&f.config.dirs.originals).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(&f.config.dirs.thumbnails).unwrap().count(), 1);
        assert!(dir_is_empty(&f.config.dirs.tmp));
        let asset = f.store.fetch_by_id(1).await.unwrap();
        assert!(f.store.original_path(&asset).exists());
        assert!(f.store.thumbnail_path(&asset).unwrap().exists());
    }
}
