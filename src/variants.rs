use std::path::{Path, PathBuf};
use std::sync::Arc;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use crate::error::MediaError;
use crate::transcoder::Transcoder;
use crate::utils::str_utils::file_extension;

/// Upper bound on either axis of a scaled variant.
pub const MAX_SCALE_DIMENSION: u32 = 1000;
const ACCEPTED_FORMATS: &[&str] = &["jpg", "png"];
/// Animated or already compressed formats. These are always served as the original.
const NEVER_SCALED: &[&str] = &["image/gif", "image/webp", "image/svg+xml"];
const PARTIAL_PREFIX: &str = ".partial-";

pub fn is_scalable(mime_type: &str) -> bool {
    mime_type.starts_with("image/") && !NEVER_SCALED.contains(&mime_type)
}

fn normalize_format(format: &str) -> String {
    match format.trim().to_ascii_lowercase().as_str() {
        "jpeg" => "jpg".to_string(),
        other => other.to_string(),
    }
}

/// Output format for a scaled variant: the requested one when it is `jpg` or `png`, otherwise
/// the source's own extension when that is `jpg` or `png`, otherwise `jpg`.
pub fn negotiate_format(storage_key: &str, requested: Option<&str>) -> String {
    let default = file_extension(storage_key)
        .map(|ext| normalize_format(&ext))
        .filter(|ext| ACCEPTED_FORMATS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string());
    match requested.map(normalize_format) {
        Some(format) if ACCEPTED_FORMATS.contains(&format.as_str()) => format,
        _ => default,
    }
}

pub fn cache_key(base_key: &str, width: Option<u32>, height: Option<u32>, format: &str) -> String {
    let axis = |value: Option<u32>| value.map(|x| x.to_string()).unwrap_or_else(|| "X".to_string());
    format!("{}_{}x{}.{}", base_key, axis(width), axis(height), format)
}

/// On-disk cache of scaled images. Presence of the file is the only validity signal.
///
/// Generation is serialised per cache key, so concurrent requests for one missing variant
/// transcode once and then share the result. Key locks live until the next flush.
pub struct VariantCache {
    dir: PathBuf,
    transcoder: Arc<dyn Transcoder>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VariantCache {
    pub fn new(dir: PathBuf, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { dir, transcoder, locks: DashMap::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn get_or_create_scaled(
        &self,
        base_key: &str,
        source: &Path,
        width: Option<u32>,
        height: Option<u32>,
        format: &str,
    ) -> Result<PathBuf, MediaError> {
        let key = cache_key(base_key, width, height, format);
        let path = self.dir.join(&key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let width = width.map(|x| x.min(MAX_SCALE_DIMENSION));
        let height = height.map(|x| x.min(MAX_SCALE_DIMENSION));
        let partial = self.dir.join(format!("{}{}.{}", PARTIAL_PREFIX, uuid::Uuid::new_v4().simple(), format));
        debug!("Generating variant {}", key);
        let result = self.transcoder.scale(source, &partial, width, height).await;
        let result = match result {
            Ok(()) => tokio::fs::rename(&partial, &path).await.map_err(MediaError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            if let Err(remove_err) = remove_if_exists(&partial).await {
                warn!("Failed to remove partial variant {}: {}", partial.display(), remove_err);
            }
            return Err(e);
        }
        Ok(path)
    }

    /// Deletes every cached variant and drops key locks nobody is holding. Returns how many
    /// files were removed.
    pub async fn flush(&self) -> Result<usize, MediaError> {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.remove_matching(|name| !name.starts_with(PARTIAL_PREFIX)).await
    }

    /// Deletes the variants derived from one original.
    pub async fn evict_base(&self, base_key: &str) -> Result<usize, MediaError> {
        let prefix = format!("{}_", base_key);
        self.remove_matching(|name| name.starts_with(&prefix)).await
    }

    async fn remove_matching(&self, predicate: impl Fn(&str) -> bool) -> Result<usize, MediaError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !predicate(&name) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cached variant {}: {}", name, e),
            }
        }
        if removed > 0 {
            info!("Removed {} cached variants", removed);
        }
        Ok(removed)
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
