use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, info};
use rand::seq::SliceRandom;
use crate::config::MediaDirs;
use crate::db::SharedDb;
use crate::entities::{Mood, MoodId};
use crate::error::{MediaError, ValidationCode};
use crate::store::{existing_file, remove_file_logged, resolve_mime};
use crate::transcoder::Transcoder;
use crate::utils::filename::{join_flat, validate_flat_filename, FilenameError};

pub const AVATAR_SIZE_PX: u32 = 128;
pub const MOOD_SIZE_PX: u32 = 64;
const MAX_MOOD_NAME_LEN: usize = 64;
const ANIMATED_MIME: &str = "image/gif";

/// Source bytes already on disk, with what the client claimed about them.
pub struct IconSource<'a> {
    pub path: &'a Path,
    pub filename: &'a str,
    pub declared_mime: Option<&'a str>,
}

/// Avatars, mood icons and logos: small derived images that live outside the gallery.
pub struct IconService {
    db: SharedDb,
    dirs: MediaDirs,
    transcoder: Arc<dyn Transcoder>,
}

impl IconService {
    pub fn new(db: SharedDb, dirs: MediaDirs, transcoder: Arc<dyn Transcoder>) -> Self {
        Self { db, dirs, transcoder }
    }

    /// Transcodes `source` into a square icon under `dir`, returning the new storage key.
    async fn make_square(&self, source: &IconSource<'_>, dir: &Path, side_px: u32) -> Result<String, MediaError> {
        let mime = resolve_mime(self.transcoder.as_ref(), source.path, source.filename, source.declared_mime).await;
        if !mime.starts_with("image/") && !mime.starts_with("video/") {
            return Err(MediaError::validation(ValidationCode::WrongType));
        }
        let animated = mime == ANIMATED_MIME;
        let key = format!("{}.{}", uuid::Uuid::new_v4().simple(), if animated { "gif" } else { "png" });
        let output = dir.join(&key);
        if let Err(e) = self.transcoder.fixed_square(source.path, &output, side_px, animated).await {
            remove_file_logged(&output).await;
            return Err(e.into());
        }
        Ok(key)
    }

    // avatars

    pub async fn set_avatar(&self, username: &str, source: IconSource<'_>) -> Result<String, MediaError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(MediaError::validation(ValidationCode::InvalidName));
        }
        let key = self.make_square(&source, &self.dirs.avatars, AVATAR_SIZE_PX).await?;
        let previous = self.db.write().await.set_avatar(username, Some(key.clone())).await?;
        if let Some(previous) = previous {
            remove_file_logged(&self.dirs.avatars.join(previous)).await;
        }
        info!("Avatar for {} set to {}", username, key);
        Ok(key)
    }

    /// Path of the user's avatar when one is recorded and still on disk.
    pub async fn avatar_path(&self, username: &str) -> Option<PathBuf> {
        let key = self.db.read().await.get_avatar(username)?;
        existing_file(self.dirs.avatars.join(key)).await
    }

    // moods

    pub async fn create_mood(&self, name: &str, character_id: u64, creator_id: &str, source: IconSource<'_>) -> Result<Mood, MediaError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_MOOD_NAME_LEN {
            return Err(MediaError::validation(ValidationCode::InvalidName));
        }
        let key = self.make_square(&source, &self.dirs.moods, MOOD_SIZE_PX).await?;
        let mood = Mood {
            id: 0,
            name: name.to_string(),
            storage_key: key,
            character_id,
            creator_id: creator_id.to_string(),
        };
        let inserted = self.db.write().await.insert_mood(mood.clone()).await;
        match inserted {
            Ok(mood) => {
                info!("Created mood {} ({}) for character {}", mood.id, mood.name, mood.character_id);
                Ok(mood)
            }
            Err(e) => {
                remove_file_logged(&self.dirs.moods.join(&mood.storage_key)).await;
                Err(e)
            }
        }
    }

    pub async fn delete_mood(&self, id: MoodId) -> Result<Mood, MediaError> {
        let mood = self.db.write().await.delete_mood(id).await?.ok_or(MediaError::NotFound)?;
        remove_file_logged(&self.dirs.moods.join(&mood.storage_key)).await;
        info!("Deleted mood {} ({})", mood.id, mood.name);
        Ok(mood)
    }

    /// The requested mood when its icon is on disk. Otherwise the first usable fallback: the
    /// lowest numbered character with an icon on disk, its `default` mood before the others.
    pub async fn resolve_mood(&self, id: MoodId) -> Option<(Mood, PathBuf)> {
        let candidates: Vec<Mood> = {
            let db = self.db.read().await;
            db.get_mood(id).into_iter().chain(db.fallback_moods()).collect()
        };
        for mood in candidates {
            match existing_file(self.dirs.moods.join(&mood.storage_key)).await {
                Some(path) => return Some((mood, path)),
                None => debug!("Mood {} has no icon on disk", mood.id),
            }
        }
        None
    }

    // logos

    /// Logo file names, sorted. The directory listing is the only record of which logos exist.
    pub async fn list_logos(&self) -> Result<Vec<String>, MediaError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dirs.logos).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_flat_filename(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn find_logo(&self, name: &str) -> Result<Option<PathBuf>, FilenameError> {
        let path = join_flat(&self.dirs.logos, name)?;
        Ok(existing_file(path).await)
    }

    pub async fn random_logo(&self) -> Result<Option<PathBuf>, MediaError> {
        let names = self.list_logos().await?;
        Ok(names.choose(&mut rand::thread_rng()).map(|name| self.dirs.logos.join(name)))
    }
}
