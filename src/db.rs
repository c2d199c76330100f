use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use log::{debug, info};
use tokio::sync::RwLock;
use crate::entities::*;
use crate::error::MediaError;
use crate::storage::{DbOperation, Storage};

pub type SharedDb = Arc<RwLock<MediaDb>>;

/// Row store for assets, avatars, moods and collection membership.
///
/// Every mutation is appended to the write-ahead log before it is applied in memory, so a
/// failed log write never leaves the tables ahead of what is on disk.
pub struct MediaDb {
    storage: Box<dyn Storage>,
    assets: BTreeMap<AssetId, MediaAsset>,
    by_hash: HashMap<String, AssetId>,
    avatars: HashMap<String, String>,
    moods: BTreeMap<MoodId, Mood>,
    collections: HashMap<u64, BTreeSet<AssetId>>,
    next_asset_id: AssetId,
    next_mood_id: MoodId,
}

impl MediaDb {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self {
            storage,
            assets: BTreeMap::new(),
            by_hash: HashMap::new(),
            avatars: HashMap::new(),
            moods: BTreeMap::new(),
            collections: HashMap::new(),
            next_asset_id: 1,
            next_mood_id: 1,
        }
    }

    pub async fn init(&mut self) -> Result<(), MediaError> {
        info!("Starting DB import from WAL...");
        let operations = self.storage.read_all().await?;
        let count = operations.len();
        for operation in operations {
            self.apply(operation);
        }
        info!("DB imported: {} operations, {} assets", count, self.assets.len());
        Ok(())
    }

    pub fn into_shared(self) -> SharedDb {
        Arc::new(RwLock::new(self))
    }

    fn apply(&mut self, operation: DbOperation) {
        match operation {
            DbOperation::InsertAsset { asset } | DbOperation::UpdateAsset { asset } => {
                self.next_asset_id = self.next_asset_id.max(asset.id + 1);
                self.by_hash.insert(asset.content_hash.clone(), asset.id);
                self.assets.insert(asset.id, asset);
            }
            DbOperation::DeleteAsset { id } => {
                if let Some(asset) = self.assets.remove(&id) {
                    self.by_hash.remove(&asset.content_hash);
                }
                for members in self.collections.values_mut() {
                    members.remove(&id);
                }
            }
            DbOperation::SetAvatar { username, storage_key } => {
                let username = username.to_lowercase();
                match storage_key {
                    Some(key) => { self.avatars.insert(username, key); }
                    None => { self.avatars.remove(&username); }
                }
            }
            DbOperation::InsertMood { mood } => {
                self.next_mood_id = self.next_mood_id.max(mood.id + 1);
                self.moods.insert(mood.id, mood);
            }
            DbOperation::DeleteMood { id } => {
                self.moods.remove(&id);
            }
            DbOperation::AddToCollection { collection_id, asset_id } => {
                self.collections.entry(collection_id).or_default().insert(asset_id);
            }
            DbOperation::RemoveFromCollection { collection_id, asset_id } => {
                if let Some(members) = self.collections.get_mut(&collection_id) {
                    members.remove(&asset_id);
                }
            }
        }
    }

    async fn commit(&mut self, operation: DbOperation) -> Result<(), MediaError> {
        debug!("Writing to WAL: {:?}", operation);
        self.storage.write(operation.clone()).await?;
        self.apply(operation);
        Ok(())
    }

    // assets

    /// Inserts `asset` under a freshly assigned id, unless a row with the same content hash
    /// already exists, in which case that row is returned untouched.
    pub async fn insert_asset(&mut self, mut asset: MediaAsset) -> Result<InsertResult<MediaAsset>, MediaError> {
        if let Some(existing) = self.get_asset_by_hash(&asset.content_hash) {
            return Ok(InsertResult::Existing(existing));
        }
        asset.id = self.next_asset_id;
        self.commit(DbOperation::InsertAsset { asset: asset.clone() }).await?;
        Ok(InsertResult::New(asset))
    }

    pub async fn update_asset(&mut self, asset: MediaAsset) -> Result<MediaAsset, MediaError> {
        if !self.assets.contains_key(&asset.id) {
            return Err(MediaError::NotFound);
        }
        self.commit(DbOperation::UpdateAsset { asset: asset.clone() }).await?;
        Ok(asset)
    }

    pub async fn delete_asset(&mut self, id: AssetId) -> Result<Option<MediaAsset>, MediaError> {
        let maybe_asset = self.get_asset(id);
        if maybe_asset.is_some() {
            self.commit(DbOperation::DeleteAsset { id }).await?;
        }
        Ok(maybe_asset)
    }

    pub fn get_asset(&self, id: AssetId) -> Option<MediaAsset> {
        self.assets.get(&id).cloned()
    }

    pub fn get_asset_by_hash(&self, hash: &str) -> Option<MediaAsset> {
        self.by_hash.get(hash).and_then(|id| self.get_asset(*id))
    }

    #[cfg(test)]
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    pub fn all_assets(&self) -> impl Iterator<Item = &MediaAsset> {
        self.assets.values()
    }

    /// Assets with an id strictly above `id`, ascending.
    pub fn assets_after(&self, id: AssetId) -> impl Iterator<Item = &MediaAsset> {
        self.assets.range((Bound::Excluded(id), Bound::Unbounded)).map(|(_, asset)| asset)
    }

    /// Assets with an id strictly below `id`, descending.
    pub fn assets_before(&self, id: AssetId) -> impl Iterator<Item = &MediaAsset> {
        self.assets.range(..id).rev().map(|(_, asset)| asset)
    }

    fn gallery_visible_with_tags<'a>(&'a self, tags: &'a BTreeSet<String>) -> impl DoubleEndedIterator<Item = &'a MediaAsset> + 'a {
        self.assets.values()
            .filter(move |asset| asset.gallery_visible && asset.has_all_tags(tags))
    }

    pub fn gallery_visible_by_tags(&self, tags: &BTreeSet<String>, offset: usize, limit: usize, order: SortOrder) -> Vec<MediaAsset> {
        let matching = self.gallery_visible_with_tags(tags);
        match order {
            SortOrder::Oldest => matching.skip(offset).take(limit).cloned().collect(),
            SortOrder::Newest => matching.rev().skip(offset).take(limit).cloned().collect(),
        }
    }

    pub fn count_gallery_visible_by_tags(&self, tags: &BTreeSet<String>) -> usize {
        self.gallery_visible_with_tags(tags).count()
    }

    // collections

    pub async fn add_to_collection(&mut self, collection_id: u64, asset_id: AssetId) -> Result<bool, MediaError> {
        if !self.assets.contains_key(&asset_id) {
            return Err(MediaError::NotFound);
        }
        if self.collection_contains(collection_id, asset_id) {
            return Ok(false);
        }
        self.commit(DbOperation::AddToCollection { collection_id, asset_id }).await?;
        Ok(true)
    }

    pub async fn remove_from_collection(&mut self, collection_id: u64, asset_id: AssetId) -> Result<bool, MediaError> {
        if !self.collection_contains(collection_id, asset_id) {
            return Ok(false);
        }
        self.commit(DbOperation::RemoveFromCollection { collection_id, asset_id }).await?;
        Ok(true)
    }

    pub fn collection_contains(&self, collection_id: u64, asset_id: AssetId) -> bool {
        self.collections.get(&collection_id).is_some_and(|members| members.contains(&asset_id))
    }

    // avatars

    pub fn get_avatar(&self, username: &str) -> Option<String> {
        self.avatars.get(&username.to_lowercase()).cloned()
    }

    /// Returns the previous avatar key so the caller can remove the old file.
    pub async fn set_avatar(&mut self, username: &str, storage_key: Option<String>) -> Result<Option<String>, MediaError> {
        let previous = self.get_avatar(username);
        self.commit(DbOperation::SetAvatar { username: username.to_string(), storage_key }).await?;
        Ok(previous)
    }

    // moods

    pub async fn insert_mood(&mut self, mut mood: Mood) -> Result<Mood, MediaError> {
        mood.id = self.next_mood_id;
        self.commit(DbOperation::InsertMood { mood: mood.clone() }).await?;
        Ok(mood)
    }

    pub async fn delete_mood(&mut self, id: MoodId) -> Result<Option<Mood>, MediaError> {
        let maybe_mood = self.get_mood(id);
        if maybe_mood.is_some() {
            self.commit(DbOperation::DeleteMood { id }).await?;
        }
        Ok(maybe_mood)
    }

    pub fn get_mood(&self, id: MoodId) -> Option<Mood> {
        self.moods.get(&id).cloned()
    }

    /// Every mood in fallback order: characters ascending, and within one character the mood
    /// named `default` first, then the rest oldest first.
    pub fn fallback_moods(&self) -> Vec<Mood> {
        let mut moods: Vec<Mood> = self.moods.values().cloned().collect();
        moods.sort_by_key(|mood| (mood.character_id, !mood.is_default(), mood.id));
        moods
    }
}
