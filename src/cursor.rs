use std::collections::BTreeSet;
use serde::Deserialize;
use crate::db::MediaDb;
use crate::entities::{AssetId, MediaAsset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Before,
    After,
}

/// Conjunctive filter for cursor navigation. Empty `tags` matches everything.
#[derive(Debug, Clone, Default)]
pub struct CursorFilter {
    pub tags: BTreeSet<String>,
    pub collection: Option<u64>,
    pub uploader: Option<String>,
}

impl CursorFilter {
    fn matches(&self, db: &MediaDb, asset: &MediaAsset) -> bool {
        asset.gallery_visible
            && asset.has_all_tags(&self.tags)
            && self.collection.map_or(true, |collection| db.collection_contains(collection, asset.id))
            && self.uploader.as_deref().map_or(true, |uploader| asset.is_uploaded_by(uploader))
    }
}

/// Nearest gallery-visible asset strictly after (or before) `reference_id` in id order that
/// passes `filter`. The reference itself need not exist.
pub fn find_adjacent(db: &MediaDb, direction: Direction, reference_id: AssetId, filter: &CursorFilter) -> Option<AssetId> {
    match direction {
        Direction::After => db.assets_after(reference_id).find(|asset| filter.matches(db, asset)).map(|asset| asset.id),
        Direction::Before => db.assets_before(reference_id).find(|asset| filter.matches(db, asset)).map(|asset| asset.id),
    }
}
