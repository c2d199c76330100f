use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AssetId = u64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaAsset {
    pub id: AssetId,
    pub uploader_id: String,
    pub title: String,
    pub original_filename: String,
    pub mime_type: String,
    /// On-disk file name under the originals directory. Unique and never reassigned.
    pub storage_key: String,
    pub tags: BTreeSet<String>,
    pub gallery_visible: bool,
    pub thumbnail_key: Option<String>,
    pub size_bytes: u64,
    pub content_hash: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MediaAsset {
    pub fn has_all_tags(&self, tags: &BTreeSet<String>) -> bool {
        tags.iter().all(|tag| self.tags.contains(tag))
    }

    pub fn is_uploaded_by(&self, uploader: &str) -> bool {
        self.uploader_id.eq_ignore_ascii_case(uploader)
    }

    pub fn top_level_type(&self) -> &str {
        self.mime_type.split('/').next().unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

#[cfg(test)]
pub(crate) fn sample_asset(id: AssetId, tags: &[&str]) -> MediaAsset {
    MediaAsset {
        id,
        uploader_id: "alice".to_string(),
        title: format!("asset {}", id),
        original_filename: format!("asset-{}.png", id),
        mime_type: "image/png".to_string(),
        storage_key: format!("key{}.png", id),
        tags: tags.iter().map(|x| x.to_string()).collect(),
        gallery_visible: true,
        thumbnail_key: None,
        size_bytes: 10,
        content_hash: format!("hash{}", id),
        width: None,
        height: None,
        comment: None,
        created_at: Utc::now(),
    }
}
