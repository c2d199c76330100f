use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use log::debug;
use crate::db::SharedDb;
use crate::entities::{MediaAsset, TagUsage};

pub type TagCounts = BTreeMap<String, u64>;

/// Tag name to usage count over gallery-visible assets.
///
/// The map is only ever replaced wholesale, so readers see either the previous or the next
/// complete snapshot.
#[derive(Default)]
pub struct TagIndex {
    snapshot: RwLock<Arc<TagCounts>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rebuild(&self, db: &SharedDb) -> usize {
        let counts = {
            let db = db.read().await;
            count_tags(db.all_assets())
        };
        self.replace(counts)
    }

    #[cfg(test)]
    pub fn rebuild_from<'a>(&self, assets: impl Iterator<Item = &'a MediaAsset>) -> usize {
        self.replace(count_tags(assets))
    }

    fn replace(&self, counts: TagCounts) -> usize {
        let len = counts.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(counts);
        debug!("Tag index rebuilt: {} tags", len);
        len
    }

    pub fn list_all(&self) -> Arc<TagCounts> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn list_containing(&self, substring: &str) -> TagCounts {
        let needle = substring.to_lowercase();
        self.list_all().iter()
            .filter(|(name, _)| name.contains(&needle))
            .map(|(name, count)| (name.clone(), *count))
            .collect()
    }

    /// Name-sorted page over all tags, or over those containing `query`. Returns the total
    /// number of matching tags alongside the page.
    pub fn page(&self, query: Option<&str>, offset: usize, limit: usize) -> (usize, Vec<TagUsage>) {
        let page_of = |tags: &TagCounts| {
            let items: Vec<TagUsage> = tags.iter()
                .skip(offset)
                .take(limit)
                .map(|(name, count)| TagUsage { name: name.clone(), count: *count })
                .collect();
            (tags.len(), items)
        };
        match query.map(str::trim).filter(|x| !x.is_empty()) {
            Some(query) => page_of(&self.list_containing(query)),
            None => page_of(self.list_all().as_ref()),
        }
    }
}

fn count_tags<'a>(assets: impl Iterator<Item = &'a MediaAsset>) -> TagCounts {
    let mut counts = TagCounts::new();
    for asset in assets.filter(|asset| asset.gallery_visible) {
        for tag in &asset.tags {
            *counts.entry(tag.clone()).or_default() += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MediaDb;
    use crate::entities::asset::sample_asset;
    use crate::storage::InMemoryStorage;

    #[test]
    fn counts_only_gallery_visible_assets() {
        let mut hidden = sample_asset(3, &["cat", "secret"]);
        hidden.gallery_visible = false;
        let assets = vec![sample_asset(1, &["cat", "dog"]), sample_asset(2, &["cat"]), hidden];

        let index = TagIndex::new();
        assert_eq!(index.rebuild_from(assets.iter()), 2);
        let all = index.list_all();
        assert_eq!(all.get("cat"), Some(&2));
        assert_eq!(all.get("dog"), Some(&1));
        assert!(!all.contains_key("secret"));
    }

    #[test]
    fn substring_queries_are_case_insensitive() {
        let index = TagIndex::new();
        let assets = vec![sample_asset(1, &["sunset", "sunrise", "moon"])];
        index.rebuild_from(assets.iter());
        let matching = index.list_containing("SUN");
        assert_eq!(matching.keys().cloned().collect::<Vec<_>>(), vec!["sunrise", "sunset"]);
    }

    #[test]
    fn pages_are_sorted_by_name() {
        let index = TagIndex::new();
        let assets = vec![sample_asset(1, &["d", "b", "a", "c"])];
        index.rebuild_from(assets.iter());
        let (total, page) = index.page(None, 1, 2);
        assert_eq!(total, 4);
        assert_eq!(page.iter().map(|x| x.name.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
        let (total, page) = index.page(Some(" "), 0, 10);
        assert_eq!((total, page.len()), (4, 4));
    }

    #[tokio::test]
    async fn rebuild_drops_tags_no_longer_used() {
        let db = MediaDb::new(Box::new(InMemoryStorage::default())).into_shared();
        let asset = db.write().await.insert_asset(sample_asset(0, &["cat", "dog"])).await.unwrap().safe_unwrap();
        let index = TagIndex::new();
        index.rebuild(&db).await;
        assert!(index.list_all().contains_key("dog"));

        let mut edited = asset.clone();
        edited.tags.remove("dog");
        db.write().await.update_asset(edited).await.unwrap();
        let before_rebuild = index.list_all();
        index.rebuild(&db).await;
        assert!(before_rebuild.contains_key("dog"));
        assert!(!index.list_all().contains_key("dog"));
        assert_eq!(index.list_all().get("cat"), Some(&1));
    }
}
