pub mod asset;
pub mod mood;

pub use crate::entities::asset::{AssetId, MediaAsset, SortOrder};
pub use crate::entities::mood::{Mood, MoodId};

pub enum InsertResult<T> {
    Existing(T),
    New(T),
}

impl<T> InsertResult<T> {
    pub fn safe_unwrap(self) -> T {
        match self {
            InsertResult::Existing(x) => x,
            InsertResult::New(x) => x,
        }
    }

    #[cfg(test)]
    pub fn is_existing(&self) -> bool {
        matches!(self, InsertResult::Existing(_))
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TagUsage {
    pub name: String,
    pub count: u64,
}
