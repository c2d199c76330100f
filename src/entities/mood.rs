use serde::{Deserialize, Serialize};

pub type MoodId = u64;

pub const DEFAULT_MOOD_NAME: &str = "default";

/// A small square icon expressing a character's mood.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Mood {
    pub id: MoodId,
    pub name: String,
    pub storage_key: String,
    pub character_id: u64,
    pub creator_id: String,
}

impl Mood {
    pub fn is_default(&self) -> bool {
        self.name.eq_ignore_ascii_case(DEFAULT_MOOD_NAME)
    }
}
