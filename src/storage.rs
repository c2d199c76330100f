use std::path::PathBuf;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::entities::{AssetId, MediaAsset, Mood, MoodId};
use crate::error::MediaError;

/// One line of the write-ahead log. Replaying every operation in order rebuilds the tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DbOperation {
    InsertAsset { asset: MediaAsset },
    UpdateAsset { asset: MediaAsset },
    DeleteAsset { id: AssetId },
    SetAvatar { username: String, storage_key: Option<String> },
    InsertMood { mood: Mood },
    DeleteMood { id: MoodId },
    AddToCollection { collection_id: u64, asset_id: AssetId },
    RemoveFromCollection { collection_id: u64, asset_id: AssetId },
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_all(&self) -> Result<Vec<DbOperation>, MediaError>;
    async fn write(&mut self, operation: DbOperation) -> Result<(), MediaError>;
}

pub struct FileStorage {
    db_path: PathBuf,
}

impl FileStorage {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read_all(&self) -> Result<Vec<DbOperation>, MediaError> {
        let file_str = tokio::fs::read_to_string(&self.db_path).await
            .map_err(MediaError::DbIOError)?;
        let operations = file_str.split('\n')
            .filter(|x| !x.is_empty())
            .map(|x| serde_json::from_str(x).map_err(MediaError::DbSerializationError))
            .collect::<Result<Vec<DbOperation>, MediaError>>()?;
        Ok(operations)
    }

    async fn write(&mut self, operation: DbOperation) -> Result<(), MediaError> {
        let serialized_operation = serde_json::to_string(&operation)
            .map_err(MediaError::DbSerializationError)?;
        let line = format!("{}\n", serialized_operation);
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.db_path).await
            .map_err(MediaError::DbIOError)?;
        tokio::io::AsyncWriteExt::write_all(&mut file, line.as_bytes()).await
            .map_err(MediaError::DbIOError)?;
        tokio::io::AsyncWriteExt::flush(&mut file).await
            .map_err(MediaError::DbIOError)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    operations: Vec<DbOperation>,
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read_all(&self) -> Result<Vec<DbOperation>, MediaError> {
        Ok(self.operations.clone())
    }

    async fn write(&mut self, operation: DbOperation) -> Result<(), MediaError> {
        self.operations.push(operation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_storage_replays_written_operations() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.json");
        std::fs::write(&db_path, "").unwrap();

        let mut storage = FileStorage::new(db_path.clone());
        storage.write(DbOperation::DeleteAsset { id: 7 }).await.unwrap();
        storage.write(DbOperation::SetAvatar { username: "bob".into(), storage_key: Some("a.png".into()) }).await.unwrap();

        let reopened = FileStorage::new(db_path);
        let operations = reopened.read_all().await.unwrap();
        assert_eq!(operations, vec![
            DbOperation::DeleteAsset { id: 7 },
            DbOperation::SetAvatar { username: "bob".into(), storage_key: Some("a.png".into()) },
        ]);
    }

    #[tokio::test]
    async fn file_storage_rejects_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("db.json");
        std::fs::write(&db_path, "not json\n").unwrap();

        let storage = FileStorage::new(db_path);
        let result = storage.read_all().await;
        assert!(matches!(result, Err(MediaError::DbSerializationError(_))));
    }
}
