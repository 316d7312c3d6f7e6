use crate::record::error::{RecordError, RecordResult};
use crate::record::types::{InstallRecord, RecordUpdate};
use async_trait::async_trait;
use dashmap::DashMap;

/// Persisted install records keyed by record id
#[async_trait]
pub trait InstallRecordStore: Send + Sync {
    async fn insert(&self, record: &InstallRecord) -> RecordResult<()>;

    async fn update(&self, record: &InstallRecord) -> RecordResult<()>;

    async fn get(&self, id: &str) -> RecordResult<Option<InstallRecord>>;

    async fn list(&self) -> RecordResult<Vec<InstallRecord>>;

    /// Apply a restricted update and return the stored result
    async fn apply(&self, id: &str, update: &RecordUpdate) -> RecordResult<InstallRecord> {
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| RecordError::NotFound(id.to_string()))?;
        update.apply_to(&mut record);
        self.update(&record).await?;
        Ok(record)
    }
}

/// Process-local store, used when no database is configured
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, InstallRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstallRecordStore for MemoryRecordStore {
    async fn insert(&self, record: &InstallRecord) -> RecordResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(RecordError::AlreadyExists(record.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, record: &InstallRecord) -> RecordResult<()> {
        match self.records.get_mut(&record.id) {
            Some(mut stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(RecordError::NotFound(record.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> RecordResult<Option<InstallRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> RecordResult<Vec<InstallRecord>> {
        let mut records: Vec<InstallRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::types::InstallationStatus;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryRecordStore::new();
        let record = InstallRecord::new(1, "Game", "/c", "game.exe");

        store.insert(&record).await.unwrap();
        assert!(matches!(
            store.insert(&record).await,
            Err(RecordError::AlreadyExists(_))
        ));

        let updated = store
            .apply(&record.id, &RecordUpdate::status(InstallationStatus::Downloading))
            .await
            .unwrap();
        assert_eq!(updated.status, InstallationStatus::Downloading);
        assert_eq!(store.get(&record.id).await.unwrap(), Some(updated));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_unknown_record() {
        let store = MemoryRecordStore::new();
        let result = store.apply("missing", &RecordUpdate::progress(1, 2)).await;
        assert!(matches!(result, Err(RecordError::NotFound(_))));
    }
}
