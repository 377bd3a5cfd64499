use std::collections::HashMap;

use tokio::sync::RwLock;

use pocketbook_core::records::{RecordKey, RecordStore, StoreError};

#[derive(Default)]
pub struct InMemoryRecordStore {
    documents: RwLock<HashMap<RecordKey, Vec<String>>>,
}

impl InMemoryRecordStore {
    pub fn with_records<I, V>(key: RecordKey, records: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut store = Self::default();
        store.documents.get_mut().insert(key, records.into_iter().map(Into::into).collect());
        store
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, key: &RecordKey) -> Result<Vec<String>, StoreError> {
        let documents = self.documents.read().await;
        documents.get(key).cloned().ok_or(StoreError::NotFound)
    }

    async fn append(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        documents.entry(key.clone()).or_default().push(value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &RecordKey, value: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let records = documents.get_mut(key).ok_or(StoreError::NotFound)?;
        records.retain(|record| record != value);
        Ok(())
    }
}
