//! Persistence seam for the coordinator.
//!
//! This trait keeps the concrete `Store` API intact while letting the
//! pipeline depend on an abstract transactional contract. Tests substitute a
//! failing implementation to exercise the coordinator's persist-retry path.

use async_trait::async_trait;

use super::{NewAsset, PutOutcome, Store, StoreError, StoredRecord};
use crate::dedup::Fingerprint;
use crate::extract::DraftRecord;

/// Data-access contract the coordinator requires from the store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a record and its assets atomically; idempotent on
    /// fingerprint.
    async fn put(
        &self,
        record: &DraftRecord,
        fingerprint: Fingerprint,
        assets: &[NewAsset],
    ) -> Result<PutOutcome, StoreError>;

    /// Looks up a record by fingerprint.
    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredRecord>, StoreError>;

    /// Returns whether a record with this fingerprint has been ingested.
    async fn contains(&self, fingerprint: Fingerprint) -> Result<bool, StoreError>;
}

#[async_trait]
impl RecordStore for Store {
    async fn put(
        &self,
        record: &DraftRecord,
        fingerprint: Fingerprint,
        assets: &[NewAsset],
    ) -> Result<PutOutcome, StoreError> {
        Store::put(self, record, fingerprint, assets).await
    }

    async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredRecord>, StoreError> {
        Store::get(self, fingerprint).await
    }

    async fn contains(&self, fingerprint: Fingerprint) -> Result<bool, StoreError> {
        Store::contains(self, fingerprint).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_record_store_trait_delegates_to_store() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let record = DraftRecord {
            source_uri: "http://example.test/seam".to_string(),
            fields: std::collections::BTreeMap::new(),
            asset_refs: Vec::new(),
        };
        let fp = record.fingerprint();

        let repo: &dyn RecordStore = &store;
        let outcome = repo.put(&record, fp, &[]).await.unwrap();
        assert!(outcome.new);
        assert!(repo.contains(fp).await.unwrap());
        assert_eq!(repo.get(fp).await.unwrap().unwrap().id, outcome.id);
    }
}
