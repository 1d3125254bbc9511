//! Transactional persistence for records and assets.
//!
//! A record and all its referenced assets commit atomically or not at all: a
//! partially-ingested record is never observable through the read interface.
//! `put` is idempotent - inserting a record whose fingerprint already exists
//! is a no-op returning the existing id. Assets are stored once per
//! fingerprint and shared by every record that references them.
//!
//! Rows are write-once: nothing here updates or deletes committed content.
//! Retention of orphaned assets is an external sweep, not a pipeline concern.

mod error;
mod repository;

pub use error::StoreError;
pub use repository::RecordStore;

use std::collections::BTreeMap;

use sqlx::Row;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::dedup::Fingerprint;
use crate::extract::DraftRecord;
use crate::normalize::NormalizedImage;

/// Result of a `put` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOutcome {
    /// Whether a new record row was written.
    pub new: bool,
    /// Id of the (new or pre-existing) record.
    pub id: i64,
}

/// A normalized asset staged for persistence, with its origin.
#[derive(Debug, Clone)]
pub struct NewAsset {
    /// URI the asset was fetched from.
    pub origin_uri: String,
    /// The normalized image payload and pixel fingerprint.
    pub image: NormalizedImage,
}

/// A record as stored.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// Row id; the external identity handed back to callers.
    pub id: i64,
    /// Content fingerprint (dedup key).
    pub fingerprint: Fingerprint,
    /// URI the source document was fetched from.
    pub source_uri: String,
    /// Extracted field mapping.
    pub fields: BTreeMap<String, String>,
    /// Row ids of referenced assets.
    pub asset_ids: Vec<i64>,
    /// Commit timestamp (SQLite `datetime('now')`).
    pub created_at: String,
}

/// An asset as stored.
#[derive(Debug, Clone)]
pub struct StoredAsset {
    /// Row id.
    pub id: i64,
    /// Pixel-buffer fingerprint (dedup key).
    pub fingerprint: Fingerprint,
    /// URI the asset was first fetched from.
    pub origin_uri: String,
    /// Canonical encoding name.
    pub format: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Canonically encoded payload.
    pub bytes: Vec<u8>,
}

/// Store facade over the SQLite database.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persists a record and its assets in one transaction.
    ///
    /// Idempotent: if the record fingerprint already exists, nothing is
    /// written and the existing id is returned with `new: false`. Assets
    /// whose fingerprint already exists are re-referenced, not re-inserted.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if no connection can be obtained;
    /// [`StoreError::TransactionFailed`] if any statement or the commit
    /// fails (nothing is left behind in that case).
    #[instrument(skip(self, record, assets), fields(fingerprint = %fingerprint, assets = assets.len()))]
    pub async fn put(
        &self,
        record: &DraftRecord,
        fingerprint: Fingerprint,
        assets: &[NewAsset],
    ) -> Result<PutOutcome, StoreError> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx(&e))?;

        // Idempotency check inside the transaction so concurrent writers
        // race on the unique index, not on a stale read.
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM records WHERE fingerprint = ?")
                .bind(fingerprint.to_hex())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::from_sqlx(&e))?;

        if let Some(id) = existing {
            debug!(id, "record fingerprint already stored");
            return Ok(PutOutcome { new: false, id });
        }

        let fields_json = serde_json::to_string(&record.fields)
            .map_err(|e| StoreError::transaction_failed(e.to_string()))?;

        let record_id = sqlx::query(
            "INSERT INTO records (fingerprint, source_uri, fields) VALUES (?, ?, ?)",
        )
        .bind(fingerprint.to_hex())
        .bind(&record.source_uri)
        .bind(&fields_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::from_sqlx(&e))?
        .last_insert_rowid();

        for asset in assets {
            let asset_id = self.upsert_asset(&mut tx, asset).await?;
            sqlx::query(
                "INSERT OR IGNORE INTO record_assets (record_id, asset_id) VALUES (?, ?)",
            )
            .bind(record_id)
            .bind(asset_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::from_sqlx(&e))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::transaction_failed(e.to_string()))?;

        debug!(record_id, "record committed");
        Ok(PutOutcome {
            new: true,
            id: record_id,
        })
    }

    /// Inserts an asset if its fingerprint is new, returning the row id
    /// either way.
    async fn upsert_asset(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        asset: &NewAsset,
    ) -> Result<i64, StoreError> {
        let fingerprint_hex = asset.image.fingerprint.to_hex();

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM assets WHERE fingerprint = ?")
                .bind(&fingerprint_hex)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| StoreError::from_sqlx(&e))?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let id = sqlx::query(
            "INSERT INTO assets (fingerprint, origin_uri, format, width, height, bytes) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&fingerprint_hex)
        .bind(&asset.origin_uri)
        .bind(asset.image.format)
        .bind(i64::from(asset.image.width))
        .bind(i64::from(asset.image.height))
        .bind(&asset.image.bytes)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::from_sqlx(&e))?
        .last_insert_rowid();

        Ok(id)
    }

    /// Looks up a record by fingerprint.
    ///
    /// # Errors
    ///
    /// Propagates store errors; a missing record is `Ok(None)`.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn get(&self, fingerprint: Fingerprint) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, fingerprint, source_uri, fields, created_at FROM records \
             WHERE fingerprint = ?",
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::from_sqlx(&e))?;

        let Some(row) = row else { return Ok(None) };

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::from_sqlx(&e))?;
        let source_uri: String = row
            .try_get("source_uri")
            .map_err(|e| StoreError::from_sqlx(&e))?;
        let fields_json: String = row
            .try_get("fields")
            .map_err(|e| StoreError::from_sqlx(&e))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::from_sqlx(&e))?;

        let fields: BTreeMap<String, String> = serde_json::from_str(&fields_json)
            .map_err(|e| StoreError::transaction_failed(format!("corrupt fields column: {e}")))?;

        let asset_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT asset_id FROM record_assets WHERE record_id = ? ORDER BY asset_id",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| StoreError::from_sqlx(&e))?;

        Ok(Some(StoredRecord {
            id,
            fingerprint,
            source_uri,
            fields,
            asset_ids,
            created_at,
        }))
    }

    /// Looks up an asset by pixel fingerprint.
    ///
    /// # Errors
    ///
    /// Propagates store errors; a missing asset is `Ok(None)`.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn get_asset(
        &self,
        fingerprint: Fingerprint,
    ) -> Result<Option<StoredAsset>, StoreError> {
        let row = sqlx::query(
            "SELECT id, origin_uri, format, width, height, bytes FROM assets \
             WHERE fingerprint = ?",
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StoreError::from_sqlx(&e))?;

        let Some(row) = row else { return Ok(None) };

        let width: i64 = row
            .try_get("width")
            .map_err(|e| StoreError::from_sqlx(&e))?;
        let height: i64 = row
            .try_get("height")
            .map_err(|e| StoreError::from_sqlx(&e))?;

        Ok(Some(StoredAsset {
            id: row.try_get("id").map_err(|e| StoreError::from_sqlx(&e))?,
            fingerprint,
            origin_uri: row
                .try_get("origin_uri")
                .map_err(|e| StoreError::from_sqlx(&e))?,
            format: row
                .try_get("format")
                .map_err(|e| StoreError::from_sqlx(&e))?,
            width: u32::try_from(width)
                .map_err(|_| StoreError::transaction_failed("corrupt width column"))?,
            height: u32::try_from(height)
                .map_err(|_| StoreError::transaction_failed("corrupt height column"))?,
            bytes: row
                .try_get("bytes")
                .map_err(|e| StoreError::from_sqlx(&e))?,
        }))
    }

    /// Returns whether a record with this fingerprint has been ingested.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn contains(&self, fingerprint: Fingerprint) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE fingerprint = ?")
            .bind(fingerprint.to_hex())
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| StoreError::from_sqlx(&e))?;
        Ok(count > 0)
    }

    /// Returns the total number of stored records.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn count_records(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| StoreError::from_sqlx(&e))
    }

    /// Returns the total number of stored assets.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn count_assets(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| StoreError::from_sqlx(&e))
    }
}
