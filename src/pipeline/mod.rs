//! Pipeline coordinator: concurrency, single-flight dedup, classification.
//!
//! The coordinator drives each submitted document through the pipeline
//! stages in strict order - Fetch → Extract → Dedup → Normalize → Persist -
//! under a bounded worker pool. Once extraction yields a fingerprint, a
//! per-fingerprint single-flight gate guarantees at most one concurrent run
//! per fingerprint: a second submission of the same content waits for the
//! first and adopts its outcome instead of duplicating work.
//!
//! Retry composition is strictly local per stage: the fetcher retries its own
//! transient failures internally, the coordinator retries only the persist
//! stage (once, on `TransactionFailed`), and a persist retry never re-runs a
//! fetch. Terminal extract/image errors are never retried at all.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raito_ingest::pipeline::{Coordinator, CoordinatorConfig};
//! use raito_ingest::store::Store;
//! use raito_ingest::extract::Ruleset;
//! use raito_ingest::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let coordinator = Coordinator::new(Store::new(db), CoordinatorConfig::default())?;
//! let ruleset = serde_json::from_str::<Ruleset>(r#"{"fields":[]}"#)?.compile()?;
//! let outcome = coordinator.submit("http://example.test/a", &ruleset).await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod error;
mod flight;

pub use error::{FailureKind, IngestError};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use self::flight::{FlightResult, FlightRole, SingleFlight};
use crate::dedup::Fingerprint;
use crate::extract::{CompiledRuleset, DraftRecord, extract};
use crate::fetch::{FetchError, FetchOptions, Fetcher};
use crate::normalize::{DEFAULT_MAX_PIXEL_AREA, ImageNormalizer};
use crate::store::{NewAsset, RecordStore, Store, StoreError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Pipeline stages, in execution order.
///
/// Within one document's run, stages execute strictly in this order; no
/// ordering is guaranteed between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Waiting for a worker permit.
    Queued,
    /// Retrieving the source document.
    Fetching,
    /// Parsing and applying the ruleset.
    Extracting,
    /// Computing the fingerprint and entering the single-flight gate.
    Deduplicating,
    /// Fetching and normalizing referenced assets.
    Normalizing,
    /// Committing the record and assets.
    Persisting,
    /// Terminal success state.
    Done,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Deduplicating => "deduplicating",
            Self::Normalizing => "normalizing",
            Self::Persisting => "persisting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-document result of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The record was newly written.
    Stored {
        /// Id of the committed record.
        record_id: i64,
    },
    /// Identical content was already ingested (by an earlier run or by a
    /// concurrent leader).
    Duplicate {
        /// Id of the pre-existing record.
        record_id: i64,
    },
    /// The run failed terminally.
    Failed {
        /// Classified failure, see [`FailureKind`].
        kind: FailureKind,
    },
}

/// Error type for coordinator construction.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build fetcher: {0}")]
    Fetcher(#[from] FetchError),
}

/// Statistics from ingestion runs.
///
/// Uses atomic counters for thread-safe updates from concurrent workers.
#[derive(Debug, Default)]
pub struct IngestStats {
    stored: AtomicUsize,
    duplicate: AtomicUsize,
    failed: AtomicUsize,
}

impl IngestStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs that stored a new record.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    /// Number of runs that resolved to an already-ingested record.
    #[must_use]
    pub fn duplicate(&self) -> usize {
        self.duplicate.load(Ordering::SeqCst)
    }

    /// Number of runs that failed terminally.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Total runs completed.
    #[must_use]
    pub fn total(&self) -> usize {
        self.stored() + self.duplicate() + self.failed()
    }

    fn record(&self, outcome: &IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Stored { .. } => &self.stored,
            IngestOutcome::Duplicate { .. } => &self.duplicate,
            IngestOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Maximum number of documents in flight (1-100).
    pub concurrency: usize,
    /// Options for document and asset fetches.
    pub fetch: FetchOptions,
    /// Pixel-area bound enforced by the image normalizer.
    pub max_pixel_area: u64,
    /// Optional per-run deadline; an expired run fails as cancelled.
    pub deadline: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch: FetchOptions::default(),
            max_pixel_area: DEFAULT_MAX_PIXEL_AREA,
            deadline: None,
        }
    }
}

/// Orchestrates ingestion runs across many documents concurrently.
///
/// # Concurrency Model
///
/// - Each submission acquires a semaphore permit for its whole run
/// - Workers share no mutable state except the store and the single-flight
///   table; records and assets are write-once after commit
/// - Fetch and commit are the only suspension points; parsing, hashing and
///   image work run to completion once started
pub struct Coordinator {
    store: Arc<dyn RecordStore>,
    fetcher: Fetcher,
    normalizer: ImageNormalizer,
    semaphore: Arc<Semaphore>,
    flights: SingleFlight,
    stats: IngestStats,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl Coordinator {
    /// Creates a coordinator over a concrete [`Store`].
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::InvalidConcurrency`] if the configured
    /// concurrency is outside 1-100, or [`CoordinatorError::Fetcher`] if the
    /// HTTP client cannot be built.
    pub fn new(store: Store, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        Self::with_record_store(Arc::new(store), config)
    }

    /// Creates a coordinator over any [`RecordStore`] implementation.
    ///
    /// # Errors
    ///
    /// Same as [`Coordinator::new`].
    pub fn with_record_store(
        store: Arc<dyn RecordStore>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(CoordinatorError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        debug!(
            concurrency = config.concurrency,
            max_pixel_area = config.max_pixel_area,
            deadline = ?config.deadline,
            "creating coordinator"
        );

        Ok(Self {
            store,
            fetcher: Fetcher::new(config.fetch)?,
            normalizer: ImageNormalizer::new(config.max_pixel_area),
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            flights: SingleFlight::new(),
            stats: IngestStats::new(),
            concurrency: config.concurrency,
            deadline: config.deadline,
        })
    }

    /// Returns the configured concurrency cap.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns cumulative run statistics.
    #[must_use]
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Number of fingerprints currently in flight (diagnostics).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Runs one document through the pipeline end-to-end.
    ///
    /// Never returns an error: every failure is classified into
    /// [`IngestOutcome::Failed`].
    #[instrument(skip(self, ruleset))]
    pub async fn submit(&self, uri: &str, ruleset: &CompiledRuleset) -> IngestOutcome {
        debug!(stage = %IngestStage::Queued, "submission accepted");
        let Ok(_permit) = self.semaphore.acquire().await else {
            // Closed semaphore means the coordinator is being torn down
            return self.finish(IngestOutcome::Failed {
                kind: FailureKind::Internal,
            });
        };

        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.run(uri, ruleset)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::Cancelled),
            },
            None => self.run(uri, ruleset).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(uri, error = %error, kind = %error.kind(), "ingestion failed");
                IngestOutcome::Failed { kind: error.kind() }
            }
        };
        self.finish(outcome)
    }

    /// Submits many documents concurrently under the shared worker cap.
    ///
    /// Outcomes are returned in submission order. A panicked worker task is
    /// reported as [`FailureKind::Internal`] without failing the batch.
    pub async fn submit_many(
        self: &Arc<Self>,
        uris: Vec<String>,
        ruleset: Arc<CompiledRuleset>,
    ) -> Vec<IngestOutcome> {
        info!(count = uris.len(), "starting batch ingestion");

        let mut handles = Vec::with_capacity(uris.len());
        for uri in uris {
            let coordinator = Arc::clone(self);
            let ruleset = Arc::clone(&ruleset);
            handles.push(tokio::spawn(async move {
                coordinator.submit(&uri, &ruleset).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => {
                    warn!(error = %error, "ingestion task panicked");
                    outcomes.push(IngestOutcome::Failed {
                        kind: FailureKind::Internal,
                    });
                }
            }
        }

        info!(
            stored = self.stats.stored(),
            duplicate = self.stats.duplicate(),
            failed = self.stats.failed(),
            "batch ingestion complete"
        );
        outcomes
    }

    fn finish(&self, outcome: IngestOutcome) -> IngestOutcome {
        self.stats.record(&outcome);
        outcome
    }

    /// The pipeline proper: fetch, extract, dedup gate, then lead or follow.
    async fn run(
        &self,
        uri: &str,
        ruleset: &CompiledRuleset,
    ) -> Result<IngestOutcome, IngestError> {
        debug!(stage = %IngestStage::Fetching, uri);
        let document = self.fetcher.fetch(uri).await?;

        debug!(stage = %IngestStage::Extracting, uri);
        let record = extract(&document, ruleset)?;

        debug!(stage = %IngestStage::Deduplicating, uri);
        let fingerprint = record.fingerprint();

        match self.flights.begin(fingerprint) {
            FlightRole::Leader(guard) => {
                let result = self.lead(&record, fingerprint).await;
                match &result {
                    Ok(
                        IngestOutcome::Stored { record_id }
                        | IngestOutcome::Duplicate { record_id },
                    ) => guard.resolve(FlightResult::Resolved {
                        record_id: *record_id,
                    }),
                    Ok(IngestOutcome::Failed { kind }) => {
                        guard.resolve(FlightResult::Failed { kind: *kind });
                    }
                    Err(error) => guard.resolve(FlightResult::Failed { kind: error.kind() }),
                }
                result
            }
            FlightRole::Follower(mut receiver) => {
                debug!(%fingerprint, "identical content in flight, awaiting leader");
                let adopted = match receiver.wait_for(Option::is_some).await {
                    Ok(value) => *value,
                    // Sender gone without a value: leader torn down
                    Err(_) => None,
                };
                match adopted {
                    Some(FlightResult::Resolved { record_id }) => {
                        Ok(IngestOutcome::Duplicate { record_id })
                    }
                    Some(FlightResult::Failed { kind }) => Ok(IngestOutcome::Failed { kind }),
                    None => Ok(IngestOutcome::Failed {
                        kind: FailureKind::Cancelled,
                    }),
                }
            }
        }
    }

    /// Leader path: store check, asset work, transactional persist.
    async fn lead(
        &self,
        record: &DraftRecord,
        fingerprint: Fingerprint,
    ) -> Result<IngestOutcome, IngestError> {
        // Known fingerprint short-circuits before any asset work
        if let Some(existing) = self.store.get(fingerprint).await? {
            debug!(record_id = existing.id, "fingerprint already stored");
            return Ok(IngestOutcome::Duplicate {
                record_id: existing.id,
            });
        }

        debug!(stage = %IngestStage::Normalizing, assets = record.asset_refs.len());
        let mut assets = Vec::with_capacity(record.asset_refs.len());
        for asset_uri in &record.asset_refs {
            let payload = self.fetcher.fetch(asset_uri).await?;
            let image = self.normalizer.normalize(&payload.bytes)?;
            assets.push(NewAsset {
                origin_uri: asset_uri.clone(),
                image,
            });
        }

        debug!(stage = %IngestStage::Persisting);
        let put = match self.store.put(record, fingerprint, &assets).await {
            Ok(outcome) => outcome,
            // One persist-stage retry; earlier stages are never re-run
            Err(StoreError::TransactionFailed { detail }) => {
                warn!(%detail, "persist failed, retrying the transaction once");
                self.store.put(record, fingerprint, &assets).await?
            }
            Err(error) => return Err(error.into()),
        };

        debug!(stage = %IngestStage::Done, record_id = put.id, new = put.new);
        if put.new {
            Ok(IngestOutcome::Stored { record_id: put.id })
        } else {
            Ok(IngestOutcome::Duplicate { record_id: put.id })
        }
    }
}
