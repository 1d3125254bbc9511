//! Fingerprint-keyed single-flight table.
//!
//! Enforces at-most-one concurrent pipeline run per fingerprint: the first
//! worker to register a fingerprint becomes the leader; every other worker
//! arriving while the flight is open becomes a follower and adopts the
//! leader's result instead of re-running the pipeline.
//!
//! The table entry is removed on resolution and never retained - later
//! submissions of an already-ingested fingerprint are answered by the store,
//! not by this table. Cleanup is guaranteed on every exit path (success,
//! failure, cancellation) by a drop guard: a leader dropped without an
//! explicit resolution resolves the flight as cancelled.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::debug;

use super::error::FailureKind;
use crate::dedup::Fingerprint;

/// Result a leader publishes to its followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlightResult {
    /// The leader committed (or found) the record with this id.
    Resolved {
        /// Stored record id followers report as their duplicate target.
        record_id: i64,
    },
    /// The leader failed; followers adopt the same failure kind.
    Failed {
        /// Classified failure.
        kind: FailureKind,
    },
}

/// Role assigned to a worker entering a flight.
pub(crate) enum FlightRole {
    /// This worker runs the pipeline; it must resolve the guard.
    Leader(FlightGuard),
    /// Another worker is already running this fingerprint; await its result.
    Follower(watch::Receiver<Option<FlightResult>>),
}

/// Concurrent mapping from fingerprint to in-flight resolution channel.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    table: Arc<DashMap<Fingerprint, watch::Receiver<Option<FlightResult>>>>,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a worker for the given fingerprint.
    pub(crate) fn begin(&self, fingerprint: Fingerprint) -> FlightRole {
        match self.table.entry(fingerprint) {
            Entry::Occupied(entry) => {
                debug!(?fingerprint, "joining in-flight ingestion as follower");
                FlightRole::Follower(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(None);
                entry.insert(receiver);
                FlightRole::Leader(FlightGuard {
                    fingerprint,
                    table: Arc::clone(&self.table),
                    sender: Some(sender),
                })
            }
        }
    }

    /// Number of currently open flights (diagnostics only).
    pub(crate) fn in_flight(&self) -> usize {
        self.table.len()
    }
}

/// Leader-side handle; resolving (or dropping) it closes the flight.
pub(crate) struct FlightGuard {
    fingerprint: Fingerprint,
    table: Arc<DashMap<Fingerprint, watch::Receiver<Option<FlightResult>>>>,
    sender: Option<watch::Sender<Option<FlightResult>>>,
}

impl FlightGuard {
    /// Publishes the result and removes the table entry.
    pub(crate) fn resolve(mut self, result: FlightResult) {
        self.finish(result);
    }

    fn finish(&mut self, result: FlightResult) {
        if let Some(sender) = self.sender.take() {
            // Remove before publishing: a submitter arriving after this
            // point must consult the store, not a spent flight.
            self.table.remove(&self.fingerprint);
            // Send can only fail when no follower is waiting, which is fine.
            let _ = sender.send(Some(result));
            debug!(fingerprint = ?self.fingerprint, ?result, "flight resolved");
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Leader dropped without resolving: the run was cancelled or
        // panicked. Followers must not wait forever.
        self.finish(FlightResult::Failed {
            kind: FailureKind::Cancelled,
        });
    }
}
