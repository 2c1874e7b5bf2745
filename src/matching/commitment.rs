//! Active-commitment lookups over the record store.
//!
//! A worker is committed while they hold a confirmation or deployment on
//! any request whose work period has not ended (`end_date >= today`) and
//! whose status is not COMPLETED. Date overlap with a new request is
//! deliberately not considered: one engagement at a time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::RecordStore;

/// Thin view over the store's commitment queries.
///
/// Discovery passes use the precomputed bulk set; dispatch re-checks each
/// worker individually against the store right before sending.
#[derive(Clone)]
pub struct CommitmentTracker {
    store: Arc<dyn RecordStore>,
}

impl CommitmentTracker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Authoritative per-worker check, evaluated at call time.
    pub async fn is_committed(&self, worker_id: Uuid, today: NaiveDate) -> Result<bool, StoreError> {
        self.store.has_active_commitment(worker_id, today).await
    }

    /// Snapshot of every committed worker, for bulk filtering during one
    /// matching pass.
    pub async fn committed_ids(&self, today: NaiveDate) -> Result<HashSet<Uuid>, StoreError> {
        self.store.committed_worker_ids(today).await
    }
}
