//! Candidate discovery for one request.
//!
//! Pulls the admission-gated worker pool from the store, runs the full
//! eligibility filter against a bulk commitment snapshot, ranks by
//! distance, and caps the shortlist at a multiple of the request's
//! headcount. Dispatch re-checks each shortlisted worker before sending.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::error::StoreError;
use crate::matching::commitment::CommitmentTracker;
use crate::matching::eligibility::check_eligibility;
use crate::model::{ServiceRequest, Worker};
use crate::store::RecordStore;

/// A shortlisted worker with their distance to the work site.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub worker: Worker,
    pub distance_km: f64,
}

/// Result of a discovery pass.
#[derive(Debug)]
pub enum LocateOutcome {
    /// Ranked shortlist, nearest first. May be empty.
    Candidates(Vec<Candidate>),
    /// The request has no usable coordinates; no pass was attempted.
    Unlocatable,
}

/// Discovery-side matcher.
pub struct WorkerLocator {
    store: Arc<dyn RecordStore>,
    commitments: CommitmentTracker,
    notify_radius_km: f64,
    candidate_multiplier: usize,
}

impl WorkerLocator {
    pub fn new(store: Arc<dyn RecordStore>, config: &DispatchConfig) -> Self {
        Self {
            commitments: CommitmentTracker::new(Arc::clone(&store)),
            store,
            notify_radius_km: config.notify_radius_km,
            candidate_multiplier: config.candidate_multiplier,
        }
    }

    /// Find eligible workers for the request, nearest first, capped at
    /// `candidate_multiplier x total_required`.
    pub async fn locate(
        &self,
        request: &ServiceRequest,
        today: NaiveDate,
    ) -> Result<LocateOutcome, StoreError> {
        if request.location.valid_coordinates().is_none() {
            debug!(request_id = %request.id, "Request has no usable coordinates");
            return Ok(LocateOutcome::Unlocatable);
        }

        let required = request.required_skills();
        let pool = self.store.find_matching_workers(&required).await?;
        let committed = self.commitments.committed_ids(today).await?;

        let mut candidates = Vec::new();
        for worker in pool {
            let is_committed = committed.contains(&worker.id);
            match check_eligibility(&worker, &required, request, self.notify_radius_km, is_committed)
            {
                Ok(distance_km) => candidates.push(Candidate {
                    worker,
                    distance_km,
                }),
                Err(reason) => {
                    debug!(worker_id = %worker.id, %reason, "Worker filtered out");
                }
            }
        }

        // Nearest first; worker id breaks exact ties deterministically.
        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.worker.id.cmp(&b.worker.id))
        });

        let cap = self.candidate_multiplier * request.total_required() as usize;
        candidates.truncate(cap);

        debug!(
            request_id = %request.id,
            candidates = candidates.len(),
            cap,
            "Discovery pass finished"
        );
        Ok(LocateOutcome::Candidates(candidates))
    }
}
