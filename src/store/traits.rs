//! `RecordStore` trait: single async interface for all persistence.
//!
//! Reads are eager: a returned `ServiceRequest` always carries its
//! requirements, confirmations, and deployments. Writes that guard
//! lifecycle invariants (status transitions, confirmation uniqueness, the
//! deploy unit) are atomic inside the backend.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ConfirmedWorker, DeployedWorker, RequestStatus, ServiceRequest, SkillType, Worker};

/// Backend-agnostic record store covering requests, workers, and
/// assignment records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Requests ────────────────────────────────────────────────────

    /// Insert a new request with its requirements.
    async fn insert_request(&self, request: &ServiceRequest) -> Result<(), StoreError>;

    /// Get a request by ID, fully materialized.
    async fn get_request(&self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError>;

    /// Test-and-set status transition: moves to `to` only if the current
    /// status is one of `from`, in a single atomic write. Returns whether
    /// the transition happened.
    async fn transition_request(
        &self,
        id: Uuid,
        from: &[RequestStatus],
        to: RequestStatus,
    ) -> Result<bool, StoreError>;

    /// Test-and-set DEPLOYED → COMPLETED, recording the completion time.
    async fn mark_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// All requests currently in one of the given statuses.
    async fn requests_with_status(
        &self,
        statuses: &[RequestStatus],
    ) -> Result<Vec<ServiceRequest>, StoreError>;

    // ── Workers ─────────────────────────────────────────────────────

    /// Insert (or replace) a worker profile with its skills.
    async fn upsert_worker(&self, worker: &Worker) -> Result<(), StoreError>;

    /// Get a worker by ID.
    async fn get_worker(&self, id: Uuid) -> Result<Option<Worker>, StoreError>;

    /// Toggle the availability flag.
    async fn set_worker_available(&self, id: Uuid, available: bool) -> Result<(), StoreError>;

    /// Toggle the admin verification flag.
    async fn set_worker_verified(&self, id: Uuid, verified: bool) -> Result<(), StoreError>;

    /// Toggle the account-level blocked flag.
    async fn set_worker_blocked(&self, id: Uuid, blocked: bool) -> Result<(), StoreError>;

    /// Verified, available workers declaring any of the given skill types.
    /// Admission gates only; no distance or commitment filtering here.
    async fn find_matching_workers(&self, skills: &[SkillType]) -> Result<Vec<Worker>, StoreError>;

    // ── Confirmations ───────────────────────────────────────────────

    /// Insert a confirmation, conditional on the request currently sitting
    /// in one of `allowed` statuses. Both the status guard and the
    /// uniqueness check run inside the same atomic unit as the insert.
    /// Returns `false` (writing nothing) when the status refuses the
    /// insert; a duplicate (request, worker) pair returns
    /// `StoreError::Constraint`.
    async fn insert_confirmation(
        &self,
        record: &ConfirmedWorker,
        allowed: &[RequestStatus],
    ) -> Result<bool, StoreError>;

    // ── Deployments ─────────────────────────────────────────────────

    /// Deploy one confirmed worker: insert the deployment record and set
    /// the worker unavailable, atomically together. Returns `false` (and
    /// writes nothing) when the worker is already deployed on the request.
    async fn deploy_worker(&self, record: &DeployedWorker) -> Result<bool, StoreError>;

    /// Set `available = true` for every worker deployed on the request.
    /// Returns how many workers were released.
    async fn release_deployed_workers(&self, request_id: Uuid) -> Result<u64, StoreError>;

    // ── Commitments ─────────────────────────────────────────────────

    /// Authoritative per-worker check: does the worker hold a confirmation
    /// or deployment on any request with `end_date >= today` that is not
    /// COMPLETED? Consulted again at send time; never skipped.
    async fn has_active_commitment(
        &self,
        worker_id: Uuid,
        today: NaiveDate,
    ) -> Result<bool, StoreError>;

    /// Bulk variant of the commitment check, precomputed once per matching
    /// pass.
    async fn committed_worker_ids(&self, today: NaiveDate) -> Result<HashSet<Uuid>, StoreError>;
}
