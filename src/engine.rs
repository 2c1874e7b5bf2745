//! The dispatch engine: request lifecycle operations end to end.
//!
//! Every operation is a short orchestration over the injected
//! collaborators: the record store holds the authoritative state and the
//! concurrency guards, the notifier carries offers and deployment events,
//! and the optional geocoder resolves addresses at submission.
//!
//! Transitions go through the store's test-and-set writes, so concurrent
//! callers race on the database row and exactly one wins. The eligibility
//! filter runs twice per worker by construction: once against a bulk
//! commitment snapshot during discovery, and once against live per-worker
//! state right before an offer is sent.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::{DispatchError, Result};
use crate::geocode::Geocoder;
use crate::matching::{
    check_eligibility, CommitmentTracker, ConfirmationStatus, LocateOutcome, WorkerLocator,
};
use crate::model::{
    Actor, ConfirmedWorker, DeployedWorker, NewRequest, RequestStatus, ServiceRequest, SkillType,
    Worker,
};
use crate::notify::{DispatchEvent, Notifier, Topic};
use crate::store::RecordStore;

/// Request lifecycle and matching engine.
pub struct DispatchEngine {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    geocoder: Option<Arc<dyn Geocoder>>,
    locator: WorkerLocator,
    commitments: CommitmentTracker,
    config: DispatchConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            locator: WorkerLocator::new(Arc::clone(&store), &config),
            commitments: CommitmentTracker::new(Arc::clone(&store)),
            store,
            notifier,
            geocoder: None,
            config,
        }
    }

    /// Attach an address-to-coordinate resolver used at submission time.
    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    // ── Request lifecycle ───────────────────────────────────────────

    /// Submit a new request. Lands in PENDING_ADMIN_APPROVAL.
    ///
    /// When no coordinates are given and a geocoder is attached, the
    /// address is resolved best-effort; a lookup failure degrades the
    /// request to a null location and never blocks submission.
    pub async fn submit_request(&self, mut input: NewRequest) -> Result<ServiceRequest> {
        if input.coordinates.is_none()
            && let Some(geocoder) = &self.geocoder
        {
            match geocoder.resolve(&input.address).await {
                Ok(coords) => input.coordinates = coords,
                Err(e) => {
                    warn!(address = %input.address, error = %e, "Geocode lookup failed");
                }
            }
        }

        let request = ServiceRequest::create(input)?;
        self.store.insert_request(&request).await?;
        info!(request_id = %request.id, customer_id = %request.customer_id, "Request submitted");
        Ok(request)
    }

    /// Approve a pending request and run the notification pass.
    ///
    /// The transition to ADMIN_APPROVED is test-and-set, so of two racing
    /// approvals exactly one proceeds to fan-out. A request whose location
    /// never resolved stays in ADMIN_APPROVED with zero offers sent.
    pub async fn approve_request(&self, request_id: Uuid, actor: &Actor) -> Result<ServiceRequest> {
        self.require_admin(actor, "approve requests")?;

        let moved = self
            .store
            .transition_request(
                request_id,
                &[RequestStatus::PendingAdminApproval],
                RequestStatus::AdminApproved,
            )
            .await?;
        if !moved {
            return Err(self.state_error(request_id, "approve").await?.into());
        }

        let request = self.load_request(request_id).await?;
        let notified = self.run_notification_pass(&request).await?;

        if let Some(count) = notified {
            // Fan-out completed (possibly to zero workers).
            self.store
                .transition_request(
                    request_id,
                    &[RequestStatus::AdminApproved],
                    RequestStatus::Notified,
                )
                .await?;
            info!(request_id = %request_id, offers = count, "Request approved and notified");
        } else {
            warn!(request_id = %request_id, "Request approved but unlocatable, no offers sent");
        }

        self.load_request(request_id).await
    }

    /// Reject a pending request. Terminal.
    pub async fn reject_request(&self, request_id: Uuid, actor: &Actor) -> Result<ServiceRequest> {
        self.require_admin(actor, "reject requests")?;

        let moved = self
            .store
            .transition_request(
                request_id,
                &[RequestStatus::PendingAdminApproval],
                RequestStatus::Rejected,
            )
            .await?;
        if !moved {
            return Err(self.state_error(request_id, "reject").await?.into());
        }
        info!(request_id = %request_id, "Request rejected");
        self.load_request(request_id).await
    }

    /// Cancel a request. Allowed for the owning customer or an admin, from
    /// any non-terminal status. Deployed workers are released.
    pub async fn cancel_request(&self, request_id: Uuid, actor: &Actor) -> Result<ServiceRequest> {
        let request = self.load_request(request_id).await?;
        self.require_owner_or_admin(&request, actor)?;

        const NON_TERMINAL: &[RequestStatus] = &[
            RequestStatus::Pending,
            RequestStatus::PendingAdminApproval,
            RequestStatus::AdminApproved,
            RequestStatus::Notified,
            RequestStatus::Confirmed,
            RequestStatus::Deployed,
        ];
        let moved = self
            .store
            .transition_request(request_id, NON_TERMINAL, RequestStatus::Cancelled)
            .await?;
        if !moved {
            return Err(self.state_error(request_id, "cancel").await?.into());
        }

        let released = self.store.release_deployed_workers(request_id).await?;
        info!(request_id = %request_id, released, "Request cancelled");
        self.load_request(request_id).await
    }

    /// Record a worker's confirmation of an offer.
    ///
    /// Idempotency is enforced by the store's atomic uniqueness check; a
    /// repeat confirmation surfaces as `DuplicateAction` with no state
    /// change. The first confirmation moves the request to CONFIRMED.
    pub async fn confirm_offer(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
    ) -> Result<ConfirmationStatus> {
        let request = self.load_request(request_id).await?;
        if !matches!(
            request.status,
            RequestStatus::Notified | RequestStatus::Confirmed
        ) {
            return Err(DispatchError::InvalidState {
                id: request_id,
                status: request.status,
                action: "confirm",
            }
            .into());
        }

        let worker = self.load_worker(worker_id).await?;
        if worker.blocked {
            return Err(DispatchError::Forbidden {
                actor: worker_id,
                action: "confirm offers",
            }
            .into());
        }
        if !worker.has_any_skill(&request.required_skills()) {
            return Err(DispatchError::Forbidden {
                actor: worker_id,
                action: "confirm this request",
            }
            .into());
        }

        let inserted = self
            .store
            .insert_confirmation(
                &ConfirmedWorker::new(request_id, worker_id),
                &[RequestStatus::Notified, RequestStatus::Confirmed],
            )
            .await
            .map_err(|e| match e {
                crate::error::StoreError::Constraint(_) => {
                    crate::error::Error::Dispatch(DispatchError::DuplicateAction {
                        request_id,
                        worker_id,
                    })
                }
                other => other.into(),
            })?;
        if !inserted {
            // Status moved on (e.g. a cancellation) between the read above
            // and the insert.
            return Err(self.state_error(request_id, "confirm").await?.into());
        }

        // First confirmation wins this transition; later ones find the
        // request already CONFIRMED, which is fine.
        self.store
            .transition_request(
                request_id,
                &[RequestStatus::Notified],
                RequestStatus::Confirmed,
            )
            .await?;

        info!(request_id = %request_id, worker_id = %worker_id, "Offer confirmed");
        self.confirmation_status(request_id).await
    }

    /// Deploy confirmed workers onto the request.
    ///
    /// Selection walks the requirement lines in order and fills each from
    /// the confirmations in arrival order, so a multi-skilled worker
    /// occupies exactly one slot (the first line that needs them). A
    /// partial crew deploys; re-running is harmless because the store's
    /// deploy unit refuses duplicates without writing.
    pub async fn deploy_crew(&self, request_id: Uuid, actor: &Actor) -> Result<Vec<Uuid>> {
        self.require_admin(actor, "deploy crews")?;

        let request = self.load_request(request_id).await?;
        if !matches!(
            request.status,
            RequestStatus::Notified | RequestStatus::Confirmed | RequestStatus::Deployed
        ) {
            return Err(DispatchError::InvalidState {
                id: request_id,
                status: request.status,
                action: "deploy",
            }
            .into());
        }
        if request.confirmed.is_empty() {
            return Err(DispatchError::InvalidState {
                id: request_id,
                status: request.status,
                action: "deploy without confirmations",
            }
            .into());
        }

        let workers = self.confirmed_workers(&request).await?;
        for record in &request.confirmed {
            if workers
                .get(&record.worker_id)
                .is_some_and(|w| w.blocked)
            {
                warn!(request_id = %request_id, worker_id = %record.worker_id, "Skipping blocked worker at deploy");
            }
        }

        let selected = select_crew(&request, &workers);
        for worker_id in &selected {
            let newly = self
                .store
                .deploy_worker(&DeployedWorker::new(request_id, *worker_id))
                .await?;
            if !newly {
                info!(request_id = %request_id, worker_id = %worker_id, "Worker already deployed, skipping");
            }
        }

        self.store
            .transition_request(
                request_id,
                &[RequestStatus::Notified, RequestStatus::Confirmed],
                RequestStatus::Deployed,
            )
            .await?;

        let request = self.load_request(request_id).await?;
        let deployed_ids: Vec<Uuid> = request.deployed.iter().map(|d| d.worker_id).collect();

        let event = DispatchEvent::CrewDeployed {
            request_id,
            worker_ids: deployed_ids.clone(),
        };
        if let Err(e) = self
            .notifier
            .publish(Topic::Customer(request.customer_id), &event)
            .await
        {
            warn!(request_id = %request_id, error = %e, "Deployment notification failed");
        }

        info!(request_id = %request_id, crew = deployed_ids.len(), "Crew deployed");
        Ok(deployed_ids)
    }

    /// Mark the work complete. Only the owning customer (or an admin) may
    /// complete, and only from DEPLOYED. Deployed workers become available
    /// again.
    pub async fn complete_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<ServiceRequest> {
        let request = self.load_request(request_id).await?;
        self.require_owner_or_admin(&request, actor)?;

        let moved = self.store.mark_completed(request_id, Utc::now()).await?;
        if !moved {
            return Err(self.state_error(request_id, "complete").await?.into());
        }

        let released = self.store.release_deployed_workers(request_id).await?;
        info!(request_id = %request_id, released, "Request completed");
        self.load_request(request_id).await
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// A request by id, fully materialized.
    pub async fn get_request(&self, request_id: Uuid) -> Result<ServiceRequest> {
        self.load_request(request_id).await
    }

    /// Per-skill confirmation quorum for a request.
    pub async fn confirmation_status(&self, request_id: Uuid) -> Result<ConfirmationStatus> {
        let request = self.load_request(request_id).await?;
        let workers = self.confirmed_workers(&request).await?;
        let skills: HashMap<Uuid, BTreeSet<SkillType>> = workers
            .into_iter()
            .map(|(id, w)| (id, w.skills))
            .collect();
        Ok(ConfirmationStatus::compute(&request, &skills))
    }

    /// Discovery shortlist for a request, without sending anything.
    pub async fn find_candidate_workers(&self, request_id: Uuid) -> Result<LocateOutcome> {
        let request = self.load_request(request_id).await?;
        Ok(self
            .locator
            .locate(&request, Utc::now().date_naive())
            .await?)
    }

    /// Open requests a worker could still confirm: skill intersection,
    /// within radius, not yet confirmed by them. A committed worker sees
    /// nothing; a request without usable coordinates is offered to no one.
    pub async fn find_available_requests_for_worker(
        &self,
        worker_id: Uuid,
    ) -> Result<Vec<ServiceRequest>> {
        let worker = self.load_worker(worker_id).await?;
        let today = Utc::now().date_naive();

        if worker.blocked || !worker.verified || !worker.available {
            return Ok(Vec::new());
        }
        if self.commitments.is_committed(worker_id, today).await? {
            return Ok(Vec::new());
        }

        let open = self
            .store
            .requests_with_status(&[RequestStatus::Notified, RequestStatus::Confirmed])
            .await?;

        let mut out = Vec::new();
        for request in open {
            if request.has_confirmation_from(worker_id) {
                continue;
            }
            let required = request.required_skills();
            if check_eligibility(
                &worker,
                &required,
                &request,
                self.config.notify_radius_km,
                false,
            )
            .is_ok()
            {
                out.push(request);
            }
        }
        Ok(out)
    }

    // ── Worker management ───────────────────────────────────────────

    /// Register or update a worker profile. New workers start unverified.
    pub async fn register_worker(&self, worker: &Worker) -> Result<()> {
        self.store.upsert_worker(worker).await?;
        info!(worker_id = %worker.id, skills = ?worker.skills, "Worker registered");
        Ok(())
    }

    /// Admin: set the verification flag.
    pub async fn set_worker_verified(
        &self,
        worker_id: Uuid,
        verified: bool,
        actor: &Actor,
    ) -> Result<()> {
        self.require_admin(actor, "verify workers")?;
        self.load_worker(worker_id).await?;
        self.store.set_worker_verified(worker_id, verified).await?;
        Ok(())
    }

    /// Admin: block or unblock a worker account.
    pub async fn set_worker_blocked(
        &self,
        worker_id: Uuid,
        blocked: bool,
        actor: &Actor,
    ) -> Result<()> {
        self.require_admin(actor, "block workers")?;
        self.load_worker(worker_id).await?;
        self.store.set_worker_blocked(worker_id, blocked).await?;
        Ok(())
    }

    /// Worker self-service availability toggle.
    pub async fn set_worker_available(&self, worker_id: Uuid, available: bool) -> Result<()> {
        self.load_worker(worker_id).await?;
        self.store.set_worker_available(worker_id, available).await?;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Fan out work offers to the discovery shortlist.
    ///
    /// Returns `Some(sent)` when a pass ran (the request is locatable) and
    /// `None` when it could not. Each shortlisted worker is re-checked
    /// against live store state before their offer goes out; a transport
    /// failure for one worker is logged and never aborts the pass.
    async fn run_notification_pass(&self, request: &ServiceRequest) -> Result<Option<usize>> {
        let today = Utc::now().date_naive();
        let candidates = match self.locator.locate(request, today).await? {
            LocateOutcome::Candidates(c) => c,
            LocateOutcome::Unlocatable => return Ok(None),
        };

        let required = request.required_skills();
        let event = DispatchEvent::WorkOffer {
            request_id: request.id,
            requirements: request.requirements.clone(),
            description: request.description.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            location: request.location.clone(),
            customer_id: request.customer_id,
            customer_name: request.customer_name.clone(),
        };

        let mut sent = 0;
        for candidate in candidates {
            let worker_id = candidate.worker.id;

            // Authoritative re-check: fresh worker row and live commitment
            // state, not the snapshot discovery ran against.
            let worker = match self.store.get_worker(worker_id).await? {
                Some(w) => w,
                None => continue,
            };
            let committed = self.commitments.is_committed(worker_id, today).await?;
            if let Err(reason) = check_eligibility(
                &worker,
                &required,
                request,
                self.config.notify_radius_km,
                committed,
            ) {
                info!(worker_id = %worker_id, %reason, "Worker dropped at dispatch");
                continue;
            }

            match self.notifier.publish(Topic::Worker(worker_id), &event).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Offer delivery failed");
                }
            }
        }
        Ok(Some(sent))
    }

    /// Load the confirmed workers of a request, keyed by id.
    async fn confirmed_workers(
        &self,
        request: &ServiceRequest,
    ) -> Result<HashMap<Uuid, Worker>> {
        let mut out = HashMap::new();
        for record in &request.confirmed {
            if let Some(worker) = self.store.get_worker(record.worker_id).await? {
                out.insert(record.worker_id, worker);
            }
        }
        Ok(out)
    }

    async fn load_request(&self, id: Uuid) -> Result<ServiceRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| DispatchError::NotFound {
                entity: "request",
                id,
            }
            .into())
    }

    async fn load_worker(&self, id: Uuid) -> Result<Worker> {
        self.store
            .get_worker(id)
            .await?
            .ok_or_else(|| DispatchError::NotFound {
                entity: "worker",
                id,
            }
            .into())
    }

    /// Build the error for a failed test-and-set: the request either does
    /// not exist or sits in a status that refuses the action.
    async fn state_error(&self, id: Uuid, action: &'static str) -> Result<DispatchError> {
        Ok(match self.store.get_request(id).await? {
            Some(request) => DispatchError::InvalidState {
                id,
                status: request.status,
                action,
            },
            None => DispatchError::NotFound {
                entity: "request",
                id,
            },
        })
    }

    fn require_admin(&self, actor: &Actor, action: &'static str) -> Result<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(DispatchError::Forbidden {
                actor: actor.id(),
                action,
            }
            .into())
        }
    }

    fn require_owner_or_admin(&self, request: &ServiceRequest, actor: &Actor) -> Result<()> {
        match actor {
            Actor::Admin { .. } => Ok(()),
            Actor::Customer { id } if *id == request.customer_id => Ok(()),
            _ => Err(DispatchError::NotOwner {
                request_id: request.id,
                customer_id: actor.id(),
            }
            .into()),
        }
    }
}

/// Pick which confirmed workers fill the requirement lines.
///
/// Lines are walked in requirement order, each filled from confirmations
/// in arrival order. A worker already taken by an earlier line is skipped,
/// so one body never fills two slots. Blocked workers are passed over
/// without consuming a slot, so the next confirmation in arrival order
/// backfills it.
fn select_crew(request: &ServiceRequest, workers: &HashMap<Uuid, Worker>) -> Vec<Uuid> {
    let mut taken: HashSet<Uuid> = HashSet::new();
    let mut selected = Vec::new();

    for req in &request.requirements {
        let mut filled = 0;
        for record in &request.confirmed {
            if filled >= req.required_count {
                break;
            }
            if taken.contains(&record.worker_id) {
                continue;
            }
            let Some(worker) = workers.get(&record.worker_id) else {
                continue;
            };
            if worker.blocked {
                continue;
            }
            if worker.skills.contains(&req.skill) {
                taken.insert(record.worker_id);
                selected.push(record.worker_id);
                filled += 1;
            }
        }
    }
    selected
}
