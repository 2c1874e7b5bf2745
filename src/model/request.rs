//! Service requests and the request status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::Coordinates;
use crate::model::assignment::{ConfirmedWorker, DeployedWorker};
use crate::model::worker::SkillType;

/// Lifecycle status of a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Draft, not yet submitted for review.
    Pending,
    /// Submitted, waiting for an admin decision.
    PendingAdminApproval,
    /// Approved but no notification pass has completed yet
    /// (stays here when the request location is unusable).
    AdminApproved,
    /// Notification fan-out completed (possibly to zero workers).
    Notified,
    /// At least one worker confirmed.
    Confirmed,
    /// Workers assigned and committed.
    Deployed,
    /// Customer marked the work complete.
    Completed,
    /// Admin rejected the request.
    Rejected,
    /// Cancelled before completion.
    Cancelled,
}

impl RequestStatus {
    /// Check whether this status allows transitioning to `target`.
    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        use RequestStatus::*;

        // Cancellation is reachable from any non-terminal status.
        if target == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (Pending, PendingAdminApproval)
                | (PendingAdminApproval, AdminApproved)
                | (PendingAdminApproval, Rejected)
                | (AdminApproved, Notified)
                | (Notified, Confirmed)
                | (Notified, Deployed)
                | (Confirmed, Deployed)
                | (Deployed, Completed)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingAdminApproval => "pending_admin_approval",
            Self::AdminApproved => "admin_approved",
            Self::Notified => "notified",
            Self::Confirmed => "confirmed",
            Self::Deployed => "deployed",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pending_admin_approval" => Ok(Self::PendingAdminApproval),
            "admin_approved" => Ok(Self::AdminApproved),
            "notified" => Ok(Self::Notified),
            "confirmed" => Ok(Self::Confirmed),
            "deployed" => Ok(Self::Deployed),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown request status: '{other}'")),
        }
    }
}

/// One skill requirement line: a type and how many workers of it are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRequirement {
    pub skill: SkillType,
    pub required_count: u32,
}

impl SkillRequirement {
    pub fn new(skill: SkillType, required_count: u32) -> Self {
        Self {
            skill,
            required_count,
        }
    }
}

/// Where the work happens. Coordinates are optional (geocoding may be
/// unavailable); a request without valid coordinates is unmatchable
/// until corrected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkLocation {
    /// Free-text address.
    pub address: String,
    /// Resolved coordinates, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl WorkLocation {
    /// Coordinates usable for distance computation, if present and valid.
    pub fn valid_coordinates(&self) -> Option<Coordinates> {
        self.coordinates.filter(Coordinates::is_valid)
    }
}

/// Input for creating a service request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub description: String,
    pub requirements: Vec<SkillRequirement>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub address: String,
    pub coordinates: Option<Coordinates>,
}

/// A customer labor request with its full staffing state.
///
/// Always materialized eagerly: `requirements`, `confirmed` and `deployed`
/// are loaded with the request, never lazily fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Customer display name, included in worker notifications.
    pub customer_name: String,
    pub description: String,
    /// Ordered skill requirements. Never empty.
    pub requirements: Vec<SkillRequirement>,
    /// First day of work (inclusive).
    pub start_date: NaiveDate,
    /// Last day of work (inclusive, `>= start_date`).
    pub end_date: NaiveDate,
    pub location: WorkLocation,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Workers who confirmed, in confirmation order.
    pub confirmed: Vec<ConfirmedWorker>,
    /// Workers deployed so far.
    pub deployed: Vec<DeployedWorker>,
}

impl ServiceRequest {
    /// Validate and build a request in `PendingAdminApproval`.
    pub fn create(input: NewRequest) -> Result<Self, DispatchError> {
        if input.requirements.is_empty()
            || input.requirements.iter().any(|r| r.required_count == 0)
        {
            return Err(DispatchError::EmptyRequirements);
        }
        let mut seen = std::collections::BTreeSet::new();
        for r in &input.requirements {
            if !seen.insert(r.skill) {
                return Err(DispatchError::DuplicateRequirement { skill: r.skill });
            }
        }
        if input.end_date < input.start_date {
            return Err(DispatchError::InvalidDateRange {
                start: input.start_date,
                end: input.end_date,
            });
        }
        if let Some(c) = input.coordinates
            && !c.is_valid()
        {
            return Err(DispatchError::InvalidCoordinates {
                lat: c.lat,
                lon: c.lon,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            customer_id: input.customer_id,
            customer_name: input.customer_name,
            description: input.description,
            requirements: input.requirements,
            start_date: input.start_date,
            end_date: input.end_date,
            location: WorkLocation {
                address: input.address,
                coordinates: input.coordinates,
            },
            status: RequestStatus::PendingAdminApproval,
            created_at: Utc::now(),
            completed_at: None,
            confirmed: Vec::new(),
            deployed: Vec::new(),
        })
    }

    /// Sum of all requirement counts.
    pub fn total_required(&self) -> u32 {
        self.requirements.iter().map(|r| r.required_count).sum()
    }

    /// The required skill types, in requirement order.
    pub fn required_skills(&self) -> Vec<SkillType> {
        self.requirements.iter().map(|r| r.skill).collect()
    }

    /// Whether the given worker already confirmed this request.
    pub fn has_confirmation_from(&self, worker_id: Uuid) -> bool {
        self.confirmed.iter().any(|c| c.worker_id == worker_id)
    }

    /// Whether the given worker is already deployed on this request.
    pub fn has_deployment_of(&self, worker_id: Uuid) -> bool {
        self.deployed.iter().any(|d| d.worker_id == worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_input() -> NewRequest {
        NewRequest {
            customer_id: Uuid::new_v4(),
            customer_name: "Asha".into(),
            description: "Rewire the shop floor".into(),
            requirements: vec![SkillRequirement::new(SkillType::Electrician, 2)],
            start_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 9, 3).unwrap(),
            address: "12 Market Rd".into(),
            coordinates: Some(Coordinates::new(28.61, 77.21)),
        }
    }

    #[test]
    fn status_transitions_valid() {
        use RequestStatus::*;
        assert!(Pending.can_transition_to(PendingAdminApproval));
        assert!(PendingAdminApproval.can_transition_to(AdminApproved));
        assert!(PendingAdminApproval.can_transition_to(Rejected));
        assert!(AdminApproved.can_transition_to(Notified));
        assert!(Notified.can_transition_to(Confirmed));
        assert!(Notified.can_transition_to(Deployed));
        assert!(Confirmed.can_transition_to(Deployed));
        assert!(Deployed.can_transition_to(Completed));
    }

    #[test]
    fn status_transitions_invalid() {
        use RequestStatus::*;
        assert!(!AdminApproved.can_transition_to(Rejected));
        assert!(!Notified.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Deployed));
        assert!(!Rejected.can_transition_to(AdminApproved));
        assert!(!Deployed.can_transition_to(Notified));
        assert!(!Pending.can_transition_to(AdminApproved));
    }

    #[test]
    fn cancel_from_any_non_terminal() {
        use RequestStatus::*;
        for s in [
            Pending,
            PendingAdminApproval,
            AdminApproved,
            Notified,
            Confirmed,
            Deployed,
        ] {
            assert!(s.can_transition_to(Cancelled), "{s} should allow cancel");
        }
        for s in [Completed, Rejected, Cancelled] {
            assert!(!s.can_transition_to(Cancelled), "{s} is terminal");
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(!RequestStatus::Deployed.is_terminal());
    }

    #[test]
    fn status_display_fromstr_roundtrip() {
        use RequestStatus::*;
        for s in [
            Pending,
            PendingAdminApproval,
            AdminApproved,
            Notified,
            Confirmed,
            Deployed,
            Completed,
            Rejected,
            Cancelled,
        ] {
            let parsed: RequestStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn create_sets_pending_admin_approval() {
        let req = ServiceRequest::create(new_input()).unwrap();
        assert_eq!(req.status, RequestStatus::PendingAdminApproval);
        assert_eq!(req.total_required(), 2);
        assert!(req.confirmed.is_empty());
        assert!(req.deployed.is_empty());
        assert!(req.completed_at.is_none());
    }

    #[test]
    fn create_rejects_empty_requirements() {
        let mut input = new_input();
        input.requirements.clear();
        assert!(matches!(
            ServiceRequest::create(input),
            Err(DispatchError::EmptyRequirements)
        ));

        let mut input = new_input();
        input.requirements[0].required_count = 0;
        assert!(matches!(
            ServiceRequest::create(input),
            Err(DispatchError::EmptyRequirements)
        ));
    }

    #[test]
    fn create_rejects_duplicate_skill_lines() {
        let mut input = new_input();
        input
            .requirements
            .push(SkillRequirement::new(SkillType::Electrician, 1));
        assert!(matches!(
            ServiceRequest::create(input),
            Err(DispatchError::DuplicateRequirement {
                skill: SkillType::Electrician
            })
        ));
    }

    #[test]
    fn create_rejects_inverted_date_range() {
        let mut input = new_input();
        input.end_date = input.start_date.pred_opt().unwrap();
        assert!(matches!(
            ServiceRequest::create(input),
            Err(DispatchError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn create_allows_single_day_range() {
        let mut input = new_input();
        input.end_date = input.start_date;
        assert!(ServiceRequest::create(input).is_ok());
    }

    #[test]
    fn create_rejects_out_of_range_coordinates() {
        let mut input = new_input();
        input.coordinates = Some(Coordinates::new(120.0, 77.0));
        assert!(matches!(
            ServiceRequest::create(input),
            Err(DispatchError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn create_allows_missing_coordinates() {
        let mut input = new_input();
        input.coordinates = None;
        let req = ServiceRequest::create(input).unwrap();
        assert!(req.location.valid_coordinates().is_none());
    }

    #[test]
    fn total_required_sums_all_lines() {
        let mut input = new_input();
        input
            .requirements
            .push(SkillRequirement::new(SkillType::Plumber, 3));
        let req = ServiceRequest::create(input).unwrap();
        assert_eq!(req.total_required(), 5);
        assert_eq!(
            req.required_skills(),
            vec![SkillType::Electrician, SkillType::Plumber]
        );
    }
}
