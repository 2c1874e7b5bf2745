//! Per-skill confirmation quorum.
//!
//! A request is deploy-ready per skill type: each requirement line needs
//! `required_count` confirmed workers holding that skill. A multi-skilled
//! worker counts toward every required type they declare (they still
//! deploy only once; the quorum is an optimistic readiness signal).

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use uuid::Uuid;

use crate::model::{ServiceRequest, SkillType};

/// Confirmation progress for one requirement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SkillQuorum {
    pub skill: SkillType,
    pub required: u32,
    pub confirmed: u32,
}

impl SkillQuorum {
    /// Workers still needed for this skill.
    pub fn pending(&self) -> u32 {
        self.required.saturating_sub(self.confirmed)
    }

    pub fn met(&self) -> bool {
        self.confirmed >= self.required
    }
}

/// Aggregate confirmation state of a request.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationStatus {
    pub request_id: Uuid,
    /// One entry per requirement line, in requirement order.
    pub per_skill: Vec<SkillQuorum>,
    /// Distinct confirmed workers.
    pub total_confirmed: usize,
}

impl ConfirmationStatus {
    /// Compute quorum progress from the request's confirmation list and
    /// the confirmed workers' declared skills.
    pub fn compute(
        request: &ServiceRequest,
        skills_by_worker: &HashMap<Uuid, BTreeSet<SkillType>>,
    ) -> Self {
        let per_skill = request
            .requirements
            .iter()
            .map(|req| {
                let confirmed = request
                    .confirmed
                    .iter()
                    .filter(|c| {
                        skills_by_worker
                            .get(&c.worker_id)
                            .is_some_and(|skills| skills.contains(&req.skill))
                    })
                    .count() as u32;
                SkillQuorum {
                    skill: req.skill,
                    required: req.required_count,
                    confirmed,
                }
            })
            .collect();

        Self {
            request_id: request.id,
            per_skill,
            total_confirmed: request.confirmed.len(),
        }
    }

    /// Every requirement line has reached quorum.
    pub fn all_requirements_met(&self) -> bool {
        self.per_skill.iter().all(SkillQuorum::met)
    }

    /// Deployment is allowed with any confirmations at all; a full quorum
    /// is not required for a partial crew.
    pub fn can_deploy(&self) -> bool {
        self.total_confirmed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinates;
    use crate::model::{ConfirmedWorker, NewRequest, SkillRequirement};
    use chrono::NaiveDate;

    fn request_with(requirements: Vec<SkillRequirement>) -> ServiceRequest {
        ServiceRequest::create(NewRequest {
            customer_id: Uuid::new_v4(),
            customer_name: "Vikram".into(),
            description: "Renovation".into(),
            requirements,
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 5).unwrap(),
            address: "3 Hill Rd".into(),
            coordinates: Some(Coordinates::new(28.61, 77.21)),
        })
        .unwrap()
    }

    fn confirm(request: &mut ServiceRequest, worker_id: Uuid) {
        request
            .confirmed
            .push(ConfirmedWorker::new(request.id, worker_id));
    }

    #[test]
    fn empty_confirmations_meet_nothing() {
        let request = request_with(vec![SkillRequirement::new(SkillType::Electrician, 2)]);
        let status = ConfirmationStatus::compute(&request, &HashMap::new());
        assert_eq!(status.per_skill[0].confirmed, 0);
        assert_eq!(status.per_skill[0].pending(), 2);
        assert!(!status.all_requirements_met());
        assert!(!status.can_deploy());
    }

    #[test]
    fn quorum_counts_only_matching_skills() {
        let mut request = request_with(vec![
            SkillRequirement::new(SkillType::Electrician, 1),
            SkillRequirement::new(SkillType::Plumber, 1),
        ]);

        let electrician = Uuid::new_v4();
        confirm(&mut request, electrician);
        let skills: HashMap<_, _> =
            [(electrician, BTreeSet::from([SkillType::Electrician]))].into();

        let status = ConfirmationStatus::compute(&request, &skills);
        assert!(status.per_skill[0].met());
        assert!(!status.per_skill[1].met());
        assert!(!status.all_requirements_met());
        assert!(status.can_deploy());
    }

    #[test]
    fn multi_skilled_worker_counts_toward_every_type() {
        let mut request = request_with(vec![
            SkillRequirement::new(SkillType::Electrician, 1),
            SkillRequirement::new(SkillType::Plumber, 1),
        ]);

        let jack = Uuid::new_v4();
        confirm(&mut request, jack);
        let skills: HashMap<_, _> = [(
            jack,
            BTreeSet::from([SkillType::Electrician, SkillType::Plumber]),
        )]
        .into();

        // One worker satisfies both quorums even though only one body
        // will deploy.
        let status = ConfirmationStatus::compute(&request, &skills);
        assert!(status.all_requirements_met());
        assert_eq!(status.total_confirmed, 1);
    }

    #[test]
    fn unknown_confirmed_worker_counts_toward_nothing() {
        let mut request = request_with(vec![SkillRequirement::new(SkillType::Mason, 1)]);
        confirm(&mut request, Uuid::new_v4());

        let status = ConfirmationStatus::compute(&request, &HashMap::new());
        assert_eq!(status.per_skill[0].confirmed, 0);
        assert_eq!(status.total_confirmed, 1);
        assert!(status.can_deploy());
    }
}
