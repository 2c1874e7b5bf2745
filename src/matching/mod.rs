//! Worker matching: eligibility gates, candidate discovery, and the
//! per-skill confirmation quorum.

pub mod commitment;
pub mod eligibility;
pub mod locator;
pub mod quorum;

pub use commitment::CommitmentTracker;
pub use eligibility::{check_eligibility, IneligibleReason};
pub use locator::{Candidate, LocateOutcome, WorkerLocator};
pub use quorum::{ConfirmationStatus, SkillQuorum};
