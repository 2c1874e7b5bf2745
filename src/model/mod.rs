//! Domain model: requests, workers, assignments, actors.

pub mod actor;
pub mod assignment;
pub mod request;
pub mod worker;

pub use actor::Actor;
pub use assignment::{ConfirmedWorker, DeployedWorker};
pub use request::{NewRequest, RequestStatus, ServiceRequest, SkillRequirement, WorkLocation};
pub use worker::{SkillType, Worker};
