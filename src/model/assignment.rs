//! Confirmation and deployment link records.
//!
//! Both are append-only: created once, never mutated, owned by their
//! request. At most one of each exists per (request, worker) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A worker's confirmation of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedWorker {
    pub request_id: Uuid,
    pub worker_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ConfirmedWorker {
    pub fn new(request_id: Uuid, worker_id: Uuid) -> Self {
        Self {
            request_id,
            worker_id,
            created_at: Utc::now(),
        }
    }
}

/// A worker's deployment onto a request. Created only from an existing
/// confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedWorker {
    pub request_id: Uuid,
    pub worker_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl DeployedWorker {
    pub fn new(request_id: Uuid, worker_id: Uuid) -> Self {
        Self {
            request_id,
            worker_id,
            created_at: Utc::now(),
        }
    }
}
