//! Error types for Crew Dispatch.

use uuid::Uuid;

use crate::model::{RequestStatus, SkillType};

/// Top-level error type for the dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Geocode error: {0}")]
    Geocode(#[from] GeocodeError),
}

/// Record-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Business-rule violations, surfaced to callers as precise failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Request {id} is {status}, cannot {action}")]
    InvalidState {
        id: Uuid,
        status: RequestStatus,
        action: &'static str,
    },

    #[error("Worker {worker_id} already confirmed request {request_id}")]
    DuplicateAction { request_id: Uuid, worker_id: Uuid },

    #[error("Request {request_id} is not owned by customer {customer_id}")]
    NotOwner { request_id: Uuid, customer_id: Uuid },

    #[error("Actor {actor} may not {action}")]
    Forbidden { actor: Uuid, action: &'static str },

    #[error("Request must require at least one worker")]
    EmptyRequirements,

    #[error("Requirement for skill '{skill}' appears more than once")]
    DuplicateRequirement { skill: SkillType },

    #[error("Work period end {end} precedes start {start}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },
}

/// Notification transport errors. Logged and skipped inside a fan-out pass,
/// never fatal to the pass itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Geocoding collaborator errors. Absence or failure degrades a request to a
/// null location; it never blocks creation.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocode request failed: {0}")]
    RequestFailed(String),

    #[error("Geocode response unusable: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the dispatch core.
pub type Result<T> = std::result::Result<T, Error>;
