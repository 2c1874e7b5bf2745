//! Outbound notification abstraction.
//!
//! The core publishes to recipient-scoped topics (`worker/{id}`,
//! `customer/{id}`) through a `Notifier` collaborator. Delivery is
//! at-most-once; no acknowledgement is consumed here.

pub mod broadcast;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TransportError;
use crate::model::{SkillRequirement, WorkLocation};

pub use broadcast::BroadcastNotifier;

/// A recipient-scoped topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Worker(Uuid),
    Customer(Uuid),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker(id) => write!(f, "worker/{id}"),
            Self::Customer(id) => write!(f, "customer/{id}"),
        }
    }
}

/// Events published by the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// A work offer sent to one eligible worker during fan-out.
    WorkOffer {
        request_id: Uuid,
        requirements: Vec<SkillRequirement>,
        description: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        location: WorkLocation,
        customer_id: Uuid,
        customer_name: String,
    },
    /// Sent to the customer when workers are deployed on their request.
    CrewDeployed {
        request_id: Uuid,
        worker_ids: Vec<Uuid>,
    },
}

/// Publish/subscribe transport consumed by the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one event to a topic. At-most-once; a failure here is
    /// logged by the caller and never retried synchronously.
    async fn publish(&self, topic: Topic, event: &DispatchEvent) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_display() {
        let id = Uuid::nil();
        assert_eq!(
            Topic::Worker(id).to_string(),
            format!("worker/{id}")
        );
        assert_eq!(
            Topic::Customer(id).to_string(),
            format!("customer/{id}")
        );
    }

    #[test]
    fn crew_deployed_serde_tagged() {
        let event = DispatchEvent::CrewDeployed {
            request_id: Uuid::new_v4(),
            worker_ids: vec![Uuid::new_v4()],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"crew_deployed\""));

        let parsed: DispatchEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, DispatchEvent::CrewDeployed { .. }));
    }
}
