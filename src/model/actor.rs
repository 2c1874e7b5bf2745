//! Caller identity, resolved once at the boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is acting on a request. Resolved from the session at the boundary;
/// the core never infers a role from the shape of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Actor {
    Customer { id: Uuid },
    Worker { id: Uuid },
    Admin { id: Uuid, super_admin: bool },
}

impl Actor {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Customer { id } | Self::Worker { id } | Self::Admin { id, .. } => *id,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_serde_tagged() {
        let actor = Actor::Admin {
            id: Uuid::new_v4(),
            super_admin: true,
        };
        let json = serde_json::to_string(&actor).unwrap();
        assert!(json.contains("\"role\":\"admin\""));
        assert!(json.contains("\"super_admin\":true"));

        let parsed: Actor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, actor);
    }

    #[test]
    fn actor_id_and_role() {
        let id = Uuid::new_v4();
        assert_eq!(Actor::Customer { id }.id(), id);
        assert!(!Actor::Worker { id }.is_admin());
        assert!(
            Actor::Admin {
                id,
                super_admin: false
            }
            .is_admin()
        );
    }
}
