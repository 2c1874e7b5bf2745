//! Worker profiles and skill types.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinates;

/// A labor category a worker declares and a request requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillType {
    Electrician,
    Plumber,
    Carpenter,
    Mason,
    Painter,
    Welder,
    Driver,
    Cleaner,
    Gardener,
    Cook,
}

impl SkillType {
    /// All known skill types, in declaration order.
    pub const ALL: [SkillType; 10] = [
        Self::Electrician,
        Self::Plumber,
        Self::Carpenter,
        Self::Mason,
        Self::Painter,
        Self::Welder,
        Self::Driver,
        Self::Cleaner,
        Self::Gardener,
        Self::Cook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Electrician => "electrician",
            Self::Plumber => "plumber",
            Self::Carpenter => "carpenter",
            Self::Mason => "mason",
            Self::Painter => "painter",
            Self::Welder => "welder",
            Self::Driver => "driver",
            Self::Cleaner => "cleaner",
            Self::Gardener => "gardener",
            Self::Cook => "cook",
        }
    }
}

impl std::fmt::Display for SkillType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown skill type: '{s}'"))
    }
}

/// A worker profile.
///
/// The id is tied one-to-one to a user identity; `blocked` mirrors the
/// owning account's flag (account management lives outside this core).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Unique ID, shared with the owning user identity.
    pub id: Uuid,
    /// Declared skill types.
    pub skills: BTreeSet<SkillType>,
    /// Admin-gated verification.
    pub verified: bool,
    /// Currently open for new work.
    pub available: bool,
    /// Blocked at the account level.
    pub blocked: bool,
    /// Last-known location, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    /// Historical rating (owned elsewhere, carried for display).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

impl Worker {
    /// Create an unverified, available, unblocked worker with no location.
    pub fn new(id: Uuid, skills: impl IntoIterator<Item = SkillType>) -> Self {
        Self {
            id,
            skills: skills.into_iter().collect(),
            verified: false,
            available: true,
            blocked: false,
            location: None,
            rating: None,
        }
    }

    /// Builder: mark verified.
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    /// Builder: set last-known location.
    pub fn at(mut self, location: Coordinates) -> Self {
        self.location = Some(location);
        self
    }

    /// Whether any declared skill intersects the given required types.
    pub fn has_any_skill(&self, required: &[SkillType]) -> bool {
        required.iter().any(|t| self.skills.contains(t))
    }
}
