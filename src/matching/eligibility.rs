//! The single eligibility filter.
//!
//! Every gate a worker must pass to receive a work offer lives here, in
//! one function, so that discovery (bulk commitment set) and dispatch
//! (authoritative per-worker check) cannot drift apart. Callers supply
//! the commitment answer; the gates run in a fixed order and report the
//! first failure.

use crate::geo;
use crate::model::{ServiceRequest, SkillType, Worker};

/// Why a worker was filtered out, for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IneligibleReason {
    /// Not admin-verified.
    Unverified,
    /// Marked unavailable.
    Unavailable,
    /// Account is blocked.
    Blocked,
    /// Holds an active confirmation or deployment elsewhere.
    Committed,
    /// Worker or request location is missing or invalid.
    InvalidDistance,
    /// Outside the notification radius.
    OutOfRange { distance_km: f64, max_km: f64 },
    /// No declared skill matches any required type.
    SkillMismatch,
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unverified => write!(f, "not verified"),
            Self::Unavailable => write!(f, "not available"),
            Self::Blocked => write!(f, "account blocked"),
            Self::SkillMismatch => write!(f, "no matching skill"),
            Self::Committed => write!(f, "already committed"),
            Self::InvalidDistance => write!(f, "no usable location"),
            Self::OutOfRange {
                distance_km,
                max_km,
            } => write!(f, "{distance_km:.1} km away (max {max_km} km)"),
        }
    }
}

/// Run all eligibility gates for one worker against one request.
///
/// `committed` is resolved by the caller: from the bulk snapshot during
/// discovery, or from a live store check at dispatch time.
pub fn check_eligibility(
    worker: &Worker,
    required: &[SkillType],
    request: &ServiceRequest,
    max_km: f64,
    committed: bool,
) -> Result<f64, IneligibleReason> {
    if !worker.verified {
        return Err(IneligibleReason::Unverified);
    }
    if !worker.available {
        return Err(IneligibleReason::Unavailable);
    }
    if worker.blocked {
        return Err(IneligibleReason::Blocked);
    }
    if committed {
        return Err(IneligibleReason::Committed);
    }

    let request_coords = request
        .location
        .valid_coordinates()
        .ok_or(IneligibleReason::InvalidDistance)?;
    let worker_coords = worker
        .location
        .filter(|c| c.is_valid())
        .ok_or(IneligibleReason::InvalidDistance)?;
    let distance_km = geo::distance_km(worker_coords, request_coords)
        .ok_or(IneligibleReason::InvalidDistance)?;

    if distance_km > max_km {
        return Err(IneligibleReason::OutOfRange {
            distance_km,
            max_km,
        });
    }

    if !worker.has_any_skill(required) {
        return Err(IneligibleReason::SkillMismatch);
    }

    Ok(distance_km)
}
