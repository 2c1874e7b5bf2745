//! Configuration types.

/// Dispatch engine configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum distance (km) between a request and a notified worker.
    pub notify_radius_km: f64,
    /// Candidate pool bound: notify at most `multiplier × total_required`.
    pub candidate_multiplier: usize,
    /// Capacity of the in-process event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            notify_radius_km: 20.0,
            candidate_multiplier: 3,
            event_channel_capacity: 256,
        }
    }
}
