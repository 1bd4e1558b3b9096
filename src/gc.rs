use std::time::Duration;

use chrono::Utc;
use compact_str::CompactString;

use crate::state::{FleetState, VehicleStatus};

/// Switches vehicles not seen for longer than `threshold` to offline.
///
/// Vehicles are never removed here; a stale vehicle keeps its last position
/// and comes back to life with its next snapshot.
pub fn mark_stale_offline(state: &FleetState, threshold: Duration) -> usize {
    let now = Utc::now();
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);

    let stale: Vec<CompactString> = state
        .vehicles
        .iter()
        .filter(|r| {
            let vehicle = r.value();
            vehicle.status != VehicleStatus::Offline
                && now.signed_duration_since(vehicle.last_seen) > threshold
        })
        .map(|r| r.key().clone())
        .collect();

    // Collect first: updating while iterating would deadlock the shard.
    for id in &stale {
        state.set_status(id, VehicleStatus::Offline);
    }

    if !stale.is_empty() {
        tracing::info!(count = stale.len(), "marked stale vehicles offline");
    }
    stale.len()
}
