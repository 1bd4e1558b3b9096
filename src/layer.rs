//! Seam between the fleet state and whatever draws it.
//!
//! The state calls into a [`MarkerLayer`] while it holds the entry being
//! changed, so implementations must not call back into the state.

use crate::state::{MarkerId, RouteShape, StopMarker, VehicleState};

pub trait MarkerLayer: Send + Sync {
    /// A vehicle was seen for the first time.
    fn register(&self, marker: MarkerId, vehicle: &VehicleState);

    /// An existing vehicle moved or changed status. `marker` is the handle
    /// handed to `register` for this vehicle.
    fn update(&self, marker: MarkerId, vehicle: &VehicleState);

    fn unregister(&self, marker: MarkerId);

    fn draw_route(&self, shape: &RouteShape);

    fn erase_route(&self, shape: &RouteShape);

    fn add_stop(&self, marker: MarkerId, stop: &StopMarker);
}

/// Layer that only traces what it would have drawn.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLayer;

impl MarkerLayer for TracingLayer {
    fn register(&self, marker: MarkerId, vehicle: &VehicleState) {
        tracing::debug!(
            marker = marker.0,
            vehicle = %vehicle.id,
            token = vehicle.status.marker_color(),
            "register marker"
        );
    }

    fn update(&self, marker: MarkerId, vehicle: &VehicleState) {
        tracing::trace!(
            marker = marker.0,
            vehicle = %vehicle.id,
            lat = vehicle.position.lat,
            lng = vehicle.position.lng,
            status = %vehicle.status,
            "move marker"
        );
    }

    fn unregister(&self, marker: MarkerId) {
        tracing::debug!(marker = marker.0, "unregister marker");
    }

    fn draw_route(&self, shape: &RouteShape) {
        tracing::debug!(route = %shape.id, points = shape.points.len(), color = %shape.color, "draw route");
    }

    fn erase_route(&self, shape: &RouteShape) {
        tracing::debug!(route = %shape.id, "erase route");
    }

    fn add_stop(&self, marker: MarkerId, stop: &StopMarker) {
        tracing::debug!(marker = marker.0, stop = %stop.name, order = stop.order, "add stop");
    }
}
