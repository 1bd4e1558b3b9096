use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::geo::{self, Bounds, LatLng};
use crate::layer::MarkerLayer;

/// Handle the rendering layer uses to identify a drawn element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    #[default]
    Active,
    Idle,
    Offline,
}

impl VehicleStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Offline => "offline",
        }
    }

    /// Presentation token for the marker icon.
    pub const fn marker_color(self) -> &'static str {
        match self {
            Self::Active => "#198754",
            Self::Idle => "#ffc107",
            Self::Offline => "#6c757d",
        }
    }

    pub const fn css_class(self) -> &'static str {
        match self {
            Self::Active => "bus-marker-icon active",
            Self::Idle => "bus-marker-icon idle",
            Self::Offline => "bus-marker-icon offline",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleStatus {
    type Err = CompactString;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "offline" | "inactive" => Ok(Self::Offline),
            _ => Err(CompactString::from(s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub id: CompactString,
    pub position: LatLng,
    pub status: VehicleStatus,
    pub label: CompactString,
    pub route_name: Option<CompactString>,
    pub marker: MarkerId,
    pub last_seen: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteShape {
    pub id: CompactString,
    pub points: Vec<LatLng>,
    pub color: CompactString,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopMarker {
    pub position: LatLng,
    pub name: CompactString,
    pub order: u32,
}

/// Distance and arrival estimate from one vehicle to a target point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleEta {
    pub id: CompactString,
    pub label: CompactString,
    pub distance_km: f64,
    pub eta_minutes: Option<u32>,
    pub eta_label: String,
}

pub struct FleetState {
    // Map VehicleID -> last known state
    pub(crate) vehicles: DashMap<CompactString, VehicleState>,

    // Map RouteID -> currently drawn shape
    pub(crate) routes: DashMap<CompactString, RouteShape>,

    pub(crate) stops: DashMap<MarkerId, StopMarker>,

    layer: Arc<dyn MarkerLayer>,
    next_marker: AtomicU64,
}

impl FleetState {
    pub fn new(layer: Arc<dyn MarkerLayer>) -> Self {
        Self {
            vehicles: DashMap::new(),
            routes: DashMap::new(),
            stops: DashMap::new(),
            layer,
            next_marker: AtomicU64::new(1),
        }
    }

    fn allocate_marker(&self) -> MarkerId {
        MarkerId(self.next_marker.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates the vehicle on first sight, otherwise rewrites it in place.
    ///
    /// An existing vehicle keeps its marker handle; the layer is told to move
    /// it rather than to draw a new one.
    pub fn upsert(
        &self,
        id: &str,
        position: LatLng,
        label: &str,
        status: VehicleStatus,
        route_name: Option<&str>,
    ) {
        let now = Utc::now();

        match self.vehicles.entry(CompactString::from(id)) {
            Entry::Occupied(mut entry) => {
                let vehicle = entry.get_mut();
                vehicle.position = position;
                vehicle.status = status;
                vehicle.label = CompactString::from(label);
                vehicle.route_name = route_name.map(CompactString::from);
                vehicle.last_seen = now;
                self.layer.update(vehicle.marker, vehicle);
            }
            Entry::Vacant(entry) => {
                let vehicle = VehicleState {
                    id: entry.key().clone(),
                    position,
                    status,
                    label: CompactString::from(label),
                    route_name: route_name.map(CompactString::from),
                    marker: self.allocate_marker(),
                    last_seen: now,
                };
                self.layer.register(vehicle.marker, &vehicle);
                tracing::debug!(vehicle = id, status = %status, "tracking new vehicle");
                entry.insert(vehicle);
            }
        }
    }

    /// Changes only the status of a held vehicle. Returns false if unknown.
    pub fn set_status(&self, id: &str, status: VehicleStatus) -> bool {
        let Some(mut vehicle) = self.vehicles.get_mut(id) else {
            return false;
        };
        if vehicle.status != status {
            vehicle.status = status;
            self.layer.update(vehicle.marker, &vehicle);
        }
        true
    }

    /// Drops the vehicle and its marker. Returns false if it was not held.
    pub fn remove(&self, id: &str) -> bool {
        match self.vehicles.remove(id) {
            Some((_, vehicle)) => {
                self.layer.unregister(vehicle.marker);
                tracing::debug!(vehicle = id, "stopped tracking vehicle");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<VehicleState> {
        self.vehicles.get(id).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// All held vehicles, sorted by id for stable output.
    pub fn vehicles(&self) -> Vec<VehicleState> {
        let mut all: Vec<VehicleState> = self.vehicles.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Smallest box covering every held vehicle, `None` when nothing is held.
    pub fn compute_bounds(&self) -> Option<Bounds> {
        self.vehicles.iter().fold(None, |bounds, r| {
            let position = r.value().position;
            let mut bounds = bounds.unwrap_or_else(|| Bounds::from_point(position));
            bounds.extend(position);
            Some(bounds)
        })
    }

    /// Replaces any shape drawn for the same route id. The old shape is
    /// erased before the new one is drawn.
    pub fn draw_route(&self, shape: RouteShape) {
        if let Some((_, previous)) = self.routes.remove(&shape.id) {
            self.layer.erase_route(&previous);
        }
        self.layer.draw_route(&shape);
        self.routes.insert(shape.id.clone(), shape);
    }

    pub fn route(&self, id: &str) -> Option<RouteShape> {
        self.routes.get(id).map(|r| r.value().clone())
    }

    pub fn add_stop(&self, position: LatLng, name: &str, order: u32) -> StopMarker {
        let stop = StopMarker {
            position,
            name: CompactString::from(name),
            order,
        };
        let marker = self.allocate_marker();
        self.layer.add_stop(marker, &stop);
        self.stops.insert(marker, stop.clone());
        stop
    }

    /// Distance and ETA from every held vehicle to `target`, nearest first.
    pub fn eta_to(&self, target: LatLng, speed_kmh: f64) -> Vec<VehicleEta> {
        let mut etas: Vec<VehicleEta> = self
            .vehicles
            .iter()
            .map(|r| {
                let vehicle = r.value();
                let distance_km = vehicle.position.distance_km(&target);
                let eta_minutes = geo::eta_minutes(distance_km, speed_kmh);
                VehicleEta {
                    id: vehicle.id.clone(),
                    label: vehicle.label.clone(),
                    distance_km,
                    eta_minutes,
                    eta_label: geo::describe_eta(eta_minutes),
                }
            })
            .collect();

        etas.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        etas
    }
}
