use compact_str::{CompactString, ToCompactString};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::geo::LatLng;
use crate::state::{FleetState, VehicleStatus};

/// One vehicle out of a fleet snapshot, after validation.
#[derive(Clone, Debug, PartialEq)]
pub struct FleetRecord {
    pub id: CompactString,
    pub position: LatLng,
    pub label: CompactString,
    pub status: VehicleStatus,
    pub route_name: Option<CompactString>,
}

impl TryFrom<&Value> for FleetRecord {
    type Error = Error;

    fn try_from(raw: &Value) -> Result<Self> {
        let Some(object) = raw.as_object() else {
            return Err(Error::MalformedRecord("record is not an object".to_string()));
        };

        let id = object
            .get("id")
            .and_then(record_id)
            .ok_or_else(|| Error::MalformedRecord("missing id".to_string()))?;

        let lat = object.get("latitude").and_then(coordinate);
        let lng = object.get("longitude").and_then(coordinate);
        let (Some(lat), Some(lng)) = (lat, lng) else {
            return Err(Error::MalformedRecord(format!("vehicle {id}: non-numeric coordinates")));
        };
        let position = LatLng::new(lat, lng);
        if !position.is_valid() {
            return Err(Error::MalformedRecord(format!(
                "vehicle {id}: coordinates out of range ({lat}, {lng})"
            )));
        }

        // Unknown statuses fall back to the default rather than dropping the
        // vehicle's position.
        let status = match object.get("status").and_then(Value::as_str) {
            Some(s) => s.parse::<VehicleStatus>().unwrap_or_else(|other| {
                tracing::debug!(vehicle = %id, status = %other, "unknown status, assuming active");
                VehicleStatus::default()
            }),
            None => VehicleStatus::default(),
        };

        let label = object
            .get("bus_number")
            .and_then(record_id)
            .unwrap_or_else(|| id.clone());

        let route_name = object
            .get("route_name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(CompactString::from);

        Ok(Self {
            id,
            position,
            label,
            status,
            route_name,
        })
    }
}

/// Ids arrive as numbers or strings depending on the serializer.
pub(crate) fn record_id(value: &Value) -> Option<CompactString> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(CompactString::from(s.trim())),
        Value::Number(n) => Some(n.to_compact_string()),
        _ => None,
    }
}

// Decimal fields are serialized as strings.
fn coordinate(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Outcome of applying one snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub applied: usize,
    pub skipped: usize,
}

/// Upserts every well-formed record in list order. Vehicles missing from the
/// snapshot are left as they are.
pub fn apply_snapshot(records: &[Value], state: &FleetState) -> SnapshotStats {
    let mut stats = SnapshotStats::default();

    for raw in records {
        match FleetRecord::try_from(raw) {
            Ok(record) => {
                state.upsert(
                    &record.id,
                    record.position,
                    &record.label,
                    record.status,
                    record.route_name.as_deref(),
                );
                stats.applied += 1;
            }
            Err(e) => {
                tracing::warn!(code = e.code(), "skipping fleet record: {e}");
                stats.skipped += 1;
            }
        }
    }

    tracing::debug!(
        applied = stats.applied,
        skipped = stats.skipped,
        held = state.len(),
        "applied fleet snapshot"
    );
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::layer::TracingLayer;

    fn state() -> FleetState {
        FleetState::new(Arc::new(TracingLayer))
    }

    fn snapshot(value: Value) -> Vec<Value> {
        value.as_array().cloned().unwrap()
    }

    #[test]
    fn parses_wire_record() {
        let raw = json!({
            "id": 3,
            "latitude": "23.885900",
            "longitude": 90.3971,
            "bus_number": "B-101",
            "status": "idle",
            "route_name": "Main Campus"
        });

        let record = FleetRecord::try_from(&raw).unwrap();
        assert_eq!(
            record,
            FleetRecord {
                id: "3".into(),
                position: LatLng::new(23.8859, 90.3971),
                label: "B-101".into(),
                status: VehicleStatus::Idle,
                route_name: Some("Main Campus".into()),
            }
        );
    }

    #[test]
    fn defaults_for_optional_fields() {
        let record = FleetRecord::try_from(&json!({"id": "x1", "latitude": 1, "longitude": 2})).unwrap();
        assert_eq!(record.label, "x1");
        assert_eq!(record.status, VehicleStatus::Active);
        assert_eq!(record.route_name, None);

        let record = FleetRecord::try_from(
            &json!({"id": 1, "latitude": 1, "longitude": 2, "status": "parked", "route_name": ""}),
        )
        .unwrap();
        assert_eq!(record.status, VehicleStatus::Active);
        assert_eq!(record.route_name, None);
    }

    #[test]
    fn rejects_malformed_records() {
        for raw in [
            json!("not an object"),
            json!({"latitude": 1, "longitude": 2}),
            json!({"id": "", "latitude": 1, "longitude": 2}),
            json!({"id": 1, "latitude": "north", "longitude": 2}),
            json!({"id": 1, "latitude": 1}),
            json!({"id": 1, "latitude": 95.0, "longitude": 2}),
            json!({"id": null, "latitude": 1, "longitude": 2}),
        ] {
            let err = FleetRecord::try_from(&raw).unwrap_err();
            assert_eq!(err.code(), "malformed_record", "{raw}");
        }
    }

    #[test]
    fn one_bad_record_does_not_abort_the_snapshot() {
        let state = state();
        let records = snapshot(json!([
            {"id": 1, "latitude": 10, "longitude": 20},
            {"id": 2, "latitude": "oops", "longitude": 20},
            {"latitude": 11, "longitude": 21},
            {"id": 4, "latitude": 12, "longitude": 22},
        ]));

        let stats = apply_snapshot(&records, &state);

        assert_eq!(stats, SnapshotStats { applied: 2, skipped: 2 });
        assert!(state.get("1").is_some());
        assert!(state.get("2").is_none());
        assert!(state.get("4").is_some());
    }

    #[test]
    fn empty_snapshot_keeps_prior_state() {
        let state = state();
        apply_snapshot(&snapshot(json!([{"id": 1, "latitude": 10, "longitude": 20}])), &state);

        let stats = apply_snapshot(&[], &state);

        assert_eq!(stats, SnapshotStats::default());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn absent_vehicles_persist() {
        let state = state();
        apply_snapshot(
            &snapshot(json!([
                {"id": 1, "latitude": 10, "longitude": 20},
                {"id": 2, "latitude": 11, "longitude": 21},
            ])),
            &state,
        );
        apply_snapshot(&snapshot(json!([{"id": 2, "latitude": 11.5, "longitude": 21}])), &state);

        assert_eq!(state.len(), 2);
        assert_eq!(state.get("1").unwrap().position, LatLng::new(10.0, 20.0));
    }

    #[test]
    fn later_record_for_same_id_wins_within_a_snapshot() {
        let state = state();
        apply_snapshot(
            &snapshot(json!([
                {"id": 5, "latitude": 1, "longitude": 1, "status": "active"},
                {"id": 5, "latitude": 2, "longitude": 2, "status": "offline"},
            ])),
            &state,
        );

        let vehicle = state.get("5").unwrap();
        assert_eq!(vehicle.position, LatLng::new(2.0, 2.0));
        assert_eq!(vehicle.status, VehicleStatus::Offline);
    }

    #[test]
    fn status_change_across_snapshots() {
        let state = state();
        apply_snapshot(
            &snapshot(json!([{"id": 1, "latitude": 10, "longitude": 20, "status": "active"}])),
            &state,
        );
        apply_snapshot(
            &snapshot(json!([{"id": 1, "latitude": 10.001, "longitude": 20, "status": "idle"}])),
            &state,
        );

        assert_eq!(state.len(), 1);
        let vehicle = state.get("1").unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Idle);
        assert_eq!(vehicle.position, LatLng::new(10.001, 20.0));

        let bounds = state.compute_bounds().unwrap();
        assert!(bounds.is_point());
        assert_eq!(bounds.center(), LatLng::new(10.001, 20.0));
    }
}
