//! Temporal partitioning of a bundle into per-timestamp snapshots.
//!
//! Every distinct raw observation timestamp becomes a boundary. The snapshot
//! for a boundary holds all non-Observation entries plus the observations that
//! happened strictly before it.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use timeslice_core::{SliceError, SnapshotKey};

use crate::accessors::{
    extract_observation_records, find_patient_id, observation_instant, ObservationRecord,
};
use crate::bundle::{Bundle, Entry, Resource};

/// All snapshots derived from one bundle, in ascending boundary order.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<'a> {
    pub patient_id: &'a str,
    pub snapshots: Vec<Snapshot<'a>>,
}

/// A filtered copy of a bundle as of one boundary instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<'a> {
    key: SnapshotKey,
    boundary: DateTime<FixedOffset>,
    resource_type: &'a Value,
    bundle_type: Option<&'a Value>,
    entries: Vec<&'a Entry>,
}

impl<'a> Snapshot<'a> {
    pub fn key(&self) -> &SnapshotKey {
        &self.key
    }

    pub fn boundary(&self) -> DateTime<FixedOffset> {
        self.boundary
    }

    pub fn entries(&self) -> &[&'a Entry] {
        &self.entries
    }

    /// Number of Observation entries that made it into the snapshot.
    pub fn observation_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.resource(), Some(Resource::Observation(_))))
            .count()
    }

    /// Compact JSON text of the snapshot document.
    pub fn to_json(&self) -> Result<String, SliceError> {
        serde_json::to_string(self).map_err(|err| SliceError::Serialize(err.to_string()))
    }
}

impl Serialize for Snapshot<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.bundle_type.is_some() { 3 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("resourceType", self.resource_type)?;
        if let Some(bundle_type) = self.bundle_type {
            map.serialize_entry("type", bundle_type)?;
        }
        map.serialize_entry("entry", &self.entries)?;
        map.end()
    }
}

/// Split a bundle into one snapshot per distinct observation timestamp.
pub fn partition_bundle(bundle: &Bundle) -> Result<Partition<'_>, SliceError> {
    let patient_id = find_patient_id(bundle).ok_or(SliceError::MissingPatient)?;

    let records = extract_observation_records(bundle);
    if records.is_empty() {
        return Err(SliceError::NoObservations);
    }

    let snapshots = boundaries(records)
        .into_iter()
        .map(|record| {
            build_snapshot(
                bundle,
                SnapshotKey::new(patient_id, record.raw),
                record.instant,
            )
        })
        .collect();

    Ok(Partition {
        patient_id,
        snapshots,
    })
}

/// Boundary records: sorted by instant, first occurrence of each raw string.
///
/// The sort is stable, so records with equal instants keep entry order.
pub fn boundaries(mut records: Vec<ObservationRecord<'_>>) -> Vec<ObservationRecord<'_>> {
    records.sort_by_key(|record| record.instant);

    let mut seen = HashSet::new();
    records.retain(|record| seen.insert(record.raw));
    records
}

/// Snapshot of `bundle` holding observations strictly earlier than `boundary`.
///
/// Every entry of the bundle is a candidate, not only the extracted records.
pub fn build_snapshot(
    bundle: &Bundle,
    key: SnapshotKey,
    boundary: DateTime<FixedOffset>,
) -> Snapshot<'_> {
    let entries = bundle
        .entries()
        .iter()
        .filter(|entry| visible_at(entry, boundary))
        .collect();

    Snapshot {
        key,
        boundary,
        resource_type: bundle.resource_type(),
        bundle_type: bundle.bundle_type(),
        entries,
    }
}

fn visible_at(entry: &Entry, boundary: DateTime<FixedOffset>) -> bool {
    match entry.resource() {
        Some(Resource::Observation(observation)) => {
            observation_instant(&observation).is_some_and(|instant| instant < boundary)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boundaries_are_sorted_and_unique_by_raw_text() {
        let bundle = Bundle::from_value(json!({
            "entry": [
                { "resource": { "resourceType": "Observation", "issued": "2021-03-01T00:00:00Z" } },
                { "resource": { "resourceType": "Observation", "issued": "2021-01-01T00:00:00Z" } },
                { "resource": { "resourceType": "Observation", "issued": "2021-03-01T00:00:00Z" } },
                { "resource": { "resourceType": "Observation", "issued": "2021-03-01T01:00:00+01:00" } }
            ]
        }))
        .unwrap();

        let raw: Vec<_> = boundaries(extract_observation_records(&bundle))
            .into_iter()
            .map(|record| record.raw)
            .collect();

        assert_eq!(
            raw,
            [
                "2021-01-01T00:00:00Z",
                "2021-03-01T00:00:00Z",
                "2021-03-01T01:00:00+01:00"
            ]
        );
    }

    #[test]
    fn snapshot_serializes_in_bundle_shape() {
        let bundle = Bundle::from_value(json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "id": "dropped",
            "entry": [
                { "resource": { "resourceType": "Patient", "id": "p1" } },
                { "resource": { "resourceType": "Observation", "issued": "2021-01-01T00:00:00Z" } }
            ]
        }))
        .unwrap();

        let partition = partition_bundle(&bundle).unwrap();
        assert_eq!(partition.snapshots.len(), 1);
        assert_eq!(
            partition.snapshots[0].to_json().unwrap(),
            r#"{"resourceType":"Bundle","type":"transaction","entry":[{"resource":{"resourceType":"Patient","id":"p1"}}]}"#
        );
    }
}
