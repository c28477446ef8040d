//! Lookups over bundle resources: the patient id and observation timestamps.

use chrono::{DateTime, FixedOffset};
pub use timeslice_core::parse_offset_datetime;

use crate::bundle::{Bundle, Observation, Resource};

/// An observation with a timestamp that resolved and parsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationRecord<'a> {
    pub observation: Observation<'a>,
    pub instant: DateTime<FixedOffset>,
    /// Exact timestamp text, used as grouping key and folder name.
    pub raw: &'a str,
}

/// Id of the first Patient resource that carries one.
pub fn find_patient_id(bundle: &Bundle) -> Option<&str> {
    bundle.resources().find_map(|resource| match resource {
        Resource::Patient(patient) => patient.id(),
        _ => None,
    })
}

/// `effectiveDateTime` when present, otherwise `issued`. Not parsed.
pub fn resolve_observation_timestamp<'a>(observation: &Observation<'a>) -> Option<&'a str> {
    observation
        .effective_date_time()
        .or_else(|| observation.issued())
}


/// Resolved and parsed timestamp of an observation.
pub fn observation_instant(observation: &Observation<'_>) -> Option<DateTime<FixedOffset>> {
    resolve_observation_timestamp(observation).and_then(parse_offset_datetime)
}

/// Observations with usable timestamps, in entry order.
///
/// Observations without a timestamp, or with one that does not parse, are
/// left out.
pub fn extract_observation_records(bundle: &Bundle) -> Vec<ObservationRecord<'_>> {
    bundle
        .resources()
        .filter_map(|resource| {
            let Resource::Observation(observation) = resource else {
                return None;
            };
            let raw = resolve_observation_timestamp(&observation)?;
            let instant = parse_offset_datetime(raw)?;
            Some(ObservationRecord {
                observation,
                instant,
                raw,
            })
        })
        .collect()
}
