//! FHIR bundle slicing: one snapshot per distinct observation timestamp.

pub mod accessors;
pub mod batch;
pub mod bundle;
pub mod input;
pub mod partition;
pub mod writer;

pub use accessors::{
    extract_observation_records, find_patient_id, parse_offset_datetime,
    resolve_observation_timestamp, ObservationRecord,
};
pub use batch::{run_batch, slice_bundle, slice_file, BatchSummary};
pub use bundle::{Bundle, Entry, Observation, Patient, Resource};
pub use input::list_bundle_files;
pub use partition::{build_snapshot, partition_bundle, Partition, Snapshot};
pub use writer::SnapshotWriter;
