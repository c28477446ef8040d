//! Typed view over a parsed FHIR bundle.
//!
//! The bundle keeps every entry as the original JSON value so that snapshots
//! can be written back without losing unknown fields or key order. Resources
//! are classified on access through [`Entry::resource`].

use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use timeslice_core::{SliceError, DEFAULT_RESOURCE_TYPE};

/// A parsed root document with its entries in original order.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    resource_type: Value,
    bundle_type: Option<Value>,
    entries: Vec<Entry>,
}

impl Bundle {
    /// Build a bundle from an already parsed JSON value.
    ///
    /// Anything other than a JSON object is rejected. A missing or non-array
    /// `entry` field yields a bundle without entries.
    pub fn from_value(value: Value) -> Result<Self, SliceError> {
        let Value::Object(mut root) = value else {
            return Err(SliceError::NotAnObject);
        };

        let resource_type = root
            .remove("resourceType")
            .filter(|value| !value.is_null())
            .unwrap_or_else(|| Value::String(DEFAULT_RESOURCE_TYPE.to_string()));
        let bundle_type = root.remove("type").filter(|value| !value.is_null());
        let entries = match root.remove("entry") {
            Some(Value::Array(items)) => items.into_iter().map(Entry).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            resource_type,
            bundle_type,
            entries,
        })
    }

    pub fn resource_type(&self) -> &Value {
        &self.resource_type
    }

    pub fn bundle_type(&self) -> Option<&Value> {
        self.bundle_type.as_ref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Resources of every well-formed entry, in entry order.
    pub fn resources(&self) -> impl Iterator<Item = Resource<'_>> {
        self.entries.iter().filter_map(Entry::resource)
    }
}

impl FromStr for Bundle {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value =
            serde_json::from_str(s).map_err(|err| SliceError::Parse(err.to_string()))?;
        Self::from_value(value)
    }
}

/// One element of the bundle's `entry` array, kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Entry(Value);

impl Entry {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The wrapped resource, or `None` when the entry is malformed.
    pub fn resource(&self) -> Option<Resource<'_>> {
        self.0
            .get("resource")
            .and_then(Value::as_object)
            .map(Resource::classify)
    }
}

/// Resource view discriminated by `resourceType`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resource<'a> {
    Patient(Patient<'a>),
    Observation(Observation<'a>),
    Other(&'a Map<String, Value>),
}

impl<'a> Resource<'a> {
    pub fn classify(fields: &'a Map<String, Value>) -> Self {
        match fields.get("resourceType").and_then(Value::as_str) {
            Some("Patient") => Self::Patient(Patient { fields }),
            Some("Observation") => Self::Observation(Observation { fields }),
            _ => Self::Other(fields),
        }
    }

    /// All properties of the resource, untouched.
    pub fn fields(&self) -> &'a Map<String, Value> {
        match self {
            Self::Patient(patient) => patient.fields,
            Self::Observation(observation) => observation.fields,
            Self::Other(fields) => fields,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patient<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Patient<'a> {
    pub fn id(&self) -> Option<&'a str> {
        non_empty_str(self.fields.get("id"))
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.fields
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> Observation<'a> {
    pub fn effective_date_time(&self) -> Option<&'a str> {
        non_empty_str(self.fields.get("effectiveDateTime"))
    }

    pub fn issued(&self) -> Option<&'a str> {
        non_empty_str(self.fields.get("issued"))
    }

    pub fn id(&self) -> Option<&'a str> {
        non_empty_str(self.fields.get("id"))
    }

    pub fn fields(&self) -> &'a Map<String, Value> {
        self.fields
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
}
