//! Transport-safe device state snapshots
//!
//! Resolvers project live device state into a [`Snapshot`] tree that may still
//! contain structured domain values (group addresses). Serialization walks the
//! tree recursively and turns every address into its canonical string form, so
//! nothing non-primitive reaches a subscriber channel.

use crate::gateway::GroupAddress;
use std::collections::BTreeMap;

/// One value inside a snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Structured group address; serialized as its canonical string
    Address(GroupAddress),
    List(Vec<SnapshotValue>),
    Map(BTreeMap<String, SnapshotValue>),
}

/// A resolved device state, keyed by field name
pub type Snapshot = BTreeMap<String, SnapshotValue>;

impl SnapshotValue {
    /// Convert to the wire JSON form, canonicalizing addresses recursively
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SnapshotValue::Null => serde_json::Value::Null,
            SnapshotValue::Bool(b) => serde_json::Value::Bool(*b),
            SnapshotValue::Int(i) => serde_json::Value::from(*i),
            SnapshotValue::Float(f) => serde_json::Value::from(*f),
            SnapshotValue::Text(t) => serde_json::Value::String(t.clone()),
            SnapshotValue::Address(ga) => serde_json::Value::String(ga.to_string()),
            SnapshotValue::List(items) => {
                serde_json::Value::Array(items.iter().map(SnapshotValue::to_json).collect())
            }
            SnapshotValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Serialize a whole snapshot into its wire JSON object
pub fn snapshot_to_json(snapshot: &Snapshot) -> serde_json::Value {
    serde_json::Value::Object(
        snapshot
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

impl From<bool> for SnapshotValue {
    fn from(b: bool) -> Self {
        SnapshotValue::Bool(b)
    }
}

impl From<i64> for SnapshotValue {
    fn from(i: i64) -> Self {
        SnapshotValue::Int(i)
    }
}

impl From<u8> for SnapshotValue {
    fn from(i: u8) -> Self {
        SnapshotValue::Int(i64::from(i))
    }
}

impl From<u32> for SnapshotValue {
    fn from(i: u32) -> Self {
        SnapshotValue::Int(i64::from(i))
    }
}

impl From<f64> for SnapshotValue {
    fn from(f: f64) -> Self {
        SnapshotValue::Float(f)
    }
}

impl From<&str> for SnapshotValue {
    fn from(s: &str) -> Self {
        SnapshotValue::Text(s.to_string())
    }
}

impl From<String> for SnapshotValue {
    fn from(s: String) -> Self {
        SnapshotValue::Text(s)
    }
}

impl From<GroupAddress> for SnapshotValue {
    fn from(ga: GroupAddress) -> Self {
        SnapshotValue::Address(ga)
    }
}

impl<T: Into<SnapshotValue>> From<Option<T>> for SnapshotValue {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => SnapshotValue::Null,
        }
    }
}
