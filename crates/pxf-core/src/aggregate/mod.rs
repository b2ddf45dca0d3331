//! Result aggregator.
//!
//! One entry per identifier, count-weighted. The first sighting's coordinate and
//! sanitized payload are kept; later sightings only bump the count. Responses
//! without an identifier all collapse into a single sentinel entry.

mod sanitize;

pub use sanitize::sanitize_payload;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::grid::Coordinate;

/// The accumulated result for one identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    /// `None` for the sentinel entry.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Sanitized object that carried the identifier.
    #[serde(default)]
    pub identifier_payload: Option<Value>,
    pub count: u64,
}

/// Insertion-ordered, deduplicated record set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<AggregatedRecord>", into = "Vec<AggregatedRecord>")]
pub struct Aggregator {
    records: Vec<AggregatedRecord>,
    index: HashMap<String, usize>,
    /// Position of the sentinel entry, kept apart so no real id can collide with it.
    no_id: Option<usize>,
}

impl From<Vec<AggregatedRecord>> for Aggregator {
    fn from(records: Vec<AggregatedRecord>) -> Self {
        let mut agg = Aggregator::default();
        for r in records {
            agg.merge_record(r);
        }
        agg
    }
}

impl From<Aggregator> for Vec<AggregatedRecord> {
    fn from(agg: Aggregator) -> Self {
        agg.records
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful response for `coordinate`.
    pub fn record(&mut self, coordinate: Coordinate, id: Option<String>, payload: Option<Value>) {
        if let Some(i) = self.position(id.as_deref()) {
            self.records[i].count += 1;
            return;
        }
        let payload = payload.map(|mut p| {
            sanitize_payload(&mut p);
            p
        });
        self.insert(AggregatedRecord {
            id,
            coordinate,
            identifier_payload: payload,
            count: 1,
        });
    }

    /// Fold another aggregator in; entries already present keep their first sighting.
    pub fn merge(&mut self, other: Aggregator) {
        for r in other.records {
            self.merge_record(r);
        }
    }

    fn merge_record(&mut self, r: AggregatedRecord) {
        match self.position(r.id.as_deref()) {
            Some(i) => self.records[i].count += r.count,
            None => self.insert(r),
        }
    }

    fn position(&self, id: Option<&str>) -> Option<usize> {
        match id {
            Some(id) => self.index.get(id).copied(),
            None => self.no_id,
        }
    }

    fn insert(&mut self, r: AggregatedRecord) {
        let i = self.records.len();
        match &r.id {
            Some(id) => {
                self.index.insert(id.clone(), i);
            }
            None => self.no_id = Some(i),
        }
        self.records.push(r);
    }

    /// Entry for identifier `id`.
    pub fn get(&self, id: &str) -> Option<&AggregatedRecord> {
        self.position(Some(id)).map(|i| &self.records[i])
    }

    /// The sentinel entry for responses without an identifier.
    pub fn no_id(&self) -> Option<&AggregatedRecord> {
        self.position(None).map(|i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AggregatedRecord] {
        &self.records
    }

    /// First `limit` entries in first-seen order.
    pub fn sample(&self, limit: usize) -> Vec<AggregatedRecord> {
        self.records.iter().take(limit).cloned().collect()
    }
}

/// Pull the identifier at a dotted `path` out of a response body.
///
/// Returns the identifier (numbers and strings are stringified, anything else is
/// treated as absent) and the object that contained it.
pub fn extract_identifier(body: &Value, path: &str) -> (Option<String>, Option<Value>) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = match parts.pop() {
        Some(l) => l,
        None => return (None, None),
    };
    let mut container = body;
    for p in parts {
        match container.get(p) {
            Some(v) => container = v,
            None => return (None, None),
        }
    }
    if container.is_null() {
        return (None, None);
    }
    let id = match container.get(leaf) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    };
    let payload = if container.is_object() {
        Some(container.clone())
    } else {
        None
    };
    (id, payload)
}
