//! Normalize a raw CRM lead record while keeping its field names.
use std::collections::HashSet;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::normalize::{
    array_to_csv, canonical_phone, is_truthy, parse_date_like, to_bool_flag, to_ist_instant,
    NULL,
};

/// Lead record as exported by the CRM: an untyped JSON object.
pub type RawRecord = Map<String, Value>;

pub const PROPERTIES_VISITED_KEY: &str = "propertiesVisited";
pub const LAST_VISITED_ON_KEY: &str = "lastVisitedOn";

/// Keys that may hold the visit history, in order of preference.
const VISIT_HISTORY_KEYS: [&str; 3] = ["visits", "Visits", "visitHistory"];

const COMPLETED_STATUS: &str = "completed";

/// How a recognized CRM field is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Phone,
    List,
    Date,
    Boolean,
}

impl FieldKind {
    pub fn of(key: &str) -> Option<FieldKind> {
        match key {
            "Phone" | "Spouse_Phone" | "CP_Phone" => Some(FieldKind::Phone),
            "Preferences" | "Preferred_Area" | "Truva_Micromarket" => Some(FieldKind::List),
            "Created_Time" | "Tag_Expiry_Date" => Some(FieldKind::Date),
            "DND" | "Interested_in_visit" => Some(FieldKind::Boolean),
            _ => None,
        }
    }

    fn apply(self, value: &Value) -> Value {
        match self {
            FieldKind::Phone => canonical_phone(value).map_or(Value::Null, Value::String),
            FieldKind::Date => match value {
                Value::Null => Value::Null,
                Value::String(s) if s.is_empty() => value.clone(),
                _ => to_ist_instant(value).map_or_else(|| passthrough(value), Value::String),
            },
            FieldKind::Boolean => to_bool_flag(value).map_or(Value::Null, Value::Bool),
            // Non-array list fields have nothing to collapse.
            FieldKind::List => passthrough(value),
        }
    }
}

/// A lead record after field normalization, plus the derived visit aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformedRecord(Map<String, Value>);

impl TransformedRecord {
    pub fn get(&self, key: &str) -> &Value {
        self.0.get(key).unwrap_or(&NULL)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn properties_visited(&self) -> u64 {
        self.get(PROPERTIES_VISITED_KEY).as_u64().unwrap_or(0)
    }

    pub fn last_visited_on(&self) -> Option<&str> {
        self.get(LAST_VISITED_ON_KEY).as_str()
    }
}

impl From<Map<String, Value>> for TransformedRecord {
    fn from(map: Map<String, Value>) -> Self {
        TransformedRecord(map)
    }
}

/// Best effort conversion of an inbound value into a record.
///
/// Objects are used as-is and strings are parsed as JSON. Anything that does not end up as a
/// JSON object yields an empty record.
pub fn parse_raw(input: &Value) -> RawRecord {
    match input {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => RawRecord::new(),
            Err(error) => {
                debug!("could not parse raw record, using an empty one: {}", error);
                RawRecord::new()
            }
        },
        _ => RawRecord::new(),
    }
}

/// Normalize every field of a raw record and append the visit aggregates.
pub fn transform(input: &Value) -> TransformedRecord {
    let raw = parse_raw(input);
    let mut result = Map::with_capacity(raw.len() + 2);

    for (key, value) in &raw {
        let transformed = if value.is_array() {
            array_to_csv(value)
        } else {
            match FieldKind::of(key) {
                Some(kind) => kind.apply(value),
                None => passthrough(value),
            }
        };
        result.insert(key.clone(), transformed);
    }

    let visits = visit_history(&raw);
    result.insert(
        PROPERTIES_VISITED_KEY.to_owned(),
        Value::from(count_properties_visited(visits)),
    );
    result.insert(
        LAST_VISITED_ON_KEY.to_owned(),
        last_visited_on(visits).map_or(Value::Null, Value::String),
    );

    TransformedRecord(result)
}

fn passthrough(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_owned()),
        other => other.clone(),
    }
}

fn visit_history(raw: &RawRecord) -> &[Value] {
    let [primary, fallbacks @ ..] = VISIT_HISTORY_KEYS;
    let found = match raw.get(primary) {
        Some(visits @ Value::Array(_)) => Some(visits),
        _ => fallbacks
            .iter()
            .filter_map(|key| raw.get(*key))
            .find(|value| is_truthy(value)),
    };

    match found {
        Some(Value::Array(visits)) => visits,
        _ => &[],
    }
}

fn completed_visits(visits: &[Value]) -> impl Iterator<Item = &Map<String, Value>> {
    visits.iter().filter_map(Value::as_object).filter(|visit| {
        visit
            .get("status")
            .and_then(Value::as_str)
            .map_or(false, |status| status.eq_ignore_ascii_case(COMPLETED_STATUS))
    })
}

/// Number of distinct properties with at least one completed visit.
pub fn count_properties_visited(visits: &[Value]) -> usize {
    completed_visits(visits)
        .filter_map(|visit| visit.get("propertyId"))
        .filter(|property| is_truthy(property))
        .map(Value::to_string)
        .collect::<HashSet<_>>()
        .len()
}

fn visit_date(visit: &Map<String, Value>) -> &Value {
    ["visitDate", "from"]
        .iter()
        .filter_map(|key| visit.get(*key))
        .find(|value| is_truthy(value))
        .unwrap_or(&NULL)
}

fn visit_instant(visit: &Map<String, Value>) -> Option<DateTime<FixedOffset>> {
    match visit_date(visit) {
        // Visits without a date sort as the epoch.
        Value::Null => parse_date_like(&Value::from(0)),
        date => parse_date_like(date),
    }
}

/// IST instant of the most recent completed visit. The first of several equally recent
/// visits wins, and visits with unreadable dates never replace the current candidate.
pub fn last_visited_on(visits: &[Value]) -> Option<String> {
    let latest = completed_visits(visits).reduce(|latest, current| {
        match (visit_instant(current), visit_instant(latest)) {
            (Some(current_at), Some(latest_at)) if current_at > latest_at => current,
            _ => latest,
        }
    })?;

    to_ist_instant(visit_date(latest))
}
