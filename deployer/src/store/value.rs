//! Firestore typed-value encoding
//!
//! Only the value types deployment records use are supported. Other fields
//! on the agent document are ignored when decoding.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

pub(crate) fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

pub(crate) fn timestamp_value(value: &DateTime<Utc>) -> Value {
    json!({ "timestampValue": value.to_rfc3339_opts(SecondsFormat::Micros, true) })
}

pub(crate) fn null_value() -> Value {
    json!({ "nullValue": null })
}

/// String content of a field; `None` when absent, null, or another type
pub(crate) fn get_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)?
        .get("stringValue")?
        .as_str()
        .map(str::to_string)
}

/// Timestamp content of a field; unparseable values read as absent
pub(crate) fn get_timestamp(fields: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = fields.get(key)?.get("timestampValue")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
