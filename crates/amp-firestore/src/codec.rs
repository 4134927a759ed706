//! Conversion between serde types and Firestore documents.
//!
//! Records are encoded through `serde_json::Value`. RFC 3339 strings become
//! native timestamps so range filters and ordering work server-side.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value as Json};

use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{ArrayValue, Document, MapValue, Value};

/// Encode a record as top-level document fields.
pub fn to_fields<T: Serialize>(record: &T) -> FirestoreResult<HashMap<String, Value>> {
    match serde_json::to_value(record)? {
        Json::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, json_to_value(v)))
            .collect()),
        other => Err(FirestoreError::codec(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Decode a document's fields into a record.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> FirestoreResult<T> {
    let fields = doc.fields.clone().unwrap_or_default();
    let object: Map<String, Json> = fields
        .into_iter()
        .map(|(k, v)| (k, value_to_json(v)))
        .collect();
    serde_json::from_value(Json::Object(object)).map_err(|e| {
        FirestoreError::codec(format!(
            "failed to decode {}: {}",
            doc.name.as_deref().unwrap_or("document"),
            e
        ))
    })
}

/// Timestamp value in the canonical form Firestore echoes back.
pub fn timestamp(ts: DateTime<Utc>) -> Value {
    Value::TimestampValue(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn looks_like_timestamp(s: &str) -> bool {
    s.len() >= 20
        && s.as_bytes().get(4) == Some(&b'-')
        && s.as_bytes().get(10) == Some(&b'T')
        && DateTime::parse_from_rfc3339(s).is_ok()
}

/// Convert a JSON value into a Firestore value.
pub fn json_to_value(json: Json) -> Value {
    match json {
        Json::Null => Value::NullValue(()),
        Json::Bool(b) => Value::BooleanValue(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::IntegerValue(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Value::IntegerValue(u.to_string())
            } else {
                Value::DoubleValue(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => {
            if looks_like_timestamp(&s) {
                match DateTime::parse_from_rfc3339(&s) {
                    Ok(ts) => timestamp(ts.with_timezone(&Utc)),
                    Err(_) => Value::StringValue(s),
                }
            } else {
                Value::StringValue(s)
            }
        }
        Json::Array(items) => Value::ArrayValue(ArrayValue {
            values: Some(items.into_iter().map(json_to_value).collect()),
        }),
        Json::Object(map) => Value::MapValue(MapValue {
            fields: Some(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect()),
        }),
    }
}

/// Convert a Firestore value into JSON.
pub fn value_to_json(value: Value) -> Json {
    match value {
        Value::NullValue(()) => Json::Null,
        Value::BooleanValue(b) => Json::Bool(b),
        Value::IntegerValue(s) => s
            .parse::<i64>()
            .map(Json::from)
            .or_else(|_| s.parse::<u64>().map(Json::from))
            .unwrap_or(Json::String(s)),
        Value::DoubleValue(f) => Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null),
        Value::TimestampValue(s)
        | Value::StringValue(s)
        | Value::BytesValue(s)
        | Value::ReferenceValue(s) => Json::String(s),
        Value::ArrayValue(a) => {
            Json::Array(a.values.unwrap_or_default().into_iter().map(value_to_json).collect())
        }
        Value::MapValue(m) => Json::Object(
            m.fields
                .unwrap_or_default()
                .into_iter()
                .map(|(k, v)| (k, value_to_json(v)))
                .collect(),
        ),
    }
}
