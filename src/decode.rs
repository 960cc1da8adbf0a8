// CLASSIFICATION: COMMUNITY
// Filename: decode.rs v0.6
// Author: Lukas Bower
// Date Modified: 2029-04-02

//! Flattens the recursive telemetry key-value field tree into a flat list
//! of `{child_path, name, value}` records.
//!
//! The schema wraps real data under structural nodes named `content` and
//! `keys`; those two names are collapsed out of the accumulated path so
//! output paths only contain meaningful components.

use crate::protocol::{TelemetryField, ValueByType};
use serde::Serialize;

/// Scalar payload carried by a leaf field, one variant per wire type.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Opaque bytes, serialized as a hex string.
    Bytes(#[serde(serialize_with = "hex_bytes")] Vec<u8>),
    String(String),
    Bool(bool),
    Sint32(i32),
    Sint64(i64),
    Uint32(u32),
    Uint64(u64),
    Double(f64),
    Float(f32),
}

fn hex_bytes<S: serde::Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&hex::encode(bytes))
}

impl From<&ValueByType> for FieldValue {
    fn from(value: &ValueByType) -> Self {
        match value {
            ValueByType::BytesValue(v) => FieldValue::Bytes(v.clone()),
            ValueByType::StringValue(v) => FieldValue::String(v.clone()),
            ValueByType::BoolValue(v) => FieldValue::Bool(*v),
            ValueByType::Sint32Value(v) => FieldValue::Sint32(*v),
            ValueByType::Sint64Value(v) => FieldValue::Sint64(*v),
            ValueByType::Uint32Value(v) => FieldValue::Uint32(*v),
            ValueByType::Uint64Value(v) => FieldValue::Uint64(*v),
            ValueByType::DoubleValue(v) => FieldValue::Double(*v),
            ValueByType::FloatValue(v) => FieldValue::Float(*v),
        }
    }
}

/// One flattened leaf of a telemetry field tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlattenedRecord {
    /// Slash-joined ancestor names, always ending in `/`.
    pub child_path: String,
    pub name: String,
    pub value: FieldValue,
}

/// Walk `fields` depth-first in document order, appending one record per
/// valued leaf to `out`. A node with children is always treated as a
/// branch, even if it also carries a stray scalar; a leaf with no value is
/// skipped silently. Purely computational, never fails.
pub fn flatten(fields: &[TelemetryField], path_prefix: &str, out: &mut Vec<FlattenedRecord>) {
    for field in fields {
        if !field.fields.is_empty() {
            let child = format!("{path_prefix}/{}", field.name);
            // `/content` and `/keys` are schema wrapper names, not path
            // components; exactly those two literals collapse to the root.
            let next = if child == "/content" || child == "/keys" {
                String::new()
            } else {
                child
            };
            flatten(&field.fields, &next, out);
        } else if let Some(value) = &field.value_by_type {
            out.push(FlattenedRecord {
                child_path: format!("{path_prefix}/"),
                name: field.name.clone(),
                value: FieldValue::from(value),
            });
        }
    }
}
