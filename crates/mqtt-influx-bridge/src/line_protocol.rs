// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB line protocol encoding.
//!
//! Converts decoded JSON records into `measurement field=value timestamp`
//! entries, one entry per encodable field. Integers render bare, floats
//! keep a fractional marker so the database types them as floats, and
//! strings are quoted. Booleans, nulls, and nested structures have no
//! scalar form and are skipped.

use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A field value in its line protocol representation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Integer field, rendered bare (`42`).
    Integer(i64),
    /// Float field, rendered with a fractional component (`21.5`, `2.0`).
    Float(f64),
    /// String field, rendered quoted with embedded quotes escaped.
    Text(String),
}

impl FieldValue {
    /// Coerce a decoded JSON value into a field value.
    ///
    /// Numbers map directly (integer first, float otherwise). Strings are
    /// re-parsed: integer, then float, then literal text. Booleans, nulls,
    /// arrays, and objects yield `None` and the field is skipped.
    pub fn from_json(value: &Value) -> Option<FieldValue> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FieldValue::Integer(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            Value::String(s) => Some(FieldValue::from_text(s)),
            _ => None,
        }
    }

    /// Interpret a string payload value: integer parse, then float parse,
    /// then literal text.
    fn from_text(s: &str) -> FieldValue {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return FieldValue::Integer(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            // "inf" and "nan" parse as f64 but have no line protocol form
            if f.is_finite() {
                return FieldValue::Float(f);
            }
        }
        FieldValue::Text(s.to_string())
    }

    /// Render this value in line protocol form.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => v.to_string(),
            FieldValue::Float(v) => format_float(*v),
            FieldValue::Text(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        }
    }
}

/// Render a float keeping its fractional marker (`2.0`, not `2`), so the
/// write endpoint never reclassifies a float field as an integer.
fn format_float(v: f64) -> String {
    match serde_json::Number::from_f64(v) {
        Some(n) => n.to_string(),
        // Non-finite values are filtered out before rendering.
        None => v.to_string(),
    }
}

/// One encoded point: `measurement field=value timestamp`.
#[derive(Debug, Clone)]
pub struct LineEntry {
    /// Measurement name (escaped if escaping is enabled).
    pub measurement: String,
    /// Field key (escaped if escaping is enabled).
    pub field_key: String,
    /// Field value.
    pub value: FieldValue,
    /// Nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
}

impl LineEntry {
    /// Format the full line protocol text.
    pub fn to_line(&self) -> String {
        format!(
            "{} {}={} {}",
            self.measurement,
            self.field_key,
            self.value.to_line_protocol(),
            self.timestamp_ns
        )
    }
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_field_key(name: &str) -> String {
    name.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Encodes validated records into line protocol entries.
///
/// Name escaping covers the measurement (commas, spaces) and field keys
/// (commas, equals signs, spaces). Disabling it reproduces topic and field
/// names byte for byte, for deployments whose naming scheme never collides
/// with the protocol's reserved characters.
#[derive(Debug, Clone)]
pub struct LineEncoder {
    escape_names: bool,
}

impl LineEncoder {
    pub fn new(escape_names: bool) -> Self {
        Self { escape_names }
    }

    /// Encode one record. Every produced entry shares `timestamp_ns`, the
    /// receive time of the originating message.
    pub fn encode(
        &self,
        measurement: &str,
        record: &Map<String, Value>,
        timestamp_ns: i64,
    ) -> Vec<LineEntry> {
        let measurement = if self.escape_names {
            escape_measurement(measurement)
        } else {
            measurement.to_string()
        };

        record
            .iter()
            .filter_map(|(key, value)| {
                let value = FieldValue::from_json(value)?;
                let field_key = if self.escape_names {
                    escape_field_key(key)
                } else {
                    key.clone()
                };
                Some(LineEntry {
                    measurement: measurement.clone(),
                    field_key,
                    value,
                    timestamp_ns,
                })
            })
            .collect()
    }
}

/// Current wall clock time as nanoseconds since the Unix epoch.
pub fn now_timestamp_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
