//! In-process interpreter of a [`DecoderPlan`].
//!
//! Produces the same `[fields, tags]` record as the generated script so a
//! config can be previewed against a captured uplink before it is deployed.
//! Unlike the script it refuses reads past the end of the payload.

use super::half::half_to_f32;
use super::{DecoderPlan, TimeDerivation, TIME_FIELD};
use crate::model::{FieldSpec, FieldType, TimeFormat};
use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("field {name:?} reads bytes {offset}..{end} but the payload has {len} bytes")]
    OutOfBounds {
        name: String,
        offset: usize,
        end: usize,
        len: usize,
    },
    #[error("time field {0:?} is not present in the decoded fields")]
    MissingTimeField(String),
    #[error("time field {field:?} is not a usable timestamp: {reason}")]
    InvalidTimestamp { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    pub fields: Map<String, Value>,
    pub tags: Map<String, Value>,
}

impl DecodedRecord {
    /// The `msg.payload` value the script would emit.
    pub fn to_payload(&self) -> Value {
        Value::Array(vec![
            Value::Object(self.fields.clone()),
            Value::Object(self.tags.clone()),
        ])
    }
}

pub fn decode_payload(
    plan: &DecoderPlan<'_>,
    payload: &[u8],
    received_at_ns: i64,
) -> Result<DecodedRecord, DecodeError> {
    let mut fields = Map::new();
    for field in &plan.fields {
        if let Some(value) = decode_field(field, payload)? {
            fields.insert(field.name.clone(), value);
        }
    }

    match &plan.time {
        TimeDerivation::Network => {
            fields.insert(TIME_FIELD.to_string(), Value::from(received_at_ns));
        }
        TimeDerivation::Device {
            field: Some(name),
            format,
        } => {
            let raw = fields
                .get(name)
                .ok_or_else(|| DecodeError::MissingTimeField(name.clone()))?;
            let nanos = timestamp_nanos(name, raw, *format)?;
            fields.insert(TIME_FIELD.to_string(), Value::from(nanos));
        }
        TimeDerivation::Device { field: None, .. } => {}
    }

    Ok(DecodedRecord {
        fields,
        tags: plan.tags.clone(),
    })
}

fn decode_field(field: &FieldSpec, payload: &[u8]) -> Result<Option<Value>, DecodeError> {
    let length = field.length_bytes;
    let value = match &field.kind {
        FieldType::Int | FieldType::Uint if !matches!(length, 1..=6 | 8) => return Ok(None),
        FieldType::Int => {
            let raw = read_le(slice(field, payload, length)?);
            let shift = 64 - 8 * length as u32;
            Value::from(((raw << shift) as i64) >> shift)
        }
        FieldType::Uint => Value::from(read_le(slice(field, payload, length)?)),
        FieldType::Float => match length {
            2 => {
                let bytes = slice(field, payload, 2)?;
                float_value(f64::from(half_to_f32([bytes[0], bytes[1]])))
            }
            4 => {
                let bytes = slice(field, payload, 4)?;
                let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                float_value(f64::from(f32::from_bits(raw)))
            }
            _ => {
                let bytes = slice(field, payload, 8)?;
                float_value(f64::from_bits(read_le(bytes)))
            }
        },
        FieldType::StringAscii => {
            let bytes = slice(field, payload, length)?;
            Value::String(bytes.iter().map(|b| char::from(b & 0x7f)).collect())
        }
        FieldType::StringUnicode => {
            let bytes = slice(field, payload, length)?;
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        FieldType::Unknown(_) => return Ok(None),
    };
    Ok(Some(value))
}

fn slice<'p>(field: &FieldSpec, payload: &'p [u8], width: usize) -> Result<&'p [u8], DecodeError> {
    let offset = field.offset_bytes;
    let end = offset.saturating_add(width);
    payload
        .get(offset..end)
        .ok_or_else(|| DecodeError::OutOfBounds {
            name: field.name.clone(),
            offset,
            end,
            len: payload.len(),
        })
}

fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn timestamp_nanos(name: &str, raw: &Value, format: TimeFormat) -> Result<i64, DecodeError> {
    let invalid = |reason: &str| DecodeError::InvalidTimestamp {
        field: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(factor) = format.nanos_per_unit() else {
        let text = raw.as_str().ok_or_else(|| invalid("expected a calendar string"))?;
        let parsed = DateTime::parse_from_rfc3339(text.trim())
            .map_err(|err| invalid(&err.to_string()))?;
        return parsed
            .timestamp_nanos_opt()
            .ok_or_else(|| invalid("outside the representable nanosecond range"));
    };

    if let Some(whole) = raw.as_i64() {
        return whole
            .checked_mul(factor)
            .ok_or_else(|| invalid("outside the representable nanosecond range"));
    }
    let number = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("expected a numeric epoch value"))?;

    let scaled = number * factor as f64;
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(invalid("outside the representable nanosecond range"));
    }
    Ok(scaled as i64)
}
