use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("sensor ID must not be empty")]
    EmptySensorId,
    #[error("sensor ID {0:?} must not contain whitespace")]
    SensorIdWhitespace(String),
    #[error("field {name:?} has unknown type {kind:?}")]
    UnknownFieldType { name: String, kind: String },
    #[error("field {name:?}: integer types can only be 1, 2, 4 or 8 bytes long (got {length})")]
    IntegerLength { name: String, length: usize },
    #[error("field {name:?}: floating types can only be 2, 4 or 8 bytes long (got {length})")]
    FloatLength { name: String, length: usize },
    #[error("field {name:?} must be at least one byte long")]
    EmptyField { name: String },
    #[error("field name {0:?} is declared more than once")]
    DuplicateField(String),
    #[error("time.field and time.format are required when time.from is \"device\"")]
    MissingTimeField,
    #[error("time.field {0:?} does not match any field name in fields")]
    UnknownTimeField(String),
}

/// Network-transport binding of a sensor (The Things Network).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtnBinding {
    #[serde(rename = "DevId")]
    pub dev_id: String,
    #[serde(rename = "AppId")]
    pub app_id: String,
    #[serde(rename = "AccessKey")]
    pub access_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(rename = "TTN")]
    pub ttn: TtnBinding,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl SensorDescriptor {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptySensorId);
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(ModelError::SensorIdWhitespace(self.id.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Int,
    Uint,
    Float,
    StringAscii,
    StringUnicode,
    Unknown(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Int => "int",
            FieldType::Uint => "uint",
            FieldType::Float => "float",
            FieldType::StringAscii => "string_ascii",
            FieldType::StringUnicode => "string_unicode",
            FieldType::Unknown(raw) => raw,
        }
    }
}

impl From<String> for FieldType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "int" => FieldType::Int,
            "uint" => FieldType::Uint,
            "float" => FieldType::Float,
            "string" | "string_ascii" => FieldType::StringAscii,
            "string_unicode" => FieldType::StringUnicode,
            _ => FieldType::Unknown(raw),
        }
    }
}

impl From<FieldType> for String {
    fn from(kind: FieldType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    pub offset_bytes: usize,
    pub length_bytes: usize,
}

impl FieldSpec {
    pub fn end(&self) -> usize {
        self.offset_bytes.saturating_add(self.length_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Network,
    #[serde(alias = "field")]
    Device,
}

/// Anything other than the epoch variants is parsed as a calendar timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    EpochNs,
    EpochMs,
    EpochS,
    #[serde(other)]
    Iso8601,
}

impl TimeFormat {
    /// Multiplier that normalises an epoch value to nanoseconds.
    pub fn nanos_per_unit(self) -> Option<i64> {
        match self {
            TimeFormat::EpochNs => Some(1),
            TimeFormat::EpochMs => Some(1_000_000),
            TimeFormat::EpochS => Some(1_000_000_000),
            TimeFormat::Iso8601 => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub from: TimeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<TimeFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbTarget {
    pub measurement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodingConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    pub fields: Vec<FieldSpec>,
    pub time: TimeSpec,
    pub db: DbTarget,
}

impl DecodingConfig {
    /// Save-time checks. Generation itself tolerates configs that fail these.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ModelError::DuplicateField(field.name.clone()));
            }
            match &field.kind {
                FieldType::Int | FieldType::Uint => {
                    if !matches!(field.length_bytes, 1 | 2 | 4 | 8) {
                        return Err(ModelError::IntegerLength {
                            name: field.name.clone(),
                            length: field.length_bytes,
                        });
                    }
                }
                FieldType::Float => {
                    if !matches!(field.length_bytes, 2 | 4 | 8) {
                        return Err(ModelError::FloatLength {
                            name: field.name.clone(),
                            length: field.length_bytes,
                        });
                    }
                }
                FieldType::StringAscii | FieldType::StringUnicode => {
                    if field.length_bytes == 0 {
                        return Err(ModelError::EmptyField {
                            name: field.name.clone(),
                        });
                    }
                }
                FieldType::Unknown(kind) => {
                    return Err(ModelError::UnknownFieldType {
                        name: field.name.clone(),
                        kind: kind.clone(),
                    });
                }
            }
        }

        if self.time.from == TimeSource::Device {
            let (Some(name), Some(_)) = (self.time.field.as_deref(), self.time.format) else {
                return Err(ModelError::MissingTimeField);
            };
            if !seen.contains(name) {
                return Err(ModelError::UnknownTimeField(name.to_string()));
            }
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }
}
