pub mod half;
pub mod native;
pub mod nodered;

use crate::model::{DecodingConfig, FieldSpec, FieldType, SensorDescriptor, TimeFormat, TimeSource};
use serde_json::{Map, Value};

pub use nodered::NodeRedFunctionEmitter;

pub const TIME_FIELD: &str = "time";
pub const SENSOR_ID_TAG: &str = "ID";
pub const MEASURETIME_TAG: &str = "measuretime";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeDerivation {
    /// Wall clock of the decoding engine when the message is processed.
    Network,
    Device {
        field: Option<String>,
        format: TimeFormat,
    },
}

impl TimeDerivation {
    pub fn measuretime(&self) -> &'static str {
        match self {
            TimeDerivation::Network => "network",
            TimeDerivation::Device { .. } => "device",
        }
    }
}

/// Dialect-independent description of one sensor's decoder.
#[derive(Debug, Clone)]
pub struct DecoderPlan<'a> {
    pub fields: Vec<&'a FieldSpec>,
    pub time: TimeDerivation,
    pub tags: Map<String, Value>,
}

impl<'a> DecoderPlan<'a> {
    pub fn new(sensor: &SensorDescriptor, config: &'a DecodingConfig) -> Self {
        let fields = config
            .fields
            .iter()
            .filter(|field| {
                if let FieldType::Unknown(kind) = &field.kind {
                    tracing::warn!(
                        field = %field.name,
                        kind = %kind,
                        "skipping field with unknown type"
                    );
                    return false;
                }
                true
            })
            .collect();

        let time = match config.time.from {
            TimeSource::Network => TimeDerivation::Network,
            TimeSource::Device => {
                if config.time.field.is_none() {
                    tracing::warn!(
                        sensor = %sensor.id,
                        "device time source without time.field; no timestamp will be derived"
                    );
                }
                TimeDerivation::Device {
                    field: config.time.field.clone(),
                    format: config.time.format.unwrap_or(TimeFormat::Iso8601),
                }
            }
        };

        let tags = derive_tags(sensor, &time);
        Self { fields, time, tags }
    }
}

/// Sensor tags plus the sensor ID and the time source. Fixed per sensor.
pub fn derive_tags(sensor: &SensorDescriptor, time: &TimeDerivation) -> Map<String, Value> {
    let mut tags: Map<String, Value> = sensor
        .tags
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    tags.insert(SENSOR_ID_TAG.to_string(), Value::String(sensor.id.clone()));
    tags.insert(
        MEASURETIME_TAG.to_string(),
        Value::String(time.measuretime().to_string()),
    );
    tags
}

/// Code generation strategy for the scripting node of a target engine.
pub trait DecoderEmitter {
    fn emit(&self, plan: &DecoderPlan<'_>) -> String;
}

pub fn synthesize_decoder(sensor: &SensorDescriptor, config: &DecodingConfig) -> String {
    synthesize_with(&NodeRedFunctionEmitter, sensor, config)
}

pub fn synthesize_with(
    emitter: &dyn DecoderEmitter,
    sensor: &SensorDescriptor,
    config: &DecodingConfig,
) -> String {
    emitter.emit(&DecoderPlan::new(sensor, config))
}
