use super::ids::{shift_ids, IdPattern};
use super::{FlowGraph, FUNCTION, INFLUXDB_OUT, TAB, TTN_APP, TTN_UPLINK};
use crate::counter::{CounterError, SequenceCounter};
use crate::decoder::{synthesize_with, DecoderEmitter, NodeRedFunctionEmitter};
use crate::model::{DecodingConfig, SensorDescriptor};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read flow template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("flow template {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("flow template is not a flat list of flow nodes: {0}")]
    Shape(#[source] serde_json::Error),
    #[error("flow template has no \"tab\" node")]
    MissingTab,
    #[error(transparent)]
    Counter(#[from] CounterError),
}

/// A flow graph document used as the blueprint for every sensor.
#[derive(Debug, Clone)]
pub struct FlowTemplate {
    document: Value,
    pattern: IdPattern,
}

impl FlowTemplate {
    pub fn load(path: &Path, pattern: IdPattern) -> Result<Self, TemplateError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document = serde_json::from_str(&raw).map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(document, pattern)
    }

    pub fn from_value(document: Value, pattern: IdPattern) -> Result<Self, TemplateError> {
        let graph: FlowGraph =
            serde_json::from_value(document.clone()).map_err(TemplateError::Shape)?;
        if graph.tab().is_none() {
            return Err(TemplateError::MissingTab);
        }
        let unmatched: Vec<&str> = graph
            .nodes
            .iter()
            .map(|node| node.id.as_str())
            .filter(|id| !pattern.matches(id))
            .collect();
        if !unmatched.is_empty() {
            tracing::warn!(
                pattern = %pattern,
                ids = ?unmatched,
                "template node ids do not match the id pattern and will not be shifted"
            );
        }
        Ok(Self { document, pattern })
    }

    pub fn pattern(&self) -> IdPattern {
        self.pattern
    }

    /// Builds the flow for `sensor` with every id shifted by `sequence`.
    pub fn render(
        &self,
        sequence: u64,
        sensor: &SensorDescriptor,
        config: &DecodingConfig,
    ) -> Result<FlowGraph, TemplateError> {
        self.render_with(&NodeRedFunctionEmitter, sequence, sensor, config)
    }

    pub fn render_with(
        &self,
        emitter: &dyn DecoderEmitter,
        sequence: u64,
        sensor: &SensorDescriptor,
        config: &DecodingConfig,
    ) -> Result<FlowGraph, TemplateError> {
        let mut document = self.document.clone();
        let shifted = shift_ids(&mut document, self.pattern, sequence);
        tracing::info!(sequence, shifted, sensor = %sensor.id, "template ids incremented");

        let mut graph: FlowGraph =
            serde_json::from_value(document).map_err(TemplateError::Shape)?;
        let decoder = synthesize_with(emitter, sensor, config);

        for node in &mut graph.nodes {
            match node.kind.as_str() {
                TAB => node.set("label", sensor.id.as_str()),
                TTN_UPLINK => node.set("dev_id", sensor.ttn.dev_id.as_str()),
                TTN_APP => {
                    node.set("appId", sensor.ttn.app_id.as_str());
                    node.set("accessKey", sensor.ttn.access_key.as_str());
                }
                FUNCTION => node.set("func", decoder.as_str()),
                INFLUXDB_OUT => node.set("measurement", config.db.measurement.as_str()),
                _ => {}
            }
        }
        Ok(graph)
    }
}

/// Renders the template with the next sequence number. The number is only
/// persisted once rendering succeeded.
pub fn instantiate(
    template: &FlowTemplate,
    counter: &SequenceCounter,
    sensor: &SensorDescriptor,
    config: &DecodingConfig,
) -> Result<FlowGraph, TemplateError> {
    counter.advance(|sequence| template.render(sequence, sensor, config))
}
