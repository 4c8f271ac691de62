use crate::config::Config;
use crate::counter::SequenceCounter;
use crate::flow::template::{instantiate, FlowTemplate};
use crate::flow::FlowGraph;
use crate::model::{DecodingConfig, SensorDescriptor};
use crate::reconcile::FlowEngineClient;
use anyhow::{Context, Result};
use std::sync::Arc;

/// Entry points used by callers that own the sensor records: build a flow
/// for a sensor, push it to the engine, remove it again.
#[derive(Debug, Clone)]
pub struct Provisioner {
    template: Arc<FlowTemplate>,
    counter: Arc<SequenceCounter>,
    engine: FlowEngineClient,
}

impl Provisioner {
    pub fn new(template: FlowTemplate, counter: SequenceCounter, engine: FlowEngineClient) -> Self {
        Self {
            template: Arc::new(template),
            counter: Arc::new(counter),
            engine,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let template = FlowTemplate::load(&config.template_path, config.id_pattern)
            .context("failed to load flow template")?;
        let counter = SequenceCounter::new(&config.counter_path, config.lock_timeout);
        let engine = FlowEngineClient::new(config.engine_settings())
            .context("failed to build flow engine client")?;
        tracing::info!(
            template = %config.template_path.display(),
            counter = %config.counter_path.display(),
            engine = %config.engine_url,
            pattern = %config.id_pattern,
            "provisioner ready"
        );
        Ok(Self::new(template, counter, engine))
    }

    pub fn engine(&self) -> &FlowEngineClient {
        &self.engine
    }

    /// Instantiates the template for one sensor. The counter lock and file
    /// I/O run on the blocking pool.
    pub async fn generate_flow(
        &self,
        sensor: SensorDescriptor,
        config: DecodingConfig,
    ) -> Result<FlowGraph> {
        let template = self.template.clone();
        let counter = self.counter.clone();
        let sensor_id = sensor.id.clone();
        let flow = tokio::task::spawn_blocking(move || {
            instantiate(&template, &counter, &sensor, &config)
        })
        .await
        .context("flow generation task panicked")?
        .with_context(|| format!("failed to generate flow for sensor {sensor_id}"))?;
        Ok(flow)
    }

    pub async fn deploy_flow(&self, flow: FlowGraph) -> bool {
        self.engine.deploy(flow).await
    }

    pub async fn delete_flow(&self, sensor_id: &str) -> bool {
        self.engine.delete(sensor_id).await
    }

    /// Generates and deploys in one step. A generation failure is reported
    /// the same way as a failed deployment.
    pub async fn provision(&self, sensor: SensorDescriptor, config: DecodingConfig) -> bool {
        let sensor_id = sensor.id.clone();
        match self.generate_flow(sensor, config).await {
            Ok(flow) => self.deploy_flow(flow).await,
            Err(err) => {
                let err = format!("{err:#}");
                tracing::error!(sensor = %sensor_id, error = %err, "flow generation failed");
                false
            }
        }
    }
}
