use crate::decoder::native::decode_payload;
use crate::decoder::{synthesize_decoder, DecoderPlan};
use crate::model::{DecodingConfig, ModelError, SensorDescriptor};
use crate::provisioner::Provisioner;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone)]
pub struct HttpState {
    pub provisioner: Provisioner,
}

#[derive(Debug, Deserialize)]
struct DeploymentRequest {
    sensor: SensorDescriptor,
    config: DecodingConfig,
}

#[derive(Debug, Serialize)]
struct DeploymentResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PreviewRequest {
    sensor: SensorDescriptor,
    config: DecodingConfig,
    payload_hex: String,
    #[serde(default)]
    received_at_ns: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PreviewResponse {
    payload: Value,
    script: String,
}

type HttpResult<T> = Result<T, (StatusCode, String)>;

fn invalid(err: impl std::fmt::Display) -> (StatusCode, String) {
    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
}

fn validate(sensor: &SensorDescriptor, config: &DecodingConfig) -> Result<(), ModelError> {
    sensor.validate()?;
    config.validate()
}

fn outcome(success: bool) -> (StatusCode, Json<DeploymentResponse>) {
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(DeploymentResponse { success }))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn post_deployment(
    State(state): State<HttpState>,
    Json(request): Json<DeploymentRequest>,
) -> HttpResult<(StatusCode, Json<DeploymentResponse>)> {
    validate(&request.sensor, &request.config).map_err(invalid)?;
    tracing::info!(sensor = %request.sensor.id, "deployment requested");
    let success = state
        .provisioner
        .provision(request.sensor, request.config)
        .await;
    Ok(outcome(success))
}

async fn delete_deployment(
    State(state): State<HttpState>,
    Path(sensor_id): Path<String>,
) -> (StatusCode, Json<DeploymentResponse>) {
    tracing::info!(sensor = %sensor_id, "deletion requested");
    outcome(state.provisioner.delete_flow(&sensor_id).await)
}

async fn post_preview(Json(request): Json<PreviewRequest>) -> HttpResult<Json<PreviewResponse>> {
    validate(&request.sensor, &request.config).map_err(invalid)?;
    let payload = hex::decode(request.payload_hex.trim())
        .map_err(|err| invalid(format!("payload_hex: {err}")))?;
    let received_at_ns = request
        .received_at_ns
        .or_else(|| chrono::Utc::now().timestamp_nanos_opt())
        .unwrap_or_default();

    let plan = DecoderPlan::new(&request.sensor, &request.config);
    let record = decode_payload(&plan, &payload, received_at_ns).map_err(invalid)?;
    Ok(Json(PreviewResponse {
        payload: record.to_payload(),
        script: synthesize_decoder(&request.sensor, &request.config),
    }))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/deployments", post(post_deployment))
        .route("/v1/deployments/{sensor_id}", delete(delete_deployment))
        .route("/v1/preview", post(post_preview))
        .with_state(state)
}
