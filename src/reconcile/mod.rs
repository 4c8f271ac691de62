//! Reconciles generated flows against the flow engine's admin API.
//!
//! Every operation re-reads the deployed flows before mutating anything and
//! matches by tab label, so repeated deploys of one sensor update its flow in
//! place instead of piling up duplicates.

#[cfg(test)]
mod tests;

use crate::flow::{FlowGraph, FlowNode, TAB};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const API_VERSION_HEADER: &str = "Node-RED-API-Version";
const API_VERSION: &str = "v1";
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_url: Url,
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub connect_retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("could not extract flow info, malformed flow object (no labelled \"tab\" node)")]
    MalformedFlow,
    #[error("not authorized")]
    Unauthorized,
    #[error("invalid API version")]
    InvalidApiVersion,
    #[error("engine rejected the request: {body}")]
    BadRequest { body: String },
    #[error("flow {0} not found")]
    NotFound(String),
    #[error("unexpected status code {0}")]
    UnexpectedStatus(StatusCode),
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("invalid flow listing: {0}")]
    InvalidListing(#[source] reqwest::Error),
}

impl ReconcileError {
    fn from_request(url: &Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReconcileError::Timeout {
                url: url.to_string(),
            }
        } else {
            ReconcileError::Transport(err)
        }
    }
}

/// Identity of the flow being deployed, resolved against the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowInfo {
    pub id: String,
    pub label: String,
    pub existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { id: String },
    NotDeployed,
}

/// The subset of a deployed node needed for matching.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployedNode {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    label: Option<Value>,
}

impl DeployedNode {
    pub fn label(&self) -> Option<&str> {
        self.label.as_ref().and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlowListing {
    Flat(Vec<DeployedNode>),
    Versioned { flows: Vec<DeployedNode> },
}

impl FlowListing {
    fn into_nodes(self) -> Vec<DeployedNode> {
        match self {
            FlowListing::Flat(nodes) => nodes,
            FlowListing::Versioned { flows } => flows,
        }
    }
}

#[derive(Debug, Serialize)]
struct FlowSubmission<'a> {
    id: &'a str,
    label: &'a str,
    nodes: &'a [FlowNode],
}

enum DeployState {
    ExtractingInfo(FlowGraph),
    Listing {
        info: FlowInfo,
        nodes: Vec<FlowNode>,
    },
    Matching {
        info: FlowInfo,
        nodes: Vec<FlowNode>,
        deployed: Vec<DeployedNode>,
    },
    Submitting {
        info: FlowInfo,
        nodes: Vec<FlowNode>,
    },
    Done(DeployAction),
}

/// First tab whose label equals `label`.
pub fn find_tab_id(deployed: &[DeployedNode], label: &str) -> Option<String> {
    deployed
        .iter()
        .find(|node| node.kind == TAB && node.label() == Some(label))
        .map(|node| node.id.clone())
}

#[derive(Debug, Clone)]
pub struct FlowEngineClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    connect_retries: u32,
    retry_backoff: Duration,
}

impl FlowEngineClient {
    pub fn new(settings: EngineSettings) -> Result<Self, ReconcileError> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(ReconcileError::Transport)?;

        let mut base_url = settings.base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http,
            base_url,
            token: settings.token,
            connect_retries: settings.connect_retries,
            retry_backoff: settings.retry_backoff,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&FlowSubmission<'_>>,
    ) -> Result<Response, ReconcileError> {
        let mut attempt = 0;
        let mut delay = self.retry_backoff;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .header(API_VERSION_HEADER, API_VERSION);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() && attempt < self.connect_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %err,
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "engine unreachable; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                }
                Err(err) => return Err(ReconcileError::from_request(&url, err)),
            }
        }
    }

    pub async fn list_flows(&self) -> Result<Vec<DeployedNode>, ReconcileError> {
        let url = self.endpoint(&["flows"]);
        let response = self.send(Method::GET, url.clone(), None).await?;
        let status = response.status();
        tracing::info!(status = %status, "list flows");
        match status {
            StatusCode::OK => {
                let listing: FlowListing = response.json().await.map_err(|err| {
                    if err.is_timeout() {
                        ReconcileError::from_request(&url, err)
                    } else {
                        ReconcileError::InvalidListing(err)
                    }
                })?;
                Ok(listing.into_nodes())
            }
            StatusCode::UNAUTHORIZED => Err(ReconcileError::Unauthorized),
            StatusCode::BAD_REQUEST => Err(ReconcileError::InvalidApiVersion),
            other => Err(ReconcileError::UnexpectedStatus(other)),
        }
    }

    /// Creates the flow, or replaces the deployed flow carrying the same label.
    pub async fn try_deploy(&self, flow: FlowGraph) -> Result<DeployAction, ReconcileError> {
        let mut state = DeployState::ExtractingInfo(flow);
        loop {
            state = match state {
                DeployState::ExtractingInfo(mut flow) => {
                    let tab = flow.take_tab().ok_or(ReconcileError::MalformedFlow)?;
                    let label = tab
                        .label()
                        .filter(|label| !label.is_empty())
                        .ok_or(ReconcileError::MalformedFlow)?
                        .to_string();
                    let info = FlowInfo {
                        id: tab.id,
                        label,
                        existing: false,
                    };
                    DeployState::Listing {
                        info,
                        nodes: flow.nodes,
                    }
                }
                DeployState::Listing { info, nodes } => {
                    let deployed = self.list_flows().await?;
                    DeployState::Matching {
                        info,
                        nodes,
                        deployed,
                    }
                }
                DeployState::Matching {
                    mut info,
                    nodes,
                    deployed,
                } => {
                    if let Some(id) = find_tab_id(&deployed, &info.label) {
                        tracing::info!(label = %info.label, id = %id, "found deployed flow");
                        info.id = id;
                        info.existing = true;
                    }
                    DeployState::Submitting { info, nodes }
                }
                DeployState::Submitting { info, nodes } => {
                    DeployState::Done(self.submit(&info, nodes).await?)
                }
                DeployState::Done(action) => return Ok(action),
            };
        }
    }

    async fn submit(
        &self,
        info: &FlowInfo,
        mut nodes: Vec<FlowNode>,
    ) -> Result<DeployAction, ReconcileError> {
        let (method, url, action) = if info.existing {
            for node in &mut nodes {
                node.z = Some(info.id.clone());
            }
            (
                Method::PUT,
                self.endpoint(&["flow", &info.id]),
                DeployAction::Updated,
            )
        } else {
            (Method::POST, self.endpoint(&["flow"]), DeployAction::Created)
        };

        tracing::info!(method = %method, url = %url, label = %info.label, "submitting flow");
        let body = FlowSubmission {
            id: &info.id,
            label: &info.label,
            nodes: &nodes,
        };
        let response = self.send(method, url, Some(&body)).await?;
        tracing::info!(status = %response.status(), "deploying flow response");
        check_write(response).await?;
        Ok(action)
    }

    pub async fn deploy(&self, flow: FlowGraph) -> bool {
        match self.try_deploy(flow).await {
            Ok(action) => {
                tracing::info!(action = ?action, "flow deployed");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "flow deployment failed");
                false
            }
        }
    }

    /// Removes the flow whose tab carries `label`. Nothing deployed is not
    /// an error.
    pub async fn try_delete(&self, label: &str) -> Result<DeleteOutcome, ReconcileError> {
        let deployed = self.list_flows().await?;
        let Some(id) = find_tab_id(&deployed, label) else {
            tracing::info!(label, "no deployed flow found, nothing to do");
            return Ok(DeleteOutcome::NotDeployed);
        };
        tracing::info!(label, id = %id, "found deployed flow");

        let url = self.endpoint(&["flow", &id]);
        let response = self.send(Method::DELETE, url, None).await?;
        tracing::info!(status = %response.status(), "deleting flow response");
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ReconcileError::NotFound(id));
        }
        check_write(response).await?;
        Ok(DeleteOutcome::Deleted { id })
    }

    pub async fn delete(&self, label: &str) -> bool {
        match self.try_delete(label).await {
            Ok(outcome) => {
                tracing::info!(label, outcome = ?outcome, "flow delete finished");
                true
            }
            Err(err) => {
                tracing::error!(label, error = %err, "flow delete failed");
                false
            }
        }
    }
}

async fn check_write(response: Response) -> Result<(), ReconcileError> {
    match response.status() {
        StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
        StatusCode::BAD_REQUEST => {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(body = %body, "engine error response");
            Err(ReconcileError::BadRequest { body })
        }
        StatusCode::UNAUTHORIZED => Err(ReconcileError::Unauthorized),
        other => Err(ReconcileError::UnexpectedStatus(other)),
    }
}
