use super::*;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Recorded {
    method: &'static str,
    path: String,
    authorization: Option<String>,
    api_version: Option<String>,
    body: Option<Value>,
}

struct MockEngine {
    listing: Value,
    list_status: StatusCode,
    list_delay: Duration,
    write_status: StatusCode,
    write_body: String,
    requests: Vec<Recorded>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            listing: json!([]),
            list_status: StatusCode::OK,
            list_delay: Duration::ZERO,
            write_status: StatusCode::NO_CONTENT,
            write_body: String::new(),
            requests: Vec::new(),
        }
    }
}

type Shared = Arc<Mutex<MockEngine>>;

fn record(
    state: &Shared,
    method: &'static str,
    path: String,
    headers: &HeaderMap,
    body: Option<Value>,
) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state.lock().unwrap().requests.push(Recorded {
        method,
        path,
        authorization: header("authorization"),
        api_version: header("node-red-api-version"),
        body,
    });
}

fn write_response(state: &Shared) -> AxumResponse {
    let engine = state.lock().unwrap();
    (engine.write_status, engine.write_body.clone()).into_response()
}

async fn list(State(state): State<Shared>, headers: HeaderMap) -> AxumResponse {
    record(&state, "GET", "/flows".to_string(), &headers, None);
    let delay = state.lock().unwrap().list_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let engine = state.lock().unwrap();
    (engine.list_status, Json(engine.listing.clone())).into_response()
}

async fn create(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AxumResponse {
    record(&state, "POST", "/flow".to_string(), &headers, Some(body));
    write_response(&state)
}

async fn update(
    Path(id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> AxumResponse {
    record(&state, "PUT", format!("/flow/{id}"), &headers, Some(body));
    write_response(&state)
}

async fn remove(
    Path(id): Path<String>,
    State(state): State<Shared>,
    headers: HeaderMap,
) -> AxumResponse {
    record(&state, "DELETE", format!("/flow/{id}"), &headers, None);
    write_response(&state)
}

async fn spawn_engine(engine: MockEngine) -> (Url, Shared) {
    let state: Shared = Arc::new(Mutex::new(engine));
    let app = Router::new()
        .route("/flows", get(list))
        .route("/flow", post(create))
        .route("/flow/{id}", put(update).delete(remove))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (Url::parse(&format!("http://{addr}")).unwrap(), state)
}

fn settings(base_url: Url) -> EngineSettings {
    EngineSettings {
        base_url,
        token: None,
        request_timeout: Duration::from_secs(2),
        connect_retries: 0,
        retry_backoff: Duration::from_millis(10),
    }
}

fn client(base_url: Url) -> FlowEngineClient {
    FlowEngineClient::new(settings(base_url)).unwrap()
}

fn generated_flow() -> FlowGraph {
    serde_json::from_value(json!([
        { "id": "5d3a8c1e.b2f4a7", "type": "tab", "label": "sensorA" },
        { "id": "1b7c5d92.e8a047", "type": "ttn app", "appId": "farm-app" },
        {
            "id": "9e4f2a71.c63b59",
            "type": "ttn uplink",
            "z": "5d3a8c1e.b2f4a7",
            "wires": [["c2a9e6f4.3d1b71"]]
        },
        { "id": "c2a9e6f4.3d1b71", "type": "function", "z": "5d3a8c1e.b2f4a7", "func": "" }
    ]))
    .unwrap()
}

fn requests(state: &Shared) -> Vec<Recorded> {
    state.lock().unwrap().requests.clone()
}

#[tokio::test]
async fn new_label_is_created_with_post() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([
            { "id": "0000aaaa.000001", "type": "tab", "label": "other" },
            { "id": "0000aaaa.000002", "type": "function", "z": "0000aaaa.000001" }
        ]),
        ..MockEngine::default()
    })
    .await;

    let action = client(url).try_deploy(generated_flow()).await.unwrap();
    assert_eq!(action, DeployAction::Created);

    let requests = requests(&state);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].api_version.as_deref(), Some("v1"));
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/flow");

    let body = requests[1].body.clone().unwrap();
    assert_eq!(body["id"], "5d3a8c1e.b2f4a7");
    assert_eq!(body["label"], "sensorA");
    let nodes = body["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|node| node["type"] != "tab"));
    assert!(nodes[0].get("z").is_none());
}

#[tokio::test]
async fn deployed_label_is_updated_in_place() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([
            { "id": "17a3.4f2", "type": "tab", "label": "sensorA" },
            { "id": "17a3.4f3", "type": "function", "z": "17a3.4f2" }
        ]),
        ..MockEngine::default()
    })
    .await;

    let action = client(url).try_deploy(generated_flow()).await.unwrap();
    assert_eq!(action, DeployAction::Updated);

    let submit = requests(&state).pop().unwrap();
    assert_eq!(submit.method, "PUT");
    assert_eq!(submit.path, "/flow/17a3.4f2");
    let body = submit.body.unwrap();
    assert_eq!(body["id"], "17a3.4f2");
    assert_eq!(body["label"], "sensorA");
    for node in body["nodes"].as_array().unwrap() {
        assert_eq!(node["z"], "17a3.4f2");
    }
}

#[tokio::test]
async fn first_matching_tab_wins() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([
            { "id": "first.1", "type": "tab", "label": "sensorA" },
            { "id": "second.1", "type": "tab", "label": "sensorA" }
        ]),
        ..MockEngine::default()
    })
    .await;

    client(url).try_deploy(generated_flow()).await.unwrap();
    assert_eq!(requests(&state).pop().unwrap().path, "/flow/first.1");
}

#[tokio::test]
async fn labels_on_non_tab_nodes_do_not_match() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([
            { "id": "sub.1", "type": "subflow", "label": "sensorA" }
        ]),
        ..MockEngine::default()
    })
    .await;

    let action = client(url).try_deploy(generated_flow()).await.unwrap();
    assert_eq!(action, DeployAction::Created);
    assert_eq!(requests(&state).pop().unwrap().method, "POST");
}

#[tokio::test]
async fn versioned_listing_envelope_is_accepted() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!({
            "rev": "a1b2c3",
            "flows": [{ "id": "17a3.4f2", "type": "tab", "label": "sensorA" }]
        }),
        ..MockEngine::default()
    })
    .await;

    let action = client(url).try_deploy(generated_flow()).await.unwrap();
    assert_eq!(action, DeployAction::Updated);
    assert_eq!(requests(&state).pop().unwrap().path, "/flow/17a3.4f2");
}

#[tokio::test]
async fn flow_without_tab_is_malformed_and_sends_nothing() {
    let (url, state) = spawn_engine(MockEngine::default()).await;
    let mut flow = generated_flow();
    flow.take_tab();

    let client = client(url);
    let err = client.try_deploy(flow.clone()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::MalformedFlow));
    assert!(!client.deploy(flow).await);
    assert!(requests(&state).is_empty());
}

#[tokio::test]
async fn listing_status_is_classified() {
    let (url, state) = spawn_engine(MockEngine {
        list_status: StatusCode::UNAUTHORIZED,
        ..MockEngine::default()
    })
    .await;
    let client = client(url);
    let err = client.try_deploy(generated_flow()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Unauthorized));
    assert_eq!(requests(&state).len(), 1);

    state.lock().unwrap().list_status = StatusCode::BAD_REQUEST;
    let err = client.try_deploy(generated_flow()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::InvalidApiVersion));

    state.lock().unwrap().list_status = StatusCode::INTERNAL_SERVER_ERROR;
    let err = client.try_delete("sensorA").await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR)
    ));
}

#[tokio::test]
async fn rejected_submission_carries_the_engine_body() {
    let (url, _state) = spawn_engine(MockEngine {
        write_status: StatusCode::BAD_REQUEST,
        write_body: "{\"code\":\"invalid_flow\"}".to_string(),
        ..MockEngine::default()
    })
    .await;

    let client = client(url);
    let err = client.try_deploy(generated_flow()).await.unwrap_err();
    match err {
        ReconcileError::BadRequest { body } => assert!(body.contains("invalid_flow")),
        other => panic!("expected bad request, got {other:?}"),
    }
    assert!(!client.deploy(generated_flow()).await);
}

#[tokio::test]
async fn submission_status_is_classified() {
    let (url, state) = spawn_engine(MockEngine {
        write_status: StatusCode::UNAUTHORIZED,
        ..MockEngine::default()
    })
    .await;
    let client = client(url);
    assert!(matches!(
        client.try_deploy(generated_flow()).await.unwrap_err(),
        ReconcileError::Unauthorized
    ));

    state.lock().unwrap().write_status = StatusCode::CONFLICT;
    assert!(matches!(
        client.try_deploy(generated_flow()).await.unwrap_err(),
        ReconcileError::UnexpectedStatus(StatusCode::CONFLICT)
    ));

    state.lock().unwrap().write_status = StatusCode::OK;
    assert!(client.deploy(generated_flow()).await);
}

#[tokio::test]
async fn delete_without_deployed_flow_is_a_no_op() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([{ "id": "0000aaaa.000001", "type": "tab", "label": "other" }]),
        ..MockEngine::default()
    })
    .await;

    let client = client(url);
    assert_eq!(
        client.try_delete("sensorA").await.unwrap(),
        DeleteOutcome::NotDeployed
    );
    assert!(client.delete("sensorA").await);
    assert!(requests(&state).iter().all(|request| request.method == "GET"));
}

#[tokio::test]
async fn delete_removes_the_matching_flow() {
    let (url, state) = spawn_engine(MockEngine {
        listing: json!([{ "id": "17a3.4f2", "type": "tab", "label": "sensorA" }]),
        ..MockEngine::default()
    })
    .await;

    let outcome = client(url).try_delete("sensorA").await.unwrap();
    assert_eq!(
        outcome,
        DeleteOutcome::Deleted {
            id: "17a3.4f2".to_string()
        }
    );
    let delete = requests(&state).pop().unwrap();
    assert_eq!(delete.method, "DELETE");
    assert_eq!(delete.path, "/flow/17a3.4f2");
}

#[tokio::test]
async fn delete_of_vanished_flow_fails() {
    let (url, _state) = spawn_engine(MockEngine {
        listing: json!([{ "id": "17a3.4f2", "type": "tab", "label": "sensorA" }]),
        write_status: StatusCode::NOT_FOUND,
        ..MockEngine::default()
    })
    .await;

    let client = client(url);
    let err = client.try_delete("sensorA").await.unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound(id) if id == "17a3.4f2"));
    assert!(!client.delete("sensorA").await);
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let (url, state) = spawn_engine(MockEngine::default()).await;
    let client = FlowEngineClient::new(EngineSettings {
        token: Some("s3cret".to_string()),
        ..settings(url)
    })
    .unwrap();

    client.try_deploy(generated_flow()).await.unwrap();
    for request in requests(&state) {
        assert_eq!(request.authorization.as_deref(), Some("Bearer s3cret"));
    }
}

#[tokio::test]
async fn base_path_is_preserved() {
    let (url, _state) = spawn_engine(MockEngine::default()).await;
    let mut prefixed = url.clone();
    prefixed.set_path("/red");
    let client = client(prefixed);
    assert_eq!(client.base_url().path(), "/red/");
    assert_eq!(client.endpoint(&["flow", "17a3.4f2"]).path(), "/red/flow/17a3.4f2");
}

#[tokio::test]
async fn slow_engine_times_out() {
    let (url, _state) = spawn_engine(MockEngine {
        list_delay: Duration::from_millis(500),
        ..MockEngine::default()
    })
    .await;
    let client = FlowEngineClient::new(EngineSettings {
        request_timeout: Duration::from_millis(50),
        ..settings(url)
    })
    .unwrap();

    let err = client.try_deploy(generated_flow()).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Timeout { .. }), "{err:?}");
    assert!(!client.deploy(generated_flow()).await);
}

#[tokio::test]
async fn unreachable_engine_fails_after_retries() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = FlowEngineClient::new(EngineSettings {
        connect_retries: 2,
        ..settings(Url::parse(&format!("http://{addr}")).unwrap())
    })
    .unwrap();

    let err = client.try_delete("sensorA").await.unwrap_err();
    match err {
        ReconcileError::Transport(source) => assert!(source.is_connect()),
        other => panic!("expected transport error, got {other:?}"),
    }
}
