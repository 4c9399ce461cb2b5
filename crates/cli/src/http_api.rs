use crate::exposure::AiToken;
use crate::stats;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Request, State},
    http::{Response as HttpResponse, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use nebula_assistant::provider::render_error;
use nebula_assistant::{Assistant, AssistantError, RuntimeConfig};
use nebula_protocol::{
    ChatRequest, ChatResponse, ErrorEnvelope, ExplainRequest, ExplainResponse, HealthResponse,
    NlqRequest, ReportRequest, ReportResponse, StatusAck, TopologyResult, TopologySource,
};
use nebula_topology::{default_nodes, MeshSource, PortScanner, StatusAggregator};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// Upper bound for a topology request; above the remote (5 s) plus mesh client (5 s) budgets.
pub const TOPOLOGY_HANDLER_TIMEOUT: Duration = Duration::from_secs(12);
/// Upper bound for an AI request; above the 30 s provider timeout.
pub const AI_HANDLER_TIMEOUT: Duration = Duration::from_secs(35);

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppState {
    pub topology: StatusAggregator,
    pub mesh: Arc<dyn MeshSource>,
    pub scanner: PortScanner,
    pub assistant: Assistant,
    pub ai_token: Option<AiToken>,
}

/// Read-only mesh views are open; `/api/ai/*` sits behind the AI token when one is set.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ai = Router::new()
        .route("/ai/config", get(http_get_config).post(http_set_config))
        .route("/ai/chat", post(http_chat))
        .route("/ai/nlq", post(http_nlq))
        .route("/ai/explain", post(http_explain))
        .route("/ai/report", post(http_report))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_ai_token,
        ));

    let api = Router::new()
        .route("/health", get(http_health))
        .route("/topology", get(http_topology))
        .route("/status", get(http_topology))
        .route("/peers", get(http_peers))
        .route("/scan/:address", get(http_scan))
        .route("/stats", get(http_stats))
        .merge(ai)
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
}

async fn require_ai_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(token) = &state.ai_token {
        if !token.admits(request.headers()) {
            let envelope = error_envelope(
                "unauthorized",
                "Missing or invalid Authorization header".to_string(),
            );
            return build_response(StatusCode::UNAUTHORIZED, &envelope);
        }
    }
    Ok(next.run(request).await)
}

pub(crate) fn error_envelope(code: &str, message: String) -> ErrorEnvelope {
    let hint = match code {
        "unauthorized" => Some(
            "The AI routes need Authorization: Bearer <token> matching --auth-token or NEBULA_AUTH_TOKEN."
                .to_string(),
        ),
        "invalid_request" => Some(
            "Verify the request body is valid JSON with the documented fields.".to_string(),
        ),
        _ => None,
    };

    ErrorEnvelope {
        code: code.to_string(),
        message,
        details: None,
        hint,
    }
}

pub(crate) fn build_response<T: Serialize>(
    status: StatusCode,
    payload: &T,
) -> Result<Response, StatusCode> {
    let bytes = serde_json::to_vec(payload).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut builder = HttpResponse::builder()
        .status(status)
        .header("content-type", "application/json");

    if status == StatusCode::UNAUTHORIZED {
        builder = builder.header("www-authenticate", "Bearer");
    }

    builder
        .body(Body::from(bytes))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn ok_json<T: Serialize>(payload: &T) -> Result<Response, StatusCode> {
    build_response(StatusCode::OK, payload)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Result<Response, StatusCode>> {
    serde_json::from_slice(body).map_err(|err| {
        let envelope = error_envelope("invalid_request", format!("Invalid JSON request: {err}"));
        build_response(StatusCode::BAD_REQUEST, &envelope)
    })
}

/// Runs an AI call under [`AI_HANDLER_TIMEOUT`]; an elapsed call still answers with text.
async fn bounded_answer(call: impl Future<Output = String>) -> String {
    match tokio::time::timeout(AI_HANDLER_TIMEOUT, call).await {
        Ok(text) => text,
        Err(_) => {
            log::warn!("AI request exceeded {AI_HANDLER_TIMEOUT:?}");
            render_error(
                "Assistant",
                &AssistantError::Timeout(AI_HANDLER_TIMEOUT.as_secs()),
            )
        }
    }
}

pub(crate) async fn topology_or_default(aggregator: &StatusAggregator) -> TopologyResult {
    match tokio::time::timeout(TOPOLOGY_HANDLER_TIMEOUT, aggregator.get_topology()).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("topology aggregation exceeded {TOPOLOGY_HANDLER_TIMEOUT:?}");
            TopologyResult {
                nodes: default_nodes(),
                source: TopologySource::Fallback,
                error: Some(format!(
                    "topology aggregation timed out after {} s",
                    TOPOLOGY_HANDLER_TIMEOUT.as_secs()
                )),
            }
        }
    }
}

async fn http_health() -> Result<Response, StatusCode> {
    ok_json(&HealthResponse { ok: true })
}

async fn http_topology(State(state): State<Arc<AppState>>) -> Result<Response, StatusCode> {
    let result = topology_or_default(&state.topology).await;
    if let Some(err) = &result.error {
        log::info!("topology served from fallback: {err}");
    }
    ok_json(&result)
}

async fn http_peers(State(state): State<Arc<AppState>>) -> Result<Response, StatusCode> {
    let snapshot = state.mesh.fetch_snapshot().await;
    ok_json(&snapshot.peer_records())
}

async fn http_scan(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Response, StatusCode> {
    ok_json(&state.scanner.scan(&address).await)
}

async fn http_stats() -> Result<Response, StatusCode> {
    match stats::collect().await {
        Ok(stats) => ok_json(&stats),
        Err(err) => {
            log::warn!("host stats unavailable: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn http_get_config(State(state): State<Arc<AppState>>) -> Result<Response, StatusCode> {
    ok_json(&state.assistant.config().masked())
}

async fn http_set_config(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let config: RuntimeConfig = match parse_body(&body) {
        Ok(config) => config,
        Err(response) => return response,
    };
    log::info!(
        "AI config replaced: provider={:?} model={} allow_sensitive={}",
        config.provider,
        config.model,
        config.allow_sensitive
    );
    state.assistant.config().replace(config);
    ok_json(&StatusAck::ok())
}

async fn http_chat(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let request: ChatRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let response = bounded_answer(state.assistant.chat(&request.message)).await;
    ok_json(&ChatResponse { response })
}

async fn http_nlq(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let request: NlqRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let filter = match tokio::time::timeout(AI_HANDLER_TIMEOUT, state.assistant.nlq(&request.query))
        .await
    {
        Ok(outcome) => outcome.into_filter(),
        Err(_) => {
            log::warn!("nlq request exceeded {AI_HANDLER_TIMEOUT:?}");
            serde_json::Map::new()
        }
    };
    ok_json(&filter)
}

async fn http_explain(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let request: ExplainRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let node_data = request.into_node_data();
    let explanation = bounded_answer(state.assistant.explain(&node_data)).await;
    ok_json(&ExplainResponse { explanation })
}

async fn http_report(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, StatusCode> {
    let request: ReportRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let peers = request.into_peers();
    let narrative = bounded_answer(state.assistant.report(&peers)).await;
    ok_json(&ReportResponse { narrative })
}
