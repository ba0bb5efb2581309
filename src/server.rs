use crate::{
    config::Config,
    errors::{into_response, AppError},
    mcp::{dispatcher::Dispatcher, types::PROTOCOL_VERSION, wire},
    security::{self, RateLimiters},
};
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_stream::{wrappers::SplitStream, StreamExt};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info;

/// Serves one channel: each line is dispatched and answered before the next
/// line is read, so responses leave in request order.
pub async fn serve_lines<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W, ascii_only: bool) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // raw segments, so a line that is not UTF-8 still gets its parse error
    let mut lines = SplitStream::new(BufReader::new(reader).split(b'\n'));
    let mut served = 0u64;
    while let Some(segment) = lines.next().await {
        let segment = segment?;
        let Some(line) = wire::trim_line(&segment) else {
            continue;
        };
        let Some(response) = dispatcher.handle_bytes(line).await else {
            continue;
        };
        let bytes = wire::encode_line(&response, ascii_only)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        served += 1;
    }
    info!(served, "input closed");
    Ok(())
}

pub async fn serve_stdio(dispatcher: Arc<Dispatcher>, ascii_only: bool) -> anyhow::Result<()> {
    info!(server = %dispatcher.server_info().name, "serving JSON-RPC on stdio");
    serve_lines(&dispatcher, tokio::io::stdin(), tokio::io::stdout(), ascii_only).await
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub rls: RateLimiters,
}

pub async fn serve_http(cfg: Config, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let rls = RateLimiters::new(cfg.http.requests_per_second, cfg.http.per_token_per_second);
    let shared = AppState { cfg: Arc::new(cfg), dispatcher, rls };
    let app = build_router(shared.clone());

    let addr = format!("{}:{}", shared.cfg.http.bind_addr, shared.cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, base_path = %shared.cfg.http.base_path, "serving JSON-RPC over HTTP");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(shared: AppState) -> Router {
    let base = shared.cfg.http.base_path.trim_end_matches('/').to_string();
    let limit_bytes = shared.cfg.http.max_request_kb * 1024;
    let origins: Vec<HeaderValue> = shared
        .cfg
        .auth
        .iter()
        .flat_map(|a| a.allowed_origins.iter())
        .filter_map(|o| o.parse().ok())
        .collect();

    let router = Router::new()
        .route("/healthz", get(health))
        .route(&format!("{base}/capabilities"), get(capabilities))
        .route(&format!("{base}/rpc"), post(rpc).layer(RequestBodyLimitLayer::new(limit_bytes)))
        .layer(TraceLayer::new_for_http())
        .with_state(shared);

    if origins.is_empty() {
        router
    } else {
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE]),
        )
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status":"ok"})))
}

async fn capabilities(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(&state, &headers) {
        return into_response(e).into_response();
    }
    let tools = state.dispatcher.tools().definitions();
    let body = json!({
        "serverInfo": state.dispatcher.server_info(),
        "protocolVersion": PROTOCOL_VERSION,
        "tools": tools,
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn rpc(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let origin = headers
        .get(http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let token = security::extract_bearer(&headers);

    let admitted = authorize(&state, &headers)
        .and_then(|()| security::content_length_ok(&headers, state.cfg.http.max_request_kb))
        .and_then(|()| state.rls.check(token.as_deref()));
    if let Err(e) = admitted {
        audit(&request_id, &origin, token.is_some(), "-", "deny", e.code(), started);
        return into_response(e).into_response();
    }

    let method = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("method").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| "-".to_string());

    match state.dispatcher.handle_line(&body).await {
        Some(response) => {
            let code = match &response.error {
                Some(err) => err.code.to_string(),
                None => "OK".to_string(),
            };
            audit(&request_id, &origin, token.is_some(), &method, "allow", &code, started);
            (StatusCode::OK, Json(response)).into_response()
        }
        None => {
            audit(&request_id, &origin, token.is_some(), &method, "allow", "Notification", started);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

fn audit(request_id: &str, origin: &str, token_present: bool, method: &str, decision: &str, code: &str, started: Instant) {
    tracing::info!(
        request_id = request_id,
        origin = origin,
        token_present = token_present,
        method = method,
        decision = decision,
        code = code,
        duration_ms = started.elapsed().as_millis() as u64,
        "audit"
    );
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(auth) = &state.cfg.auth else {
        return Ok(());
    };
    security::require_bearer(headers, &auth.bearer_token)?;
    security::check_origin(headers, &auth.allowed_origins)?;
    Ok(())
}
