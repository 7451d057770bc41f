//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/resources` | List resources, optionally `?kind=pipe\|view\|rule` |
//! | `POST` | `/api/resources` | Create a resource |
//! | `GET`  | `/api/resources/{id}` | Get a resource by `name@version` |
//! | `DELETE` | `/api/resources/{id}` | Delete a resource |
//! | `GET`  | `/api/pipes` | List stored pipes |
//! | `GET`  | `/api/pipes/{name@digest}` | Get one pipe |
//! | `POST` | `/api/pipes/{name@digest}:disable` | Stop triggering a pipe |
//! | `POST` | `/api/pipes/{name@digest}:enable` | Resume triggering a pipe |
//! | `POST` | `/api/rules` | Attach pipes to a URL predicate |
//! | `DELETE` | `/api/rules` | Detach pipes from a URL predicate |
//! | `POST` | `/api/views` | Create a view and its collection |
//! | `GET`  | `/api/views/{uuid}/rows` | Rows of a view |
//! | `POST` | `/api/trigger/implicit` | Plan the pipes matching a URL |
//! | `POST` | `/api/trigger/exchange` | Report results for a plan |
//!
//! # Error Contract
//!
//! ```json
//! { "status": "not found", "reason": "pipe not found: foo@…" }
//! ```
//!
//! The HTTP status follows the error kind (`not found` → 404,
//! `failed precondition` → 412, `deadline exceeded` → 504, …). Every
//! request is bounded by `server.request_timeout_secs`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use nuggit_core::resource::{Kind, Resource};
use nuggit_core::rule::Rule;
use nuggit_core::trigger::{self, TriggerRequest, TriggerResponse};
use nuggit_core::view::View;
use nuggit_core::{Error, NameDigest};

use crate::config::Config;
use crate::resources::{self, StoredResource};
use crate::results::{self, ExchangeRequest, ExchangeResponse};
use crate::rules;
use crate::sqlite_store::{PipeEntry, SqliteStore};
use crate::views::{self, StoredView};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<SqliteStore>,
    timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<SqliteStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

/// Starts the HTTP server on `[server]` host and port and serves until the
/// process is terminated.
pub async fn run_server(config: &Config, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind();
    let state = AppState::new(
        store,
        Duration::from_secs(config.server.request_timeout_secs),
    );
    let app = router(state);

    info!(addr = %bind_addr, "server listening");
    println!("Nuggit server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/resources",
            get(handle_list_resources).post(handle_create_resource),
        )
        .route(
            "/api/resources/{id}",
            get(handle_get_resource).delete(handle_delete_resource),
        )
        .route("/api/pipes", get(handle_list_pipes))
        .route(
            "/api/pipes/{id}",
            get(handle_get_pipe).post(handle_pipe_status),
        )
        .route(
            "/api/rules",
            post(handle_create_rule).delete(handle_delete_rule),
        )
        .route("/api/views", post(handle_create_view))
        .route("/api/views/{uuid}/rows", get(handle_view_rows))
        .route("/api/trigger/implicit", post(handle_trigger_implicit))
        .route("/api/trigger/exchange", post(handle_trigger_exchange))
        .layer(middleware::from_fn_with_state(state.clone(), deadline))
        .layer(cors)
        .with_state(state)
}

async fn deadline(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(state.timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => AppError(Error::DeadlineExceeded(format!(
            "request did not complete within {}s",
            state.timeout.as_secs()
        )))
        .into_response(),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    reason: String,
}

/// Converts core errors into `{status, reason}` responses.
struct AppError(Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        Self(Error::invalid(e.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(status = %code, error = %self.0, "request failed");
        }
        let body = ErrorBody {
            status: code.as_str(),
            reason: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn parse_id(id: &str) -> Result<NameDigest, AppError> {
    Ok(NameDigest::parse(id)?)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /api/resources ============

#[derive(Deserialize)]
struct ListResourcesQuery {
    kind: Option<String>,
}

#[derive(Serialize)]
struct ResourceList {
    resources: Vec<StoredResource>,
}

#[derive(Serialize, Deserialize)]
pub struct CreatedResource {
    pub id: NameDigest,
}

async fn handle_list_resources(
    State(state): State<AppState>,
    Query(query): Query<ListResourcesQuery>,
) -> ApiResult<ResourceList> {
    let kind = query.kind.as_deref().map(str::parse::<Kind>).transpose()?;
    let resources = resources::list_resources(&state.store, kind).await?;
    Ok(Json(ResourceList { resources }))
}

async fn handle_create_resource(
    State(state): State<AppState>,
    payload: Result<Json<Resource>, JsonRejection>,
) -> ApiResult<CreatedResource> {
    let Json(resource) = payload?;
    let id = resources::create_resource(&state.store, resource).await?;
    Ok(Json(CreatedResource { id }))
}

async fn handle_get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StoredResource> {
    let nd = parse_id(&id)?;
    Ok(Json(resources::get_resource(&state.store, &nd).await?))
}

async fn handle_delete_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let nd = parse_id(&id)?;
    resources::delete_resource(&state.store, &nd).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ /api/pipes ============

#[derive(Serialize)]
struct PipeList {
    pipes: Vec<PipeEntry>,
}

async fn handle_list_pipes(State(state): State<AppState>) -> ApiResult<PipeList> {
    Ok(Json(PipeList {
        pipes: state.store.list_pipes().await?,
    }))
}

async fn handle_get_pipe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PipeEntry> {
    let nd = parse_id(&id)?;
    Ok(Json(state.store.get_pipe(&nd).await?))
}

#[derive(Serialize)]
struct PipeStatus {
    name: NameDigest,
    disabled: bool,
}

/// `POST /api/pipes/{name@digest}:disable` and `:enable`.
async fn handle_pipe_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PipeStatus> {
    let (id, disabled) = match id.rsplit_once(':') {
        Some((id, "disable")) => (id, true),
        Some((id, "enable")) => (id, false),
        _ => {
            return Err(Error::invalid(format!(
                "expected {{name@digest}}:disable or {{name@digest}}:enable, got {:?}",
                id
            ))
            .into())
        }
    };
    let nd = parse_id(id)?;
    let name = state.store.set_disabled(&nd, disabled).await?;
    Ok(Json(PipeStatus { name, disabled }))
}

// ============ /api/rules ============

async fn handle_create_rule(
    State(state): State<AppState>,
    payload: Result<Json<Rule>, JsonRejection>,
) -> ApiResult<Rule> {
    let Json(rule) = payload?;
    Ok(Json(rules::create_rule(&state.store, rule).await?))
}

async fn handle_delete_rule(
    State(state): State<AppState>,
    payload: Result<Json<Rule>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(rule) = payload?;
    rules::delete_rule(&state.store, rule).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ /api/views ============

async fn handle_create_view(
    State(state): State<AppState>,
    payload: Result<Json<View>, JsonRejection>,
) -> ApiResult<StoredView> {
    let Json(view) = payload?;
    Ok(Json(views::create_view(&state.store, view).await?))
}

#[derive(Serialize)]
struct ViewRows {
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

async fn handle_view_rows(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> ApiResult<ViewRows> {
    let uuid = Uuid::parse_str(&uuid)
        .map_err(|e| Error::invalid(format!("invalid view uuid {:?}: {}", uuid, e)))?;
    Ok(Json(ViewRows {
        rows: views::view_rows(&state.store, &uuid).await?,
    }))
}

// ============ /api/trigger ============

async fn handle_trigger_implicit(
    State(state): State<AppState>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> ApiResult<TriggerResponse> {
    let Json(req) = payload?;
    Ok(Json(trigger::implicit(state.store.as_ref(), &req).await?))
}

async fn handle_trigger_exchange(
    State(state): State<AppState>,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> ApiResult<ExchangeResponse> {
    let Json(req) = payload?;
    Ok(Json(results::exchange(&state.store, &req).await?))
}
