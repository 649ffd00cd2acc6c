//! HTTP transport implementation.
//!
//! JSON-RPC over POST, a health endpoint, and the admin surface. Callers
//! authenticate RPC requests with `Authorization: Bearer <token>`; admin
//! routes require the static admin credential in `x-admin-key`.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument};

use super::{TransportError, TransportResult, config::HttpConfig};
use crate::core::{Error, ErrorCode, Gateway};

/// Header carrying the admin credential.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Default number of incidents returned by `/admin/incidents`.
const DEFAULT_INCIDENT_LIMIT: usize = 50;

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
}

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the router for a gateway.
    pub fn router(&self, gateway: Arc<Gateway>) -> Router {
        let state = AppState { gateway };

        let admin = Router::new()
            .route("/stats", get(admin_stats))
            .route("/incidents", get(admin_incidents))
            .route("/tenants", get(admin_list_tenants).post(admin_create_tenant))
            .route("/identities", post(admin_create_identity))
            .route("/tokens", get(admin_list_tokens).post(admin_issue_token))
            .route("/tokens/{id}", delete(admin_revoke_token))
            .route("/maintenance", post(admin_run_maintenance));

        let mut app = Router::new()
            .route(&self.config.rpc_path, post(handle_rpc))
            .route("/health", get(health_check))
            .route("/", get(root_handler))
            .nest("/admin", admin)
            .with_state(state);

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            app = app.layer(cors);
        }
        app
    }

    /// Run the HTTP transport.
    pub async fn run(self, gateway: Arc<Gateway>) -> TransportResult<()> {
        let addr = self.address();
        let app = self.router(gateway);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!(
            "Ready - listening on {} (JSON-RPC over HTTP, CORS {})",
            addr, cors_status
        );
        info!("  → JSON-RPC: POST {}", self.config.rpc_path);
        info!("  → Health:   GET /health");
        info!("  → Admin:    /admin/*");

        axum::serve(listener, app)
            .await
            .map_err(|e| TransportError::http(e.to_string()))?;

        Ok(())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Gateway error rendered as an HTTP response.
struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::AdminRequired | ErrorCode::AuthRequired | ErrorCode::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ErrorCode::InvalidParams | ErrorCode::InvalidRequest | ErrorCode::ParseError => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
                "data": self.0.data(),
            }
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let presented = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    state.gateway.verify_admin(presented)?;
    Ok(())
}

// ============================================================================
// Public routes
// ============================================================================

/// Root handler - provides API info.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.gateway.config();
    Json(json!({
        "name": config.server.name,
        "version": config.server.version,
        "transport": "HTTP",
        "endpoints": {
            "health": "/health",
            "admin": "/admin"
        },
        "protocol": "JSON-RPC 2.0",
    }))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gateway.health())
}

/// Handle JSON-RPC requests.
///
/// Envelope errors are reported in the body with status 200, as JSON-RPC
/// clients expect.
#[instrument(skip_all)]
async fn handle_rpc(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let response = state
        .gateway
        .dispatcher()
        .handle_raw(&body, bearer_from(&headers))
        .await;
    (StatusCode::OK, Json(response)).into_response()
}

// ============================================================================
// Admin routes
// ============================================================================

#[derive(Debug, Deserialize)]
struct IncidentQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TenantBody {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityBody {
    tenant_id: String,
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    tenant_id: String,
    identity_id: String,
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenQuery {
    tenant_id: String,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(Error::invalid_params(e.to_string())))
}

async fn admin_stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    require_admin(&state, &headers)?;
    Ok(Json(state.gateway.admin_stats()))
}

async fn admin_run_maintenance(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    require_admin(&state, &headers)?;
    let report = state.gateway.run_maintenance().await;
    Ok(Json(json!(report)))
}

async fn admin_incidents(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IncidentQuery>,
) -> ApiResult {
    require_admin(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_INCIDENT_LIMIT);
    let security = state.gateway.security();
    Ok(Json(json!({
        "status": security.get_security_status(),
        "incidents": security.recent_incidents(limit),
    })))
}

async fn admin_list_tenants(State(state): State<AppState>, headers: HeaderMap) -> ApiResult {
    require_admin(&state, &headers)?;
    Ok(Json(json!({ "tenants": state.gateway.auth().tenants() })))
}

async fn admin_create_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    require_admin(&state, &headers)?;
    let body: TenantBody = parse_body(&body)?;
    let tenant = state.gateway.auth().create_tenant(&body.id, &body.name)?;
    Ok(Json(json!({ "tenant": tenant })))
}

async fn admin_create_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    require_admin(&state, &headers)?;
    let body: IdentityBody = parse_body(&body)?;
    let identity = state
        .gateway
        .auth()
        .create_identity(&body.tenant_id, &body.id, &body.name)?;
    Ok(Json(json!({ "identity": identity })))
}

async fn admin_issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    require_admin(&state, &headers)?;
    let body: TokenBody = parse_body(&body)?;
    let issued = state.gateway.auth().issue_token(
        &body.tenant_id,
        &body.identity_id,
        body.scopes,
        body.permissions,
        body.ttl_secs,
    )?;
    Ok(Json(json!({
        "token": issued.token,
        "bearer": issued.bearer,
    })))
}

async fn admin_list_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult {
    require_admin(&state, &headers)?;
    Ok(Json(json!({
        "tokens": state.gateway.auth().list_tokens(&query.tenant_id)
    })))
}

async fn admin_revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    require_admin(&state, &headers)?;
    state.gateway.auth().revoke_token(&id)?;
    Ok(Json(json!({ "revoked": id })))
}
