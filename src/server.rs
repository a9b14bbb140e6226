//! HTTP API for server mode
//!
//! Two routes, both delegating to the query service:
//! - `GET /mymetservicetides/api/v1.0/tides/{DDMMYY}` - tides for a date
//! - `GET /mymetservicetides/api/v1.0/tides` - today's tides
//!
//! Each answers with the day's nine raw fields as a JSON array. When an API
//! token is configured, requests without the matching bearer token get 403.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{debug, info};

use crate::data::{QueryError, TideQueryService, FIELD_COUNT};

/// Common prefix of all API routes
pub const API_PREFIX: &str = "/mymetservicetides/api/v1.0";

/// Shared state of the API handlers
#[derive(Debug, Clone)]
pub struct ApiState {
    pub service: Arc<TideQueryService>,
    pub api_token: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(service: Arc<TideQueryService>, api_token: Option<String>) -> Self {
        Self {
            service,
            api_token: api_token.map(Arc::from),
        }
    }
}

/// Query failures mapped to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Query(QueryError),
    Unauthorized,
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        ApiError::Query(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::Query(QueryError::InvalidDate(_)) => StatusCode::BAD_REQUEST,
            ApiError::Query(QueryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Query(QueryError::Refresh(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // 403 rather than 401 keeps browsers from showing a login dialog
            ApiError::Unauthorized => "Unauthorized access".to_string(),
            ApiError::Query(err) => err.to_string(),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Builds the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(&format!("{API_PREFIX}/tides"), get(today_tides))
        .route(&format!("{API_PREFIX}/tides/:date"), get(tides_for_date))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

/// Serves the API on `addr` until Ctrl-C
pub async fn serve(state: ApiState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down API server");
}

async fn require_token(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    if let Some(token) = &state.api_token {
        let expected = format!("Bearer {}", token);
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            debug!(uri = %request.uri(), "Rejected request without valid token");
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

async fn tides_for_date(
    State(state): State<ApiState>,
    Path(date): Path<String>,
) -> Result<Json<[String; FIELD_COUNT]>, ApiError> {
    let record = state.service.lookup(&date).await?;
    debug!(date = %date, fields = ?record.fields(), "Tides request");
    Ok(Json(record.fields().clone()))
}

async fn today_tides(State(state): State<ApiState>) -> Result<Json<[String; FIELD_COUNT]>, ApiError> {
    let today = state.service.today_key();
    let record = state.service.lookup(&today).await?;
    debug!(date = %today, fields = ?record.fields(), "Today's tides request");
    Ok(Json(record.fields().clone()))
}
