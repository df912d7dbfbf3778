//! HTTP surface for the planning gateway
//!
//! ```text
//!   client ──► POST /plan ─────────────► GatewayService::handle
//!          ──► POST /api/v1/feedback ──► FeedbackSink (background)
//!          ──► GET  /health
//!          ──► GET  /api/status ───────► tiers, cache and dispatch stats
//!          ──► GET  /api/tiers ────────► live tier health probes
//! ```
//!
//! Request bodies are handed to the gateway as raw bytes so the size limit
//! and JSON errors are reported the same way regardless of the transport.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gateway_core::{
    ErrorKind, FeedbackSink, FeedbackSubmission, GatewayError, GatewayService, PlanOutcome,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Fingerprint of the served plan
pub const FINGERPRINT_HEADER: &str = "x-plan-fingerprint";

/// Where the served plan came from: `cache`, `computed` or `joined`
pub const SOURCE_HEADER: &str = "x-plan-source";

const SERVICE_NAME: &str = "fiber-planning-gateway";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayService>,
    pub feedback: Arc<dyn FeedbackSink>,
}

impl AppState {
    pub fn new(gateway: Arc<GatewayService>, feedback: Arc<dyn FeedbackSink>) -> Self {
        Self { gateway, feedback }
    }
}

/// Build the router with all routes and layers
pub fn router(state: AppState) -> Router {
    // One byte of headroom so oversize bodies reach the gateway and are
    // reported as InvalidRequest rather than a bare 413
    let body_limit = state.gateway.max_request_bytes().saturating_add(1);

    Router::new()
        .route("/plan", post(plan))
        .route("/api/v1/plan", post(plan))
        .route("/api/v1/feedback", post(feedback))
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/tiers", get(tiers))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn plan(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|e| GatewayError::InvalidRequest(e.body_text()))?;
    let PlanOutcome {
        result,
        fingerprint,
        source,
        decision,
    } = state.gateway.handle(&body).await?;

    if let Some(decision) = decision.as_ref().filter(|d| d.fallback_count() > 0) {
        tracing::info!(
            fingerprint = %fingerprint.short(),
            chain = ?decision.chain(),
            "Plan served after fallback"
        );
    }

    let mut response = Json(result.into_json()).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(fingerprint.as_str()) {
        headers.insert(HeaderName::from_static(FINGERPRINT_HEADER), value);
    }
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source.as_str()),
    );
    Ok(response)
}

async fn feedback(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(e) => return bad_request(e.body_text()),
    };
    let submission: FeedbackSubmission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) => return bad_request(format!("malformed feedback: {e}")),
    };
    let record = match submission.into_record(Utc::now()) {
        Ok(record) => record,
        Err(e) => return bad_request(e.to_string()),
    };

    let sink = Arc::clone(&state.feedback);
    tokio::spawn(async move {
        if let Err(e) = sink.record(&record).await {
            tracing::error!(
                fingerprint = %record.fingerprint.short(),
                error = %e,
                "Failed to persist feedback"
            );
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let gateway = &state.gateway;
    Json(json!({
        "status": "operational",
        "timestamp": Utc::now().to_rfc3339(),
        "tiers": gateway.tier_summaries(),
        "cache": gateway.cache().stats(),
        "dispatch": gateway.dispatcher().metrics().snapshot(),
    }))
}

async fn tiers(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "tiers": state.gateway.probe_tiers().await }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": ErrorKind::InvalidRequest.as_str(),
            "message": message,
        })),
    )
        .into_response()
}

// ============================================================================
// Errors
// ============================================================================

/// Gateway error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::AllTiersExhausted | ErrorKind::Overloaded => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = %self.0.kind(), error = %self.0, "Plan request failed");
        } else {
            tracing::debug!(kind = %self.0.kind(), error = %self.0, "Plan request rejected");
        }

        let body = Json(json!({
            "error": self.0.kind().as_str(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
