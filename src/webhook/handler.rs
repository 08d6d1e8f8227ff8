// =============================================================================
// HTTP surface — webhook ingest endpoint and status API (Axum 0.7)
// =============================================================================
//
// POST {webhook.path}      — signature-verified alert intake
// GET  /api/v1/health      — liveness + uptime (public)
// GET  /api/v1/providers   — provider health snapshots
// GET  /api/v1/metrics     — ingest counters + cache stats
// GET  /api/v1/analysis/:symbol — run the pipeline on demand
//
// Error responses use the engine's wire shape:
//   { "error": "...", "code": "...", "retry_after"?: secs }
// =============================================================================

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::Ordering;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::contracts::{EngineError, Symbol};
use crate::pipeline::AnalysisRequest;
use crate::webhook::{alert, dedup, rate_limit::RateDecision, signature};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let (path, max_body) = {
        let config = state.config.read();
        (config.webhook.path.clone(), config.webhook.max_body_bytes)
    };

    Router::new()
        // ── Ingest ──────────────────────────────────────────────────
        .route(&path, post(ingest))
        // ── Status API ──────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/providers", get(providers))
        .route("/api/v1/metrics", get(metrics))
        .route("/api/v1/analysis/:symbol", get(analysis))
        // ── Middleware & State ──────────────────────────────────────
        // The axum limit sits well above our own so the size stage can
        // answer with the engine's error shape instead of a bare 413.
        .layer(DefaultBodyLimit::max(max_body.saturating_add(64 * 1024)))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({ "error": message, "code": code });
    (status, Json(body)).into_response()
}

fn rate_limited_response(retry_after_secs: u64) -> Response {
    let body = json!({
        "error": "rate limit exceeded",
        "code": "RATE_LIMIT_EXCEEDED",
        "retry_after": retry_after_secs,
    });
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

// =============================================================================
// Ingest (POST)
// =============================================================================

async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = std::time::Instant::now();
    state.webhook_stats.total_alerts.fetch_add(1, Ordering::Relaxed);

    let (secret, max_body) = {
        let config = state.config.read();
        (
            config.webhook.secret.clone(),
            config.webhook.max_body_bytes,
        )
    };

    // ── 1. Content type ─────────────────────────────────────────────
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        state.webhook_stats.invalid_alerts.fetch_add(1, Ordering::Relaxed);
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_CONTENT_TYPE",
            "content type must be application/json",
        );
    }

    // ── 2. Body size ────────────────────────────────────────────────
    if body.len() > max_body {
        state.webhook_stats.invalid_alerts.fetch_add(1, Ordering::Relaxed);
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "REQUEST_TOO_LARGE",
            "request body exceeds the configured limit",
        );
    }

    // ── 3. Signature ────────────────────────────────────────────────
    let sig_header = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !signature::verify(&secret, &body, sig_header) {
        state.webhook_stats.invalid_alerts.fetch_add(1, Ordering::Relaxed);
        warn!("webhook signature verification failed");
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_SIGNATURE",
            "signature verification failed",
        );
    }

    // ── 4. Rate limit per source ────────────────────────────────────
    let source = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    match state.rate_limiter.check(&source, Utc::now()) {
        RateDecision::Allowed => {}
        RateDecision::Limited { retry_after_secs } => {
            state
                .webhook_stats
                .rate_limited_alerts
                .fetch_add(1, Ordering::Relaxed);
            return rate_limited_response(retry_after_secs);
        }
    }

    // ── 5. Parse & normalize ────────────────────────────────────────
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            state.webhook_stats.invalid_alerts.fetch_add(1, Ordering::Relaxed);
            return error_response(
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                &format!("body is not valid JSON: {e}"),
            );
        }
    };
    let parsed = match alert::parse_alert(&payload) {
        Ok(a) => a,
        Err(e) => {
            state.webhook_stats.invalid_alerts.fetch_add(1, Ordering::Relaxed);
            return error_response(StatusCode::BAD_REQUEST, "INVALID_FORMAT", &e.to_string());
        }
    };

    // ── 6. Dedup ────────────────────────────────────────────────────
    let alert_id = parsed
        .alert_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let key = dedup::dedup_key(
        &parsed.symbol.canonical,
        &parsed.alert_type,
        &parsed.timeframe.to_string(),
        parsed.timestamp_ms,
    );
    if state.dedup.check_and_insert(&key, Utc::now()) {
        state
            .webhook_stats
            .duplicate_alerts
            .fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "status": "duplicate",
            "alert_id": alert_id,
            "processing_time_ms": started.elapsed().as_millis() as u64,
        });
        return (StatusCode::OK, Json(body)).into_response();
    }

    // ── 7. Dispatch to the orchestrator ─────────────────────────────
    let mut request = AnalysisRequest::new(parsed.symbol.clone(), parsed.timeframe);
    request.timestamp = Utc.timestamp_millis_opt(parsed.timestamp_ms).single();

    match state.orchestrator.analyze(&request).await {
        Ok(report) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            state.webhook_stats.valid_alerts.fetch_add(1, Ordering::Relaxed);
            state.webhook_stats.record_processing_time(elapsed_ms);
            info!(
                alert_id = %alert_id,
                symbol = %parsed.symbol,
                alert_type = %parsed.alert_type,
                success = report.success,
                "alert processed"
            );
            let body = json!({
                "status": "ok",
                "alert_id": alert_id,
                "processing_time_ms": elapsed_ms,
                "message": format!(
                    "analysis {} with {} warning(s)",
                    if report.success { "completed" } else { "degraded" },
                    report.warnings.len()
                ),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            state
                .webhook_stats
                .processing_errors
                .fetch_add(1, Ordering::Relaxed);
            warn!(alert_id = %alert_id, error = %e, "alert dispatch failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ANALYSIS_ERROR",
                &e.to_string(),
            )
        }
    }
}

// =============================================================================
// Status API (GET)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "server_time": Utc::now().timestamp_millis(),
    }))
}

async fn providers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.composite.health_snapshots())
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

async fn analysis(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Response {
    let symbol = match Symbol::normalize(&symbol) {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, e.code(), &e.to_string());
        }
    };

    let timeframe = state.config.read().primary_timeframe;
    let request = AnalysisRequest::new(symbol, timeframe);

    match state.orchestrator.analyze(&request).await {
        Ok(report) => Json(report).into_response(),
        // A short primary window is the orchestrator's MISSING_DATA case.
        Err(e @ EngineError::InsufficientBars { .. }) => {
            error_response(StatusCode::NOT_FOUND, "MISSING_DATA", &e.to_string())
        }
        Err(e @ EngineError::ProviderTransport(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.code(), &e.to_string())
        }
        Err(e @ EngineError::Validation(_)) | Err(e @ EngineError::SymbolResolution { .. }) => {
            error_response(StatusCode::BAD_REQUEST, e.code(), &e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.code(), &e.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================
