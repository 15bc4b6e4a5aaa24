use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::models::hint::HintRequest;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let mut dependencies = serde_json::Map::new();

    let mongo_health = check_mongodb(&state).await;
    let mongo_healthy = mongo_health.get("status").and_then(|v| v.as_str()) == Some("healthy");
    dependencies.insert("mongodb".to_string(), json!(mongo_health));
    if !mongo_healthy {
        status = "degraded";
    }

    let status_code = if mongo_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "hint-engine-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

async fn check_mongodb(state: &AppState) -> serde_json::Map<String, serde_json::Value> {
    let mut result = serde_json::Map::new();

    match tokio::time::timeout(
        std::time::Duration::from_secs(1),
        state.mongo.run_command(mongodb::bson::doc! { "ping": 1 }),
    )
    .await
    {
        Ok(Ok(_)) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert(
                "message".to_string(),
                json!("MongoDB connection successful"),
            );
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("MongoDB error: {}", e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!("MongoDB timeout after 1s"));
        }
    }

    result
}

pub async fn request_hint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HintRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Hint request: student={}, quiz={}, question={}, slot={}, attempt_no={}",
        req.student_id,
        req.quiz_id,
        req.question_id,
        req.question_slot,
        req.attempt_no
    );

    match state.engine.handle_hint(&req).await {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(e) => {
            tracing::error!("Failed to produce hint: {:#}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TopStatsQuery {
    #[serde(default = "default_stats_limit")]
    pub limit: i64,
}

fn default_stats_limit() -> i64 {
    20
}

/// Lightweight admin endpoint for quick debugging of the learning loop.
pub async fn top_hint_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopStatsQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let limit = query.limit.clamp(1, 200);

    match state.store.top_stats(limit).await {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows
                .iter()
                .map(|row| {
                    let improve_rate =
                        row.improvements as f64 / (row.exposures.max(1)) as f64;
                    json!({
                        "language": row.language,
                        "cluster_key": row.cluster_key,
                        "hint_level": row.hint_level,
                        "hint_variant": row.hint_variant,
                        "exposures": row.exposures,
                        "improvements": row.improvements,
                        "total_delta": row.total_delta,
                        "improve_rate": (improve_rate * 1000.0).round() / 1000.0,
                    })
                })
                .collect();
            Ok((StatusCode::OK, Json(json!({ "items": items }))))
        }
        Err(e) => {
            tracing::error!("Failed to query hint stats: {:#}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Metrics authentication middleware - protects /metrics endpoint with HTTP Basic Auth
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !auth_header.starts_with("Basic ") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let encoded = &auth_header[6..];
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Format: username:password
    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
