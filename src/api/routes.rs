//! API route definitions.

use crate::api::state::AppState;
use crate::sink;
use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/alerts/recent", get(recent_alerts))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let snap = state.metrics.snapshot();
    Json(json!({
        "data": snap,
        "meta": { "timestamp": chrono::Utc::now().to_rfc3339() }
    }))
}

#[derive(Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

async fn recent_alerts(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(50).min(500);
    let pool = state.pool.clone();
    let alerts = tokio::task::spawn_blocking(move || sink::recent_alerts(&pool, limit))
        .await
        .unwrap_or_else(|e| Err(anyhow::anyhow!(e)));

    match alerts {
        Ok(list) => {
            let total = list.len();
            Json(json!({
                "data": list,
                "meta": { "total": total }
            }))
        }
        Err(e) => Json(json!({
            "data": Value::Null,
            "meta": { "error": e.to_string() }
        })),
    }
}
