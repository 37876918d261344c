use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use std::sync::Arc;

pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(serde::Serialize)]
pub struct HealthReport {
    status: &'static str,
    database: String,
    timestamp: String,
}

/// Reports database reachability without ever failing the request itself.
#[tracing::instrument(name = "Health report", skip(state))]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let database = match sqlx::query("SELECT id FROM badge_users LIMIT 1")
        .fetch_optional(&state.connection_pool)
        .await
    {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            tracing::warn!(error.cause_chain = ?e, "Database health probe failed");
            format!("unhealthy: {e}")
        }
    };
    Json(HealthReport {
        status: "healthy",
        database,
        timestamp: Utc::now().to_rfc3339(),
    })
}
