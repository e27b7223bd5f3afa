use axum::Json;
use serde_json::{json, Value};

/// GET /
/// Liveness probe kept for clients that poll the root path.
pub async fn root_handler() -> Json<Value> {
    Json(json!({"status": "service start..."}))
}

/// GET /health
/// Returns a simple status object with service version.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "intake-api"
    }))
}
