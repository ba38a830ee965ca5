/// HTTP status surface. Handlers only read the latest published snapshot;
/// the runner owns all watchdog state.
use crate::config::ServeConfig;
use crate::status::StatusSnapshot;
use tokio::sync::watch;

#[cfg(feature = "serve")]
#[derive(Clone)]
struct AppState {
    snapshots: watch::Receiver<StatusSnapshot>,
}

#[cfg(feature = "serve")]
pub fn router(snapshots: watch::Receiver<StatusSnapshot>) -> axum::Router {
    use axum::{routing::get, Router};
    use tower_http::cors::CorsLayer;

    Router::new()
        .route("/api/health", get(health))
        .route("/status", get(status))
        .route("/api/notifications", get(notifications))
        .route("/api/plugin", get(plugin))
        .with_state(AppState { snapshots })
        .layer(CorsLayer::permissive())
}

#[cfg(feature = "serve")]
pub async fn run(
    config: &ServeConfig,
    snapshots: watch::Receiver<StatusSnapshot>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("status server listening on {local_addr}");

    axum::serve(listener, router(snapshots)).await?;
    Ok(())
}

#[cfg(not(feature = "serve"))]
pub async fn run(
    _config: &ServeConfig,
    _snapshots: watch::Receiver<StatusSnapshot>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::debug!("built without the serve feature, status server disabled");
    Ok(())
}

#[cfg(feature = "serve")]
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}

#[cfg(feature = "serve")]
async fn status(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<std::collections::BTreeMap<String, crate::status::WatchdogStatus>> {
    let snapshot = state.snapshots.borrow();
    axum::Json(snapshot.watchdogs.clone())
}

#[cfg(feature = "serve")]
async fn notifications(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<std::collections::BTreeMap<String, crate::notify::Notification>> {
    let snapshot = state.snapshots.borrow();
    axum::Json(snapshot.notifications.clone())
}

#[cfg(feature = "serve")]
async fn plugin(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let snapshot = state.snapshots.borrow();
    axum::Json(serde_json::json!({
        "status": snapshot.plugin_status,
        "heartbeat": snapshot.heartbeat,
    }))
}
