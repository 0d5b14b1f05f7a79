use std::path::PathBuf;
use std::sync::Arc;

use autohide_core::{Command, ConfigurationError, LayerBackend, MemoryScene};
use autohide_proto::config::Config;
use autohide_proto::protocol::{ApiError, DockStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};

use crate::status::StatusBoard;

#[derive(Clone)]
pub struct HttpState {
    pub commands: mpsc::Sender<Command>,
    pub status: Arc<StatusBoard>,
    pub config: Arc<RwLock<Config>>,
    pub config_path: PathBuf,
    pub scene: Arc<MemoryScene>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/activate", post(activate))
        .route("/api/deactivate", post(deactivate))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/layers/:name/:action", post(toggle_layer))
        .with_state(state)
}

pub fn start_server(bind_address: String, port: u16, state: HttpState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Control API listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            message: message.into(),
        }),
    )
        .into_response()
}

fn engine_gone() -> Response {
    error!("Orchestrator is not running");
    api_error(StatusCode::SERVICE_UNAVAILABLE, "engine not running")
}

async fn get_status(State(state): State<HttpState>) -> Json<DockStatus> {
    Json(state.status.current())
}

async fn activate(State(state): State<HttpState>) -> Response {
    info!("HTTP API: activate");
    let (reply, rx) = oneshot::channel();
    if state.commands.send(Command::Activate { reply }).await.is_err() {
        return engine_gone();
    }
    match rx.await {
        Ok(Ok(())) => StatusCode::OK.into_response(),
        Ok(Err(e @ ConfigurationError::NoLayersConfigured)) => {
            warn!("Activation refused: {}", e);
            api_error(
                StatusCode::CONFLICT,
                "configure the sources to hide first",
            )
        }
        Err(_) => engine_gone(),
    }
}

async fn deactivate(State(state): State<HttpState>) -> Response {
    info!("HTTP API: deactivate");
    let cmd = Command::Deactivate { restore: true };
    if state.commands.send(cmd).await.is_err() {
        return engine_gone();
    }
    StatusCode::OK.into_response()
}

async fn get_config(State(state): State<HttpState>) -> Json<Config> {
    Json(state.config.read().await.clone())
}

/// Persist the new document, then hand its engine settings to the orchestrator.
async fn put_config(State(state): State<HttpState>, Json(new_config): Json<Config>) -> Response {
    info!("HTTP API: update config");
    if let Err(e) = new_config.save_to(&state.config_path) {
        error!("Failed to save config: {}", e);
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let monitor = new_config.monitor_config();
    // Layers join the scene the engine is looking at.
    let context = state.scene.current_context().unwrap_or_else(|| {
        let context = scene_name(&new_config);
        state.scene.set_current(Some(&context));
        context
    });
    for layer in &monitor.monitored_layers {
        state.scene.add_layer(&context, layer, true);
    }
    state
        .status
        .set_monitored_layers(monitor.monitored_layers.clone());
    state
        .status
        .set_notifications(new_config.behavior.show_notifications);
    *state.config.write().await = new_config;

    if state
        .commands
        .send(Command::Reconfigure(monitor))
        .await
        .is_err()
    {
        return engine_gone();
    }
    StatusCode::OK.into_response()
}

/// Stand-in for the operator clicking a layer's eye icon in the host.
async fn toggle_layer(
    State(state): State<HttpState>,
    Path((name, action)): Path<(String, String)>,
) -> Response {
    let visible = match action.as_str() {
        "show" => true,
        "hide" => false,
        other => {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("unknown action {:?}, expected show or hide", other),
            )
        }
    };
    let Some(context) = state.scene.current_context() else {
        return api_error(StatusCode::NOT_FOUND, "no active scene");
    };
    if !state.scene.set_visible(&context, &name, visible) {
        return api_error(StatusCode::NOT_FOUND, format!("no layer named {:?}", name));
    }
    info!("HTTP API: layer {:?} visible={}", name, visible);
    StatusCode::OK.into_response()
}

/// Scene the stand-in host builds for a document.
pub fn scene_name(config: &Config) -> String {
    if config.scenes.monitored_scene.trim().is_empty() {
        "Scene".to_string()
    } else {
        config.scenes.monitored_scene.clone()
    }
}
