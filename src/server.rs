//! Remote-control HTTP API: axum router and request handlers.
//!
//! The server runs on its own thread with a current-thread tokio runtime,
//! while the orchestrator loop stays on the main thread. Handlers never touch
//! the display directly: input goes through the same `mpsc` channel as the
//! joystick, and status is read from the snapshot the loop publishes.
//!
//! ## Rust concepts
//! - `async fn` and `.await` for non-blocking I/O
//! - axum extractors: `State`, `Path`, `Json`
//! - `Arc` for sharing state across async tasks
//! - `tower-http` middleware for CORS and request tracing

use crate::input::InputEvent;
use crate::metrics::MetricKind;
use crate::orchestrator::{MetricSnapshot, SharedStatus, StatusSnapshot};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use std::io;
use std::sync::PoisonError;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Channel into the orchestrator's input queue
    pub input_tx: Sender<InputEvent>,
    /// Last published status (orchestrator writes, handlers read)
    pub status: SharedStatus,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(get_status, get_metric, post_input),
    components(schemas(
        StatusSnapshot,
        MetricSnapshot,
        InputRequest,
        InputEvent,
        crate::display::DisplayState,
        crate::display::DisplayMode,
        crate::display::Rotation,
    )),
    tags(
        (name = "control", description = "Joystick-equivalent input"),
        (name = "system", description = "Status and telemetry"),
    ),
    info(
        title = "Sense Matrix API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Remote control and telemetry for a Sense HAT LED display"
    )
)]
pub struct ApiDoc;

// ── Request types ────────────────────────────────────────────────────

#[derive(Deserialize, utoipa::ToSchema)]
pub struct InputRequest {
    /// Action to perform, as if the joystick had been pressed.
    #[schema(example = "next_metric")]
    action: InputEvent,
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/metrics/{name}", get(get_metric))
        .route("/api/v1/input", post(post_input))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `0.0.0.0:port` from a dedicated thread.
pub fn spawn_server(port: u16, state: AppState) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new().name("http".into()).spawn(move || {
        runtime.block_on(async move {
            let addr = format!("0.0.0.0:{port}");
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!("Failed to bind {}: {}", addr, e);
                    return;
                }
            };

            tracing::info!("Listening on http://{}", addr);
            tracing::info!("API Documentation: http://localhost:{}/docs", port);

            if let Err(e) = axum::serve(listener, create_router(state)).await {
                tracing::error!("Server error: {}", e);
            }
        });
    })
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: display state, uploads and every metric
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current status", body = StatusSnapshot)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    let status = state
        .status
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    Json(status)
}

/// GET /api/v1/metrics/{name}: one metric's latest value and history
#[utoipa::path(
    get,
    path = "/api/v1/metrics/{name}",
    tag = "system",
    params(
        ("name" = String, Path, description = "Metric name, e.g. temperature")
    ),
    responses(
        (status = 200, description = "Metric telemetry", body = MetricSnapshot),
        (status = 404, description = "Metric not tracked")
    )
)]
async fn get_metric(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MetricSnapshot>, (StatusCode, String)> {
    let kind: MetricKind = name
        .parse()
        .map_err(|e: crate::error::StoreError| (StatusCode::NOT_FOUND, e.to_string()))?;

    let status = state.status.lock().unwrap_or_else(PoisonError::into_inner);
    status
        .metric(kind.name())
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Metric not tracked: {}", kind.name()),
            )
        })
}

/// POST /api/v1/input: queue one input action
#[utoipa::path(
    post,
    path = "/api/v1/input",
    tag = "control",
    request_body = InputRequest,
    responses(
        (status = 200, description = "Action queued"),
        (status = 500, description = "Main loop has stopped")
    )
)]
async fn post_input(
    State(state): State<AppState>,
    Json(req): Json<InputRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    tracing::debug!("Remote input: {:?}", req.action);
    state.input_tx.send(req.action).map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Main loop gone".to_string(),
        )
    })?;

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::{Arc, Mutex};

    fn state() -> (AppState, Receiver<InputEvent>) {
        let (tx, rx) = mpsc::channel();
        let mut snapshot = StatusSnapshot::new();
        snapshot.metrics.push(MetricSnapshot {
            name: "humidity".into(),
            label: "Humidity".into(),
            unit: "%".into(),
            min: 0.0,
            max: 100.0,
            latest: 42.0,
            history: vec![40.0, 42.0],
        });
        let state = AppState {
            input_tx: tx,
            status: Arc::new(Mutex::new(snapshot)),
        };
        (state, rx)
    }

    #[tokio::test]
    async fn status_returns_snapshot() {
        let (state, _rx) = state();
        let Json(status) = get_status(State(state)).await;
        assert_eq!(status.metrics.len(), 1);
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn metric_lookup_is_case_insensitive() {
        let (state, _rx) = state();
        let Json(metric) = get_metric(State(state), Path("Humidity".into()))
            .await
            .unwrap();
        assert_eq!(metric.latest, 42.0);
        assert_eq!(metric.history, vec![40.0, 42.0]);
    }

    #[tokio::test]
    async fn unknown_or_untracked_metric_is_404() {
        let (state, _rx) = state();
        let (code, _) = get_metric(State(state.clone()), Path("wind".into()))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);

        let (code, msg) = get_metric(State(state), Path("light".into()))
            .await
            .unwrap_err();
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(msg, "Metric not tracked: light");
    }

    #[tokio::test]
    async fn input_is_forwarded_to_channel() {
        let (state, rx) = state();
        let code = post_input(
            State(state),
            Json(InputRequest {
                action: InputEvent::RotateBack,
            }),
        )
        .await
        .unwrap();
        assert_eq!(code, StatusCode::OK);
        assert_eq!(rx.try_recv().unwrap(), InputEvent::RotateBack);
    }

    #[tokio::test]
    async fn input_after_loop_exit_is_500() {
        let (state, rx) = state();
        drop(rx);
        let (code, _) = post_input(
            State(state),
            Json(InputRequest {
                action: InputEvent::Quit,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn input_request_parses_action() {
        let req: InputRequest = serde_json::from_str(r#"{"action": "toggle_power"}"#).unwrap();
        assert_eq!(req.action, InputEvent::TogglePower);
    }

    #[test]
    fn openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert_eq!(
            paths,
            vec!["/api/v1/input", "/api/v1/metrics/{name}", "/api/v1/status"]
        );
    }
}
