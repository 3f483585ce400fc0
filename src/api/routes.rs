//! HTTP routes.
//!
//! - `GET /` - upload page
//! - `POST /upload` - store a `.csv` upload under a generated identifier
//! - `POST /process` - start a background workflow run for an identifier
//! - `GET /log/:id` - current progress log, for polling
//! - `GET /runs/:id` - run state as JSON
//! - `POST /runs/:id/cancel` - cancel an active run
//! - `GET /health` - liveness

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::FormRejection, DefaultBodyLimit, Multipart,
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::config::Config;
use crate::progress::{self, NO_LOG_PLACEHOLDER};
use crate::uploads::{FileStore, UploadId};

use super::pages::render_page;
use super::run_manager::{RunManager, StartError};
use super::types::{CancelResponse, HealthResponse, MessageKind, PageView, ProcessForm};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub uploads: FileStore,
    pub runs: RunManager,
}

impl AppState {
    pub fn new(config: Config, uploads: FileStore, agent: Arc<Agent>) -> Self {
        let runs = RunManager::new(agent, uploads.clone(), config.run_timeout);
        Self {
            config,
            uploads,
            runs,
        }
    }
}

/// Start the HTTP server and block until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let uploads = FileStore::open(&config.upload_dir).await?;
    let agent = Arc::new(Agent::from_config(&config)?);
    tracing::info!("Workflow planner: {}", agent.describe());

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, uploads, agent));
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down...");
    state.runs.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(home))
        .route("/upload", post(upload_file))
        .route("/process", post(process_file))
        .route("/log/:id", get(get_log))
        .route("/runs/:id", get(get_run))
        .route("/runs/:id/cancel", post(cancel_run))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn page(view: PageView) -> Html<String> {
    Html(render_page(&view))
}

async fn home() -> Html<String> {
    page(PageView::default())
}

/// POST /upload - Persist a CSV upload and show its identifier.
async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Html<String> {
    let mut multipart = match multipart {
        Ok(m) => m,
        Err(e) => return page(PageView::danger(format!("An error occurred: {}", e))),
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return page(PageView::danger("An error occurred: no file was uploaded")),
            Err(e) => return page(PageView::danger(format!("An error occurred: {}", e))),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        if !filename.to_lowercase().ends_with(".csv") {
            tracing::info!("Rejected upload with name {:?}", filename);
            return page(PageView::danger("Please upload a CSV file"));
        }

        let content = match field.bytes().await {
            Ok(content) => content,
            Err(e) => return page(PageView::danger(format!("An error occurred: {}", e))),
        };

        return match state.uploads.save(&content).await {
            Ok(id) => page(
                PageView::message(MessageKind::Success, "File uploaded successfully!")
                    .with_filename(id.to_string()),
            ),
            Err(e) => {
                tracing::error!("Failed to store upload: {}", e);
                page(PageView::danger(format!("An error occurred: {}", e)))
            }
        };
    }
}

/// POST /process - Start processing a stored upload in the background.
async fn process_file(
    State(state): State<Arc<AppState>>,
    form: Result<Form<ProcessForm>, FormRejection>,
) -> Html<String> {
    let Ok(Form(form)) = form else {
        return page(PageView::danger("Missing file identifier. Please upload again."));
    };
    let Ok(id) = form.filename.parse::<UploadId>() else {
        return page(PageView::danger("File not found. Please upload again."));
    };

    match state.runs.start(id).await {
        Ok(_) => page(
            PageView::message(MessageKind::Info, "Started processing. Log will update below.")
                .with_filename(id.to_string())
                .with_log(),
        ),
        Err(StartError::NotFound(_)) => {
            page(PageView::danger("File not found. Please upload again."))
        }
        Err(StartError::AlreadyRunning(_)) => page(
            PageView::danger("This file is already being processed.")
                .with_filename(id.to_string())
                .with_log(),
        ),
    }
}

/// GET /log/:id - Full progress log as plain text.
async fn get_log(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Ok(id) = id.parse::<UploadId>() else {
        return NO_LOG_PLACEHOLDER.into_response();
    };
    match progress::read_all(&state.uploads.log_path(id)).await {
        Ok(Some(text)) => text.into_response(),
        Ok(None) => NO_LOG_PLACEHOLDER.into_response(),
        Err(e) => {
            tracing::error!(upload_id = %id, "Failed to read progress log: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read log: {}", e),
            )
                .into_response()
        }
    }
}

/// GET /runs/:id - Run state, 404 when the upload has never been processed.
async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let run = match id.parse::<UploadId>() {
        Ok(id) => state.runs.get(id).await,
        Err(_) => None,
    };
    match run {
        Some(run) => Json(run).into_response(),
        None => (StatusCode::NOT_FOUND, "No run for this identifier").into_response(),
    }
}

/// POST /runs/:id/cancel - Cancel an active run.
async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    let cancelled = match id.parse::<UploadId>() {
        Ok(id) => state.runs.cancel(id).await,
        Err(_) => false,
    };
    Json(CancelResponse { cancelled })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        planner: state.runs.agent().describe(),
    })
}
