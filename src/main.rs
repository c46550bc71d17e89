//! TeamFlow Backend
//!
//! REST backend for shared task claiming and leave tracking, with SQLite
//! persistence, hosted image uploads and a scheduled retention sweep.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod images;
mod jobs;
mod models;
mod session;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Config, LogFormat};
use db::Repository;
use images::{CloudinaryHost, ImageHost};
use jobs::RetentionSweeper;
use session::SessionContext;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub images: Arc<dyn ImageHost>,
    pub sessions: Arc<SessionContext>,
    pub sweeper: Arc<RetentionSweeper>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, images: Arc<dyn ImageHost>, config: Config) -> Self {
        let sessions = Arc::new(SessionContext::new(
            repo.clone(),
            config.admin_emails.clone(),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            repo.clone(),
            config.retention_days,
            config.sweep_interval,
        ));
        Self {
            repo,
            images,
            sessions,
            sweeper,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!("Starting TeamFlow Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (TEAMFLOW_API_PSK). Authentication is disabled!");
    }
    if config.image_host.cloud_name.is_none() || config.image_host.upload_preset.is_none() {
        tracing::warn!("Image hosting is not configured. Proof and avatar uploads will fail.");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let images: Arc<dyn ImageHost> = Arc::new(CloudinaryHost::new(config.image_host.clone()));
    let bind_addr = config.bind_addr;
    let state = AppState::new(repo, images, config);

    tracing::info!(
        retention_days = state.config.retention_days,
        interval_secs = state.config.sweep_interval.as_secs(),
        "Scheduling retention sweep"
    );
    state.sweeper.clone().spawn();

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        .route("/revision", get(api::get_revision))
        .route("/events", get(api::change_feed))
        // Session & profile
        .route(
            "/session",
            post(api::sign_in).get(api::get_session).delete(api::sign_out),
        )
        .route("/profile", get(api::get_profile).put(api::update_profile))
        // Tasks
        .route("/tasks", get(api::list_tasks).post(api::create_task))
        .route("/tasks/stats", get(api::task_stats))
        .route("/tasks/{id}", get(api::get_task))
        .route("/tasks/{id}/claim", post(api::claim_task))
        .route("/tasks/{id}/release", post(api::release_task))
        .route("/tasks/{id}/finish", post(api::finish_task))
        // Attendance
        .route(
            "/attendance",
            get(api::list_attendance).post(api::submit_leave),
        )
        .route("/attendance/mine", get(api::list_my_attendance))
        .route("/attendance/away", get(api::list_away))
        .route("/attendance/{id}", get(api::get_attendance))
        // Legacy images
        .route("/images/{id}", get(api::get_image))
        // Maintenance
        .route("/admin/cleanup", post(api::cleanup_range))
        .route("/admin/retention-sweep", post(api::run_retention_sweep))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
