//! HTTP backend for the community asset store.
//!
//! Uploaded originals live under `<storage_root>/profile/upload/{image,file}` and are served
//! back as static files under `/profile`. Image listings carry a `thumbUrl` for each entry,
//! materialized on demand by [`thumbnail_cache::ThumbnailStore`]. At boot a warm-up sweep
//! pre-generates thumbnails on a background thread; it is cancelled and joined on shutdown.
//!
//! # Endpoints
//! - `POST   /prod-api/api/common/upload` multipart, field `file`
//! - `GET    /prod-api/api/common/image/list?pageNum=&pageSize=`
//! - `GET    /prod-api/api/common/file/list?pageNum=&pageSize=`
//! - `DELETE /prod-api/api/common/image?url=`
//! - `DELETE /prod-api/api/common/file?url=`
//! - `GET    /profile/...` static files
//!
//! Every API response is HTTP 200 with a `{ code, msg }` envelope.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{delete, get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use thumbnail_cache::{WarmupHandle, WarmupSweeper};

pub mod config;
pub mod error;
pub mod listing;
pub mod routes;
pub mod state;

use config::Config;
use routes::{
    file_delete_handler, file_list_handler, image_delete_handler, image_list_handler,
    upload_handler,
};
use state::State;

pub fn build_router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let profile_dir = state.store.layout().storage_root().join("profile");

    Router::new()
        .route("/prod-api/api/common/upload", post(upload_handler))
        .route("/prod-api/api/common/image/list", get(image_list_handler))
        .route("/prod-api/api/common/image", delete(image_delete_handler))
        .route("/prod-api/api/common/file/list", get(file_list_handler))
        .route("/prod-api/api/common/file", delete(file_delete_handler))
        .nest_service("/profile", ServeDir::new(profile_dir))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(config: Config) -> Result<()> {
    info!("Initializing state...");
    let state = State::new(config)?;
    info!(root = %state.store.layout().storage_root().display(), "storage root resolved");

    let warmup = if state.config.warmup_on_start {
        Some(
            WarmupSweeper::new(Arc::clone(&state.store))
                .start()
                .context("Failed to spawn thumbnail warm-up thread")?,
        )
    } else {
        info!("thumbnail warm-up disabled");
        None
    };

    let app = build_router(Arc::clone(&state));

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    if let Some(handle) = warmup {
        stop_warmup(handle).await;
    }

    let stats = state.store.stats();
    info!(
        hits = stats.hits,
        generated = stats.generated,
        fallbacks = stats.fallbacks,
        skipped = stats.skipped,
        fallback_percent = stats.fallback_percent(),
        "thumbnail cache counters"
    );

    Ok(())
}

async fn stop_warmup(handle: WarmupHandle) {
    match tokio::task::spawn_blocking(move || handle.shutdown()).await {
        Ok(progress) => info!(
            completed = progress.completed,
            discovered = progress.discovered,
            cancelled = progress.is_cancelled,
            "thumbnail warm-up stopped"
        ),
        Err(e) => warn!("Failed to join thumbnail warm-up: {e}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
