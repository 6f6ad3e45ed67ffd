//! tracker-server - risk/event tracker HTTP service

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracker_common::config::{ensure_directories, StorageBackend, TrackerConfig};
use tracker_common::db::init_database;
use tracker_server::db::{sessions, users};
use tracker_server::staging::{StagingArea, UploadPolicy};
use tracker_server::storage::{BlobStorage, LocalStorage, ObjectStorage};
use tracker_server::{build_router, AppState};

/// How often expired sessions and abandoned staged uploads are purged
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Parser, Debug)]
#[command(name = "tracker-server", version, about = "Risk and event tracker service")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "TRACKER_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database and local media
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is needed before tracing for the default level
    let config_result = TrackerConfig::load(args.config.as_deref());
    let default_level = config_result
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(
        "Starting tracker-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut config = match config_result {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(root) = args.root_folder {
        config.root_folder = Some(root);
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    ensure_directories(&config)?;
    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path).await?;

    if users::ensure_superuser(&pool, &config.bootstrap).await?.is_none() {
        warn!("No bootstrap superuser password configured; set TRACKER_SUPERUSER_PASSWORD to create one");
    }

    let storage: Arc<dyn BlobStorage> = match config.storage.backend {
        StorageBackend::Local => {
            let media_root = config.media_root();
            info!("Local media storage: {}", media_root.display());
            Arc::new(LocalStorage::new(media_root))
        }
        StorageBackend::Object => {
            let object = ObjectStorage::from_config(&config.storage).context("Object storage configuration")?;
            info!(
                endpoint = config.storage.endpoint.as_deref().unwrap_or_default(),
                bucket = config.storage.bucket.as_deref().unwrap_or_default(),
                "Object storage backend"
            );
            Arc::new(object)
        }
    };

    let state = AppState::new(pool.clone(), storage)
        .with_upload_policy(UploadPolicy::from_config(&config.uploads))
        .with_session_ttl(chrono::Duration::hours(config.session.ttl_hours));

    let housekeeping = state.clone();
    let staging_ttl = chrono::Duration::hours(config.uploads.staging_ttl_hours);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            match sessions::purge_expired(&pool).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => warn!("Failed to purge expired sessions: {}", e),
            }
            let staging = StagingArea::new(
                &housekeeping.db,
                housekeeping.storage.as_ref(),
                housekeeping.uploads.as_ref(),
            );
            match staging.purge_abandoned(staging_ttl).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged abandoned staged uploads"),
                Err(e) => warn!("Failed to purge abandoned staged uploads: {}", e),
            }
        }
    });

    let app = build_router(state, config.uploads.max_request_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("tracker-server listening on http://{}", config.bind);
    info!("Health check: http://{}/health", config.bind);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
