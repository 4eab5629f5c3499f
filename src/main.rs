use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{object_store::SqliteObjectStore, transfer_service::TransferService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting objectdb with config: {:?}", cfg);

    // --- Connect the shared store handle ---
    ensure_database_dir(&cfg.store.database_url)?;
    tracing::info!(
        "connect to store {} (consistency {:?}, pool {})",
        cfg.store.database_url,
        cfg.store.consistency,
        cfg.store.max_connections
    );
    let store = SqliteObjectStore::connect(&cfg.store).await?;
    store.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        store.close().await;
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let transfers = TransferService::new(Arc::new(store.clone()));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(transfers);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("http api start on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Teardown: the store handle is closed exactly once ---
    store.close().await;
    tracing::info!("store connections closed");

    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL if it is missing.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_dir_is_created_for_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested/meta/objectdb.db");
        ensure_database_dir(&format!("sqlite://{}?mode=rwc", db.display())).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }

    #[test]
    fn memory_urls_need_no_directory() {
        ensure_database_dir("sqlite::memory:").unwrap();
    }
}
