//! Report portal server binary.
//!
//! Serves a public landing page and report listing, lets the single admin log
//! in and upload PDF reports, and streams stored reports back as downloads.
//! Report metadata lives in SQLite; the binaries live in a plain directory.

mod app;
mod atomic;
mod auth;
mod background;
mod config;
mod db;
mod error;
mod etag;
mod http;
mod logging;
mod reports;
mod storage;
mod version;
mod views;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::app::{AppComponents, build_router};
use crate::auth::{Credentials, SessionStore};
use crate::background::spawn_background_tasks;
use crate::config::{Args, Command};
use crate::db::ReportStore;
use crate::storage::ReportFiles;

shadow!(build);

/// Starts the report portal and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    if let Some(Command::HashPassword { password }) = &args.command {
        let hash = auth::hash_password(password)
            .map_err(|err| std::io::Error::other(err.to_string()))?;
        println!("{hash}");
        return Ok(());
    }

    logging::init_logging();

    let credentials = Credentials::new(
        args.admin_username.clone(),
        args.admin_password_hash.clone(),
    )
    .map_err(|err| {
        error!(error = %err, "invalid admin credentials configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;

    let files = Arc::new(ReportFiles::new(PathBuf::from(&args.report_dir)));
    files.ensure_root().await?;

    let reports = ReportStore::connect(&args.database_url).await.map_err(|err| {
        error!(error = %err, "database connection failed");
        std::io::Error::other(err)
    })?;

    let sessions = Arc::new(SessionStore::new(Duration::from_secs(args.session_ttl_secs)));
    let app = build_router(AppComponents {
        credentials: Arc::new(credentials),
        sessions: sessions.clone(),
        files: files.clone(),
        reports: Arc::new(reports),
        upload_max_size: args.upload_max_size,
    });

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!(
        report_dir = %files.root_path().display(),
        "Server running at http://{}", addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(sessions);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
