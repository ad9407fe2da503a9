use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hot_potato_server::api::{build_router, AppState};
use hot_potato_server::constants::DEFAULT_PORT;
use hot_potato_server::server_utils::{init_logging, resolve_static_dir};
use hot_potato_server::session::SessionHandle;
use hot_potato_server::settings_store::SettingsStore;
use hot_potato_server::types::{ProfileKind, SessionProfile};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    host: String,
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// `killer_cooldown` (default) or `simple`
    #[arg(long, env = "GAME_PROFILE")]
    profile: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let profile = match cli.profile.as_deref() {
        None => SessionProfile::default(),
        Some(raw) => match ProfileKind::parse(raw) {
            Some(kind) => SessionProfile::from_kind(kind),
            None => bail!("unknown game profile `{raw}`; use `killer_cooldown` or `simple`"),
        },
    };

    let settings = SettingsStore::new();
    let session = SessionHandle::spawn(settings.config().clone(), profile);
    let app = build_router(AppState::new(settings, session.clone()));

    let app = if let Some(static_dir) = resolve_static_dir(cli.static_dir) {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving the API only");
        app
    };

    let bind_addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    info!(addr = %bind_addr, profile = ?profile.kind, "server running");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")?;

    let _ = session.shutdown().await;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
