use anyhow::{Context, Result};
use clap::Parser;
use muxd::launcher::{parse_connection_descriptor, LaunchRequest};
use muxd::locks::NoopLockBackend;
use muxd::store::StateStore;
use muxd::supervisor::Supervisor;
use muxd::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "muxd")]
#[command(about = "Keeps interactive terminal sessions alive without a foreground UI", long_about = None)]
struct Args {
    /// Connection descriptor for the initial session, scheme://user@host:port/#name
    descriptor: Option<String>,

    /// Working directory for the initial session
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Use the platform shell verbatim with a minimal environment
    #[arg(long)]
    fail_safe: bool,

    /// Hold the wake/network lock pair for the lifetime of the daemon
    #[arg(long)]
    hold_lock: bool,

    /// Path to an alternate config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let store = StateStore::load().context("failed to load state store")?;
    let (supervisor, handle) = Supervisor::new(config, Box::new(NoopLockBackend), store);
    let mut run = tokio::spawn(supervisor.run());

    if args.hold_lock {
        handle.acquire_lock().await?;
    }

    let connection = args
        .descriptor
        .as_deref()
        .map(parse_connection_descriptor)
        .unwrap_or_default();
    let request = LaunchRequest {
        cwd: args.workdir.clone(),
        fail_safe: args.fail_safe,
        connection,
        ..LaunchRequest::default()
    };

    let session = handle
        .create_session(request)
        .await
        .context("failed to start initial session")?;
    handle.switch_to(session.id()).await;
    info!(id = %session.id(), pid = session.pid(), "initial session running");

    tokio::select! {
        _ = &mut run => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            handle.shutdown().await;
            let _ = run.await;
        }
    }

    Ok(())
}
