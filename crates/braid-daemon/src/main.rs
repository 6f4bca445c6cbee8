//! `braidd` -- the braid workspace daemon.
//!
//! Binds the workspace control socket and serves requests until a signal or
//! a `Shutdown` request arrives. One daemon per workspace; a second start
//! against a live endpoint exits with "already running".

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;

use braid_config::{WorkspacePaths, find_braid_dir_or_error, load_config};
use braid_daemon::lifecycle::write_daemon_error;
use braid_daemon::{DaemonError, Server};
use braid_engine::{Capabilities, Engine};

#[derive(Debug, Parser)]
#[command(name = "braidd", about = "braid workspace daemon", version)]
struct Args {
    /// Workspace directory (defaults to discovery from the current
    /// directory).
    #[arg(long, env = "BRAID_WORKSPACE")]
    workspace: Option<std::path::PathBuf>,

    /// Override the flush debounce, in seconds.
    #[arg(long)]
    debounce_secs: Option<u64>,

    /// Verbose logging to stderr.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "braidd=debug,braid_daemon=debug,braid_engine=debug" } else { "braidd=info,braid_daemon=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = args
        .workspace
        .clone()
        .unwrap_or(std::env::current_dir().context("cannot resolve current directory")?);
    let braid_dir = find_braid_dir_or_error(&start)?;
    let paths = WorkspacePaths::new(braid_dir);

    let mut config = load_config(&paths.braid_dir)?;
    if let Some(debounce) = args.debounce_secs {
        config.flush_debounce_secs = debounce;
    }

    let engine = Engine::open(paths.clone(), config, Capabilities::default())
        .context("failed to open workspace")?;

    let server = Server::new(paths.clone(), Arc::new(engine));
    let flag = server.shutdown_flag();
    ctrlc::set_handler(move || {
        info!("termination signal received");
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install signal handler")?;

    match server.run() {
        Ok(()) => Ok(()),
        Err(DaemonError::AlreadyRunning) => {
            eprintln!("braidd: already running for this workspace");
            Ok(())
        }
        Err(e) => {
            write_daemon_error(&paths, &e.to_string());
            bail!(e);
        }
    }
}
