use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use mdrived_core::ClientKind;

use mdrived::api::{self, ApiState};
use mdrived::daemon::serve::SerialLoop;
use mdrived::daemon::Daemon;
use mdrived::repo::RepoIndex;

/// Sinclair Microdrive emulator daemon.
#[derive(Parser, Debug)]
#[command(name = "mdrived", version, about)]
struct Cli {
    /// Serial device of the adapter, or tcp://host:port
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    device: String,

    /// Client kind the adapter is attached to
    #[arg(short, long, default_value = "if1", value_parser = parse_client)]
    client: ClientKind,

    /// Listen address of the control API
    #[arg(short, long, default_value = "127.0.0.1:8888")]
    listen: String,

    /// Cartridge repository directory, enables search
    #[arg(short, long)]
    repo: Option<PathBuf>,

    /// Directory for auto-saved cartridges
    #[arg(short, long)]
    autosave: Option<PathBuf>,
}

fn parse_client(value: &str) -> Result<ClientKind, String> {
    match value.to_ascii_lowercase().as_str() {
        "if1" => Ok(ClientKind::If1),
        "ql" => Ok(ClientKind::Ql),
        other => Err(format!("unknown client kind: '{}'", other)),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    info!("mdrived {} starting", env!("CARGO_PKG_VERSION"));

    let daemon = Arc::new(Daemon::new(cli.client, cli.autosave.clone()));

    // the serial loop runs synchronously on its own thread
    {
        let daemon = Arc::clone(&daemon);
        let device = cli.device.clone();
        std::thread::Builder::new()
            .name("serial".to_string())
            .spawn(move || SerialLoop::new(daemon, device).run())
            .context("spawning serial loop")?;
    }

    let index = cli.repo.as_ref().map(|dir| {
        let index = RepoIndex::new(dir);
        index.start();
        index
    });

    let state = Arc::new(ApiState {
        daemon,
        index,
        repo_dir: cli.repo,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime
        .block_on(api::serve(state, &cli.listen))
        .context("serving control API")
}
