//! mirror-daemon: Mirrors a DDP todos feed into plain-text list files.
//!
//! The desktop shell reports the user's login over the bridge; the daemon then
//! resumes that login over DDP and keeps `<root>/<list>.txt` up to date.

use anyhow::Result;
use clap::Parser;
use mirror_daemon::bridge::BridgeServer;
use mirror_daemon::config::{self, Config, IndexKind, DEFAULT_DDP_URL, DEFAULT_LISTEN};
use mirror_daemon::daemon::Daemon;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mirror-daemon")]
#[command(about = "Mirror a DDP todos feed into plain-text list files")]
struct Args {
    /// Directory for list files (defaults to ~/Desktop/Todos)
    #[arg(short, long, env = "TODOS_MIRROR_ROOT")]
    root: Option<String>,

    /// DDP WebSocket endpoint of the todos app
    #[arg(long, env = "TODOS_MIRROR_DDP_URL", default_value = DEFAULT_DDP_URL)]
    ddp_url: String,

    /// DDP protocol version to request
    #[arg(long, default_value = mirror_core::protocol::DDP_VERSION)]
    ddp_version: String,

    /// Address the desktop shell connects to
    #[arg(short, long, env = "TODOS_MIRROR_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: String,

    /// How list files find their todos
    #[arg(long, value_enum, default_value_t = IndexKind::FullScan)]
    index: IndexKind,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            root: self
                .root
                .as_deref()
                .map(config::expand_tilde)
                .unwrap_or_else(config::default_root),
            ddp_url: self.ddp_url,
            ddp_version: self.ddp_version,
            listen: self.listen,
            index: self.index,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,mirror_daemon=debug,mirror_core=debug"
    } else {
        "info,mirror_daemon=info,mirror_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config();
    config.validate()?;

    info!("Starting mirror-daemon");
    info!("Mirror root: {:?}", config.root);
    info!("DDP endpoint: {}", config.ddp_url);

    let listener = BridgeServer::bind(&config.listen).await?;

    let mut daemon = Daemon::native(config);
    daemon.bootstrap().await;

    info!("Waiting for login from the desktop shell. Press Ctrl+C to stop.");
    daemon
        .run(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    info!("Shutting down");
    Ok(())
}
