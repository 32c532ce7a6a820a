//! RemBraille guest client entry point.
//!
//! Runs one braille session from a terminal: loads the settings, finds the
//! host, connects and logs every key press and state change.  With
//! `--message` it shows a line of Braille ASCII on the display each time the
//! session connects.
//!
//! ```text
//! main()
//!  └─ ConfigStore::load()        -- settings + command-line overrides
//!  └─ BrailleSession::connect()  -- discovery, then the connection manager
//!  └─ event loop
//!       ├─ Connected        -> show --message, if any
//!       ├─ Failed           -> exit with an error
//!       ├─ key press        -> log the gesture
//!       └─ Ctrl-C           -> disconnect and exit
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rembraille_client::infrastructure::storage::ConfigStore;
use rembraille_client::{BrailleSession, SessionEvent, StatusEvent};
use rembraille_core::{CellBuffer, ConnectionState};

#[derive(Debug, Parser)]
#[command(name = "rembraille-client", version, about = "RemBraille guest client")]
struct Args {
    /// Host address; skips discovery.
    #[arg(long, env = "REMBRAILLE_HOST")]
    host: Option<IpAddr>,

    /// Host port.
    #[arg(long, env = "REMBRAILLE_PORT")]
    port: Option<u16>,

    /// Settings file; defaults to the platform config directory.
    #[arg(long, env = "REMBRAILLE_CONFIG")]
    config: Option<PathBuf>,

    /// Braille ASCII text to show once connected.
    #[arg(long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let store = match &args.config {
        Some(path) => ConfigStore::at(path),
        None => ConfigStore::platform_default().context("locating settings file")?,
    };
    let mut config = store
        .load()
        .with_context(|| format!("loading settings from {}", store.path().display()))?;
    if let Some(host) = args.host {
        config.connection.host = Some(host);
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("RemBraille client starting");

    let mut session = BrailleSession::from_config(config, Some(store));
    session.on_gesture(|gesture| info!(%gesture, "display key"));
    session.on_status_change(|status| match status {
        StatusEvent::StateChanged(state) => info!("status: {state}"),
        StatusEvent::CellsAcknowledged { cell_count } => info!(cell_count, "host shows row"),
        StatusEvent::HostError(text) => warn!("host reported: {text}"),
    });

    let candidates = session.connect().await.context("finding a braille host")?;
    info!(candidates = candidates.len(), "connecting");

    let row = args.message.as_deref().map(CellBuffer::from_braille_ascii);
    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                let SessionEvent::Status(StatusEvent::StateChanged(state)) = event else {
                    continue;
                };
                match state {
                    ConnectionState::Connected { .. } => {
                        if let Some(row) = &row {
                            if let Err(e) = session.display(row.as_bytes().to_vec()).await {
                                warn!("could not show message: {e}");
                            }
                        }
                    }
                    ConnectionState::Failed(reason) => bail!("braille link failed: {reason}"),
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    session.disconnect().await;
    info!("RemBraille client stopped");
    Ok(())
}
