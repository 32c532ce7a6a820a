//! RemBraille reference host entry point.
//!
//! Serves a simulated braille display: every row a guest sends is logged as
//! Unicode braille and Braille ASCII, and display keys can be pressed from
//! the terminal.
//!
//! ```text
//! main()
//!  └─ HostServer::bind()   -- accepts guests on the RemBraille port
//!  └─ event loop
//!       ├─ stdin command   -> stats / key press / quit
//!       ├─ host event      -> log guest arrivals and departures
//!       └─ Ctrl-C          -> shut down
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rembraille_core::protocol::messages::{KeyAction, DEFAULT_PORT};
use rembraille_host::{HostConfig, HostEvent, HostServer};

/// Key sent by a bare `k` command (left arrow).
const DEFAULT_KEY_ID: u16 = 100;

#[derive(Debug, Parser)]
#[command(name = "rembraille-host", version, about = "RemBraille reference host")]
struct Args {
    /// TCP port to listen on.
    #[arg(long, env = "REMBRAILLE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Display size reported to guests.
    #[arg(long, default_value_t = 40)]
    cells: u16,

    /// Echo every row back to the guest.
    #[arg(long)]
    ack_cells: bool,

    /// Never answer pings.
    #[arg(long)]
    no_pong: bool,

    /// Name sent in the handshake.
    #[arg(long, default_value = "rembraille-host")]
    name: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Stats,
    Key(u16),
    Quit,
    Help,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "s" | "stats" => Command::Stats,
        "k" | "key" => match words.next() {
            Some(id) => Command::Key(id.parse().ok()?),
            None => Command::Key(DEFAULT_KEY_ID),
        },
        "q" | "quit" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        _ => return None,
    };
    Some(command)
}

const HELP: &str = "commands: s = stats, k [id] = press and release a key, q = quit, h = help";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = HostConfig {
        bind: SocketAddr::new(args.bind, args.port),
        cells: args.cells,
        ack_cells: args.ack_cells,
        no_pong: args.no_pong,
        server_name: args.name,
        ..HostConfig::default()
    };
    let (server, mut events) = HostServer::bind(config)
        .await
        .context("starting braille host")?;
    info!("{HELP}");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Some(Command::Stats) => log_stats(&server).await,
                    Some(Command::Key(key_id)) => {
                        server.broadcast_key(key_id, KeyAction::Down).await;
                        server.broadcast_key(key_id, KeyAction::Up).await;
                    }
                    Some(Command::Quit) => break,
                    Some(Command::Help) => info!("{HELP}"),
                    None if line.trim().is_empty() => {}
                    None => warn!("unknown command {line:?}; {HELP}"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("stdin closed: {e}");
                    stdin_open = false;
                }
            },
            Some(event) = events.recv() => match event {
                HostEvent::GuestConnected { guest, name, address } => {
                    info!(%guest, %name, %address, "guest ready");
                }
                HostEvent::GuestDisconnected { guest } => info!(%guest, "guest gone"),
                HostEvent::CellsDisplayed { .. } => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    log_stats(&server).await;
    server.shutdown().await;
    Ok(())
}

async fn log_stats(server: &HostServer) {
    let stats = server.stats().await;
    info!(
        connections = stats.connections,
        active = stats.active_guests,
        messages = stats.messages_received,
        cells = stats.cells_displayed,
        "host statistics"
    );
    for guest in server.guests().await {
        info!(
            id = %guest.id,
            name = %guest.label(),
            connected_for = ?guest.connected_for(),
            messages = guest.messages_received,
            "guest"
        );
    }
}
