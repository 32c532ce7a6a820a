//! Network infrastructure for the reference host.
//!
//! [`HostServer`] accepts guest connections on the RemBraille port and runs
//! one protocol session per guest.  Noteworthy things that happen in those
//! sessions are published as [`HostEvent`]s.

pub mod server;

use std::net::{Ipv4Addr, SocketAddr};

use rembraille_core::protocol::messages::{DEFAULT_PORT, PROTOCOL_MAJOR};
use rembraille_core::{CellBuffer, ProtocolError};
use thiserror::Error;

use crate::application::guest_registry::GuestId;

pub use server::HostServer;

/// Error type for the host server.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A guest sent bytes that are not a valid frame or message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("guest not found: {0}")]
    GuestNotFound(GuestId),
}

/// Host server settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bind: SocketAddr,
    /// Display size reported in every HandshakeResponse.
    pub cells: u16,
    /// Echo every Cells message back as an acknowledgement.
    pub ack_cells: bool,
    /// Ignore pings; guests will declare the host unresponsive.
    pub no_pong: bool,
    /// Major version put in the HandshakeResponse.
    pub advertised_major: u8,
    pub server_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            cells: 40,
            ack_cells: false,
            no_pong: false,
            advertised_major: PROTOCOL_MAJOR,
            server_name: "rembraille-host".to_string(),
        }
    }
}

/// Events published by the server to whoever holds the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A guest completed its handshake.
    GuestConnected {
        guest: GuestId,
        name: String,
        address: SocketAddr,
    },
    /// A guest sent a row for the display.
    CellsDisplayed { guest: GuestId, cells: CellBuffer },
    GuestDisconnected { guest: GuestId },
}
