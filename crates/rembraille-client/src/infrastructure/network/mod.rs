//! Network infrastructure for the guest client.
//!
//! Owns the TCP link to the host braille server and everything that keeps it
//! alive.
//!
//! Architecture:
//! - [`ConnectionManager`] runs a supervisor task that walks the candidate
//!   list, drives the handshake and reconnects with exponential backoff.
//! - Per connection, a receive task reassembles frames and hands them to the
//!   dispatch layer, and a keepalive task pings the host.
//! - All outbound bytes (display rows, pings, pongs) go through one
//!   [`SharedWriter`], so frames never interleave on the wire.
//! - Everything the driver needs to know travels as
//!   [`SessionEvent`](crate::application::dispatch::SessionEvent)s on an
//!   `mpsc` channel; background tasks never call into driver code.

pub mod backoff;
pub mod connection_manager;
pub mod keepalive;
pub mod receive_loop;
pub mod transport;
pub mod writer;

use std::io;
use std::time::Duration;

use rembraille_core::protocol::messages::capabilities;
use rembraille_core::protocol::ProtocolError;
use rembraille_core::Endpoint;
use thiserror::Error;

pub use backoff::Backoff;
pub use connection_manager::ConnectionManager;
pub use transport::{Connector, TcpConnector};
pub use writer::SharedWriter;

/// Errors that end a connection attempt or an established link.
///
/// Every variant except a fatal [`HandshakeError`] leads to `Reconnecting`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The TCP connect was refused or failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// The TCP connect did not complete in time.
    #[error("connecting to {endpoint} timed out after {after:?}")]
    ConnectTimeout { endpoint: Endpoint, after: Duration },

    /// The host closed the connection.
    #[error("connection closed by host")]
    Closed,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The host sent bytes that are not a valid frame or message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No Pong arrived within the timeout after the oldest unanswered Ping.
    #[error("host unresponsive: no pong for {0:?}")]
    Unresponsive(Duration),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A background task panicked or was cancelled unexpectedly.
    #[error("link task ended abnormally: {0}")]
    TaskFailed(String),
}

/// Errors raised while negotiating a session with the host.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// The host speaks a different major protocol version.
    #[error("protocol version mismatch: local major {local}, host major {remote}")]
    VersionMismatch { local: u8, remote: u8 },

    /// The host cannot provide what the guest requires.
    #[error("capability mismatch: {0}")]
    CapabilityMismatch(String),

    /// No HandshakeResponse arrived in time.
    #[error("no handshake response within {0:?}")]
    Timeout(Duration),
}

impl HandshakeError {
    /// Fatal errors move the manager to `Failed` instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HandshakeError::VersionMismatch { .. } | HandshakeError::CapabilityMismatch(_)
        )
    }
}

/// Errors returned to callers of [`ConnectionManager::send`].
#[derive(Debug, Error)]
pub enum SendError {
    /// There is no established session.
    #[error("not connected")]
    NotConnected,

    /// The row length differs from the negotiated display size.
    #[error("cell count mismatch: display has {expected} cells, buffer has {actual}")]
    CellCountMismatch { expected: usize, actual: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[from] ProtocolError),

    /// The write failed; the link is now being re-established.
    #[error("link down: {0}")]
    LinkDown(#[source] io::Error),
}

impl SendError {
    /// How a failed background write (ping, pong, handshake) ends the link.
    pub(crate) fn into_link_error(self) -> ConnectionError {
        match self {
            SendError::LinkDown(e) => ConnectionError::Write(e),
            SendError::NotConnected => ConnectionError::Closed,
            SendError::Encode(e) => ConnectionError::Protocol(e),
            other @ SendError::CellCountMismatch { .. } => {
                ConnectionError::TaskFailed(other.to_string())
            }
        }
    }
}

/// Timing and identity settings for the connection manager.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Name advertised in the HandshakeRequest.
    pub client_name: String,
    /// Capability bits advertised in the HandshakeRequest.
    pub capabilities: u32,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    /// Time allowed for the oldest unanswered Ping before the host is declared unresponsive.
    pub pong_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Full passes over the candidate list before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            client_name: "rembraille-client".to_string(),
            capabilities: capabilities::KEY_INPUT | capabilities::KEEPALIVE,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_retries: None,
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_default_pong_timeout_is_twice_the_interval() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.pong_timeout, cfg.ping_interval * 2);
    }

    #[test]
    fn test_network_config_default_retries_forever() {
        assert_eq!(NetworkConfig::default().max_retries, None);
    }

    #[test]
    fn test_only_version_and_capability_mismatches_are_fatal() {
        assert!(HandshakeError::VersionMismatch { local: 1, remote: 2 }.is_fatal());
        assert!(HandshakeError::CapabilityMismatch("no cells".into()).is_fatal());
        assert!(!HandshakeError::Timeout(Duration::from_secs(5)).is_fatal());
    }
}
