//! Connection state machine vocabulary.
//!
//! ```text
//! Disconnected → Connecting → Handshaking → Connected → Reconnecting → Connecting …
//!                                   │                        │
//!                                   └──────► Failed ◄────────┘ (retries exhausted)
//! ```
//! `Failed` is terminal until the caller explicitly connects again.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::endpoint::Endpoint;

/// The single active state of a connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting(Endpoint),
    Handshaking(Endpoint),
    Connected { endpoint: Endpoint, cell_count: u16 },
    /// Waiting out the backoff delay before attempt number `attempt`.
    Reconnecting { attempt: u32 },
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed(_)
        )
    }

    /// Negotiated display size, if the session is up.
    pub fn cell_count(&self) -> Option<u16> {
        match self {
            ConnectionState::Connected { cell_count, .. } => Some(*cell_count),
            _ => None,
        }
    }

    /// Short lowercase label used in log fields and status text.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting(_) => "connecting",
            ConnectionState::Handshaking(_) => "handshaking",
            ConnectionState::Connected { .. } => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting(ep) => write!(f, "connecting to {ep}"),
            ConnectionState::Handshaking(ep) => write!(f, "handshaking with {ep}"),
            ConnectionState::Connected {
                endpoint,
                cell_count,
            } => write!(f, "connected to {endpoint} ({cell_count} cells)"),
            ConnectionState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {attempt})")
            }
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Why a connection manager gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The host speaks an incompatible major protocol version.
    VersionMismatch { local: u8, remote: u8 },
    /// The host rejected or lacks a required capability.
    CapabilityMismatch(String),
    /// The configured retry limit was reached.
    RetriesExhausted { attempts: u32 },
    /// There was nothing to connect to.
    NoCandidates,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::VersionMismatch { local, remote } => write!(
                f,
                "protocol version mismatch (local major {local}, host major {remote})"
            ),
            FailureReason::CapabilityMismatch(detail) => {
                write!(f, "capability mismatch: {detail}")
            }
            FailureReason::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
            FailureReason::NoCandidates => f.write_str("no host candidates"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_cell_count_only_when_connected() {
        let endpoint = Endpoint::with_default_port(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(
            ConnectionState::Connected {
                endpoint,
                cell_count: 40
            }
            .cell_count(),
            Some(40)
        );
        assert_eq!(ConnectionState::Handshaking(endpoint).cell_count(), None);
    }

    #[test]
    fn test_failed_and_disconnected_are_terminal() {
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(ConnectionState::Failed(FailureReason::NoCandidates).is_terminal());
        assert!(!ConnectionState::Reconnecting { attempt: 1 }.is_terminal());
    }

    #[test]
    fn test_version_mismatch_display_names_both_versions() {
        let text = FailureReason::VersionMismatch {
            local: 1,
            remote: 2,
        }
        .to_string();
        assert!(text.contains("local major 1"));
        assert!(text.contains("host major 2"));
    }
}
