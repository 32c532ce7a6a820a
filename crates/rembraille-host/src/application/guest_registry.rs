//! GuestRegistry: connected guests and host statistics.
//!
//! The registry is the host's in-memory record of every guest currently
//! connected.  Each entry tracks:
//!
//! - The guest's session id, socket address and (after the handshake) name.
//! - How many messages and cells it has sent.
//!
//! Totals survive disconnects and are reported by [`GuestRegistry::stats`].
//!
//! # Guest lifecycle
//!
//! ```text
//! accepted ──►  handshaken (name known) ──►  removed on disconnect
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Identifies one guest connection; a reconnecting guest gets a new id.
pub type GuestId = Uuid;

/// Runtime state for a connected guest.
#[derive(Debug, Clone)]
pub struct GuestRecord {
    pub id: GuestId,
    pub address: SocketAddr,
    /// Name from the HandshakeRequest; `None` until the handshake arrives.
    pub name: Option<String>,
    pub connected_at: Instant,
    pub messages_received: u64,
    pub cells_displayed: u64,
}

impl GuestRecord {
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Name if known, otherwise the socket address.
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// Running totals since the host started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub connections: u64,
    pub messages_received: u64,
    /// Individual cells, not rows.
    pub cells_displayed: u64,
    pub active_guests: usize,
}

/// In-memory registry of connected guests.
#[derive(Debug, Default)]
pub struct GuestRegistry {
    guests: HashMap<GuestId, GuestRecord>,
    totals: HostStats,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection and returns its id.
    pub fn add(&mut self, address: SocketAddr) -> GuestId {
        let id = Uuid::new_v4();
        self.guests.insert(
            id,
            GuestRecord {
                id,
                address,
                name: None,
                connected_at: Instant::now(),
                messages_received: 0,
                cells_displayed: 0,
            },
        );
        self.totals.connections += 1;
        id
    }

    pub fn set_name(&mut self, id: GuestId, name: impl Into<String>) {
        if let Some(guest) = self.guests.get_mut(&id) {
            guest.name = Some(name.into());
        }
    }

    pub fn record_message(&mut self, id: GuestId) {
        self.totals.messages_received += 1;
        if let Some(guest) = self.guests.get_mut(&id) {
            guest.messages_received += 1;
        }
    }

    pub fn record_cells(&mut self, id: GuestId, cells: usize) {
        let cells = cells as u64;
        self.totals.cells_displayed += cells;
        if let Some(guest) = self.guests.get_mut(&id) {
            guest.cells_displayed += cells;
        }
    }

    /// Removes a guest, returning its final record.
    pub fn remove(&mut self, id: GuestId) -> Option<GuestRecord> {
        self.guests.remove(&id)
    }

    pub fn get(&self, id: GuestId) -> Option<&GuestRecord> {
        self.guests.get(&id)
    }

    /// Snapshot of all guests, longest-connected first.
    pub fn all(&self) -> Vec<GuestRecord> {
        let mut all: Vec<_> = self.guests.values().cloned().collect();
        all.sort_by_key(|g| g.connected_at);
        all
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            active_guests: self.guests.len(),
            ..self.totals
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 2, 15], port))
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = GuestRegistry::new();
        assert!(registry.all().is_empty());
        assert_eq!(registry.stats(), HostStats::default());
    }

    #[test]
    fn test_add_counts_connection_and_tracks_guest() {
        // Arrange
        let mut registry = GuestRegistry::new();

        // Act
        let id = registry.add(addr(50000));

        // Assert
        let guest = registry.get(id).unwrap();
        assert_eq!(guest.address, addr(50000));
        assert_eq!(guest.name, None);
        assert_eq!(guest.label(), "10.0.2.15:50000");
        assert_eq!(registry.stats().connections, 1);
        assert_eq!(registry.stats().active_guests, 1);
    }

    #[test]
    fn test_set_name_changes_label() {
        let mut registry = GuestRegistry::new();
        let id = registry.add(addr(1));
        registry.set_name(id, "nvda-guest");
        assert_eq!(registry.get(id).unwrap().label(), "nvda-guest");
    }

    #[test]
    fn test_totals_survive_removal() {
        // Arrange
        let mut registry = GuestRegistry::new();
        let id = registry.add(addr(1));
        registry.record_message(id);
        registry.record_message(id);
        registry.record_cells(id, 40);

        // Act
        let record = registry.remove(id).unwrap();

        // Assert
        assert_eq!(record.messages_received, 2);
        assert_eq!(record.cells_displayed, 40);
        let stats = registry.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.cells_displayed, 40);
        assert_eq!(stats.active_guests, 0);
        assert_eq!(stats.connections, 1);
    }

    #[test]
    fn test_recording_for_unknown_guest_only_updates_totals() {
        let mut registry = GuestRegistry::new();
        registry.record_cells(Uuid::new_v4(), 8);
        assert_eq!(registry.stats().cells_displayed, 8);
    }
}
