//! Host endpoints and the ordered candidate list produced by discovery.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::protocol::messages::DEFAULT_PORT;

/// A host address and port the guest may connect to.
///
/// Endpoints are plain values: once a connection attempt picks one it is
/// never mutated, only replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// An endpoint on the default RemBraille port.
    pub fn with_default_port(host: IpAddr) -> Self {
        Self::new(host, DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Ordered, duplicate-free sequence of endpoints.
///
/// The first occurrence of an endpoint fixes its position; later pushes of
/// the same endpoint are ignored.  Consumers try entries front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    entries: Vec<Endpoint>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `endpoint` unless it is already present.
    ///
    /// Returns `true` if the endpoint was added.
    pub fn push(&mut self, endpoint: Endpoint) -> bool {
        if self.entries.contains(&endpoint) {
            return false;
        }
        self.entries.push(endpoint);
        true
    }

    pub fn extend<I: IntoIterator<Item = Endpoint>>(&mut self, endpoints: I) {
        for endpoint in endpoints {
            self.push(endpoint);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.entries.contains(endpoint)
    }

    pub fn first(&self) -> Option<&Endpoint> {
        self.entries.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Endpoint] {
        &self.entries
    }
}

impl FromIterator<Endpoint> for CandidateList {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl IntoIterator for CandidateList {
    type Item = Endpoint;
    type IntoIter = std::vec::IntoIter<Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ep(a: u8, b: u8, c: u8, d: u8) -> Endpoint {
        Endpoint::with_default_port(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
    }

    #[test]
    fn test_push_ignores_duplicates_and_keeps_first_position() {
        // Arrange
        let mut list = CandidateList::new();

        // Act
        assert!(list.push(ep(10, 0, 2, 2)));
        assert!(list.push(ep(192, 168, 56, 1)));
        assert!(!list.push(ep(10, 0, 2, 2)));

        // Assert
        assert_eq!(list.as_slice(), &[ep(10, 0, 2, 2), ep(192, 168, 56, 1)]);
    }

    #[test]
    fn test_same_host_on_different_ports_is_distinct() {
        let host = IpAddr::V4(Ipv4Addr::new(10, 0, 2, 2));
        let list: CandidateList = [Endpoint::new(host, 1), Endpoint::new(host, 2)]
            .into_iter()
            .collect();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_endpoint_display_is_socket_address() {
        assert_eq!(ep(10, 0, 2, 2).to_string(), "10.0.2.2:17635");
    }
}
