//! Host discovery: where is the braille server?
//!
//! The guest usually cannot know its host's address in advance.  Discovery
//! builds an ordered [`CandidateList`] from the cheapest and most specific
//! evidence to the most expensive:
//!
//! 1. The endpoint of the last successful session.
//! 2. The default gateway (NAT setups put the host there).
//! 3. Well-known host addresses for the detected hypervisor.
//! 4. ARP neighbours whose MAC prefix belongs to a hypervisor host adapter.
//! 5. A scan of the guest's /24 for anything listening on the service port.
//!    If nothing answers, the conventional host addresses `.1`, `.2` and
//!    `.254` are added unverified.
//!
//! Every step runs under its own timeout and the whole cascade under a
//! ceiling.  A slow step loses its contribution; it never delays the caller
//! past the ceiling.

pub mod probe;
pub mod vendors;

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use rembraille_core::protocol::messages::DEFAULT_PORT;
use rembraille_core::{CandidateList, Endpoint};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub use probe::{NetworkProbe, Neighbor, SystemProbe};
pub use vendors::{Hypervisor, MacAddr};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The cascade finished without a single candidate.
    #[error("no braille host candidates found within {0:?}")]
    NoCandidates(Duration),
}

/// Tuning for the discovery cascade.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Service port every candidate is given.
    pub port: u16,
    /// Upper bound for the whole cascade.
    pub ceiling: Duration,
    /// Upper bound for each individual step.
    pub step_timeout: Duration,
    /// Whether step 5 runs at all.
    pub subnet_scan: bool,
    /// Per-address connect timeout during the subnet scan.
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            ceiling: Duration::from_secs(3),
            step_timeout: Duration::from_secs(1),
            subnet_scan: true,
            probe_timeout: Duration::from_millis(200),
        }
    }
}

/// Runs the discovery cascade against a [`NetworkProbe`].
pub struct HostDiscovery<P> {
    probe: Arc<P>,
    config: DiscoveryConfig,
}

impl<P: NetworkProbe> HostDiscovery<P> {
    pub fn new(probe: P, config: DiscoveryConfig) -> Self {
        Self {
            probe: Arc::new(probe),
            config,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Builds the candidate list, best guess first, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::NoCandidates`] if every step came up empty.
    pub async fn discover(
        &self,
        last_known: Option<Endpoint>,
    ) -> Result<CandidateList, DiscoveryError> {
        let started = Instant::now();
        let ceiling = started + self.config.ceiling;
        let mut found = Found::new(self.config.port);

        if let Some(endpoint) = last_known {
            debug!(%endpoint, "candidate from last session");
            found.list.push(endpoint);
        }

        if let Some(Some(gateway)) = self
            .step("default gateway", ceiling, self.probe.default_gateway())
            .await
        {
            found.add(gateway, "default gateway");
        }

        if let Some(Some(hypervisor)) = self
            .step("hypervisor", ceiling, self.probe.hypervisor())
            .await
        {
            info!(%hypervisor, "running under a hypervisor");
            for &ip in hypervisor.suggested_hosts() {
                found.add(ip, "hypervisor table");
            }
        }

        if let Some(neighbors) = self.step("arp table", ceiling, self.probe.neighbors()).await {
            for n in neighbors {
                if let Some(vendor) = n.mac.hypervisor_vendor() {
                    debug!(ip = %n.ip, mac = %n.mac, %vendor, "hypervisor host adapter in arp table");
                    found.add(n.ip, "arp vendor match");
                }
            }
        }

        if self.config.subnet_scan {
            self.scan_subnet(&mut found, ceiling).await;
        }

        let elapsed = started.elapsed();
        if found.list.is_empty() {
            warn!(?elapsed, "discovery found no candidates");
            return Err(DiscoveryError::NoCandidates(elapsed));
        }
        info!(candidates = found.list.len(), ?elapsed, "discovery complete");
        Ok(found.list)
    }

    /// Runs one step, bounded by the step timeout and the overall ceiling.
    async fn step<T>(
        &self,
        name: &'static str,
        ceiling: Instant,
        fut: impl Future<Output = T>,
    ) -> Option<T> {
        let deadline = (Instant::now() + self.config.step_timeout).min(ceiling);
        match timeout_at(deadline, fut).await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(step = name, "discovery step timed out");
                None
            }
        }
    }

    async fn scan_subnet(&self, found: &mut Found, ceiling: Instant) {
        let Some(Some(local)) = self
            .step("local address", ceiling, self.probe.local_address())
            .await
        else {
            debug!("no local IPv4 address; skipping subnet scan");
            return;
        };

        let [a, b, c, own] = local.octets();
        let port = self.config.port;
        let within = self.config.probe_timeout;
        let mut probes = JoinSet::new();
        for host in (1..=254u8).filter(|&h| h != own) {
            let probe = Arc::clone(&self.probe);
            let ip = Ipv4Addr::new(a, b, c, host);
            probes.spawn(async move {
                let endpoint = Endpoint::new(IpAddr::V4(ip), port);
                probe.is_reachable(endpoint, within).await.then_some(ip)
            });
        }
        debug!(subnet = %format!("{a}.{b}.{c}.0/24"), probes = probes.len(), "scanning subnet");

        let deadline = (Instant::now() + self.config.step_timeout).min(ceiling);
        let mut responders = Vec::new();
        loop {
            match timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok(Some(ip)))) => responders.push(ip),
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(pending = probes.len(), "subnet scan cut short");
                    break;
                }
            }
        }
        probes.abort_all();

        if responders.is_empty() {
            for host in [1u8, 2, 254] {
                if host != own {
                    found.add(Ipv4Addr::new(a, b, c, host), "conventional host address");
                }
            }
        } else {
            responders.sort_unstable();
            for ip in responders {
                found.add(ip, "subnet scan");
            }
        }
    }
}

/// The growing candidate list plus the port every address is paired with.
struct Found {
    list: CandidateList,
    port: u16,
}

impl Found {
    fn new(port: u16) -> Self {
        Self {
            list: CandidateList::new(),
            port,
        }
    }

    fn add(&mut self, ip: Ipv4Addr, source: &str) {
        let endpoint = Endpoint::new(IpAddr::V4(ip), self.port);
        if self.list.push(endpoint) {
            debug!(%endpoint, source, "candidate added");
        }
    }
}
