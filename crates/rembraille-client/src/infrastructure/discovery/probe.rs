//! Sources of network facts for host discovery.
//!
//! [`NetworkProbe`] is the seam between the discovery cascade and the
//! operating system.  [`SystemProbe`] reads `/proc` and DMI files where they
//! exist and otherwise falls back to the usual command-line tools (`ip`,
//! `route`, `ipconfig`, `arp`, `systeminfo`).  Parsing is done by the pure
//! `parse_*` functions so it can be tested without the tools installed.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use rembraille_core::Endpoint;
use tokio::net::{TcpStream, UdpSocket};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::vendors::{Hypervisor, MacAddr};

/// One entry of the ARP / neighbour table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

/// Network facts the discovery cascade needs.
///
/// Implementations must not hang: the cascade bounds each call with a
/// timeout, but a call that ignores cancellation would still hold a task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkProbe: Send + Sync + 'static {
    /// Default gateway of the active interface.
    async fn default_gateway(&self) -> Option<Ipv4Addr>;

    /// The hypervisor this guest runs under, if recognisable.
    async fn hypervisor(&self) -> Option<Hypervisor>;

    /// Current ARP / neighbour table.
    async fn neighbors(&self) -> Vec<Neighbor>;

    /// The guest's own address on the interface that routes outward.
    async fn local_address(&self) -> Option<Ipv4Addr>;

    /// Whether something accepts TCP connections at `endpoint` within `within`.
    async fn is_reachable(&self, endpoint: Endpoint, within: Duration) -> bool;
}

/// Probe backed by the running operating system.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    /// Upper bound for any single external command.
    pub command_timeout: Duration,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
        }
    }
}

impl SystemProbe {
    /// Runs `program args…` and returns its stdout, or `None` if it is missing,
    /// fails or overruns.
    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        match timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                Some(String::from_utf8_lossy(&out.stdout).into_owned())
            }
            Ok(Ok(out)) => {
                debug!(program, status = %out.status, "probe command failed");
                None
            }
            Ok(Err(e)) => {
                trace!(program, "probe command unavailable: {e}");
                None
            }
            Err(_) => {
                debug!(program, "probe command timed out");
                None
            }
        }
    }
}

#[async_trait]
impl NetworkProbe for SystemProbe {
    async fn default_gateway(&self) -> Option<Ipv4Addr> {
        if cfg!(windows) {
            return self.run("ipconfig", &[]).await.as_deref().and_then(parse_ipconfig_gateway);
        }
        if let Ok(table) = tokio::fs::read_to_string("/proc/net/route").await {
            if let Some(gw) = parse_proc_net_route(&table) {
                return Some(gw);
            }
        }
        if let Some(gw) = self
            .run("ip", &["route", "show", "default"])
            .await
            .as_deref()
            .and_then(parse_ip_route_default)
        {
            return Some(gw);
        }
        self.run("route", &["-n", "get", "default"])
            .await
            .as_deref()
            .and_then(parse_route_get_gateway)
    }

    async fn hypervisor(&self) -> Option<Hypervisor> {
        if cfg!(windows) {
            return self.run("systeminfo", &[]).await.as_deref().and_then(Hypervisor::detect);
        }
        let mut dmi = String::new();
        for file in ["product_name", "sys_vendor"] {
            if let Ok(text) = tokio::fs::read_to_string(format!("/sys/class/dmi/id/{file}")).await {
                dmi.push_str(&text);
                dmi.push('\n');
            }
        }
        Hypervisor::detect(&dmi)
    }

    async fn neighbors(&self) -> Vec<Neighbor> {
        if let Ok(table) = tokio::fs::read_to_string("/proc/net/arp").await {
            return parse_proc_net_arp(&table);
        }
        self.run("arp", &["-a"])
            .await
            .map(|out| parse_arp_listing(&out))
            .unwrap_or_default()
    }

    async fn local_address(&self) -> Option<Ipv4Addr> {
        // Connecting a UDP socket selects the outbound interface without
        // sending anything.
        let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
        socket.connect("8.8.8.8:80").await.ok()?;
        match socket.local_addr().ok()? {
            SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
            _ => None,
        }
    }

    async fn is_reachable(&self, endpoint: Endpoint, within: Duration) -> bool {
        matches!(
            timeout(within, TcpStream::connect(endpoint.socket_addr())).await,
            Ok(Ok(_))
        )
    }
}

// ── Parsers ───────────────────────────────────────────────────────────────────

fn usable_gateway(ip: Ipv4Addr) -> bool {
    !ip.is_unspecified() && !ip.is_loopback() && ip.octets()[0] != 0
}

/// Parses Linux `/proc/net/route`; gateways are little-endian hex.
pub fn parse_proc_net_route(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        let ip = Ipv4Addr::from(raw.to_le_bytes());
        usable_gateway(ip).then_some(ip)
    })
}

/// Parses `ip route show default`: `default via 10.0.2.2 dev eth0 …`.
pub fn parse_ip_route_default(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        if words.next()? != "default" || words.next()? != "via" {
            return None;
        }
        words.next()?.parse().ok().filter(|ip| usable_gateway(*ip))
    })
}

/// Parses BSD / macOS `route -n get default`: `    gateway: 10.0.2.2`.
pub fn parse_route_get_gateway(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("gateway:")?;
        value.trim().parse().ok().filter(|ip| usable_gateway(*ip))
    })
}

/// Parses Windows `ipconfig`.  The IPv4 gateway may sit on the line after an
/// IPv6 one, so continuation lines are scanned too.
pub fn parse_ipconfig_gateway(output: &str) -> Option<Ipv4Addr> {
    let mut in_gateway = false;
    for line in output.lines() {
        if line.to_ascii_lowercase().contains("default gateway") {
            in_gateway = true;
        } else if in_gateway && line.contains(" : ") {
            // Next "Key . . . : value" entry; the gateway block is over.
            in_gateway = false;
        }
        if !in_gateway {
            continue;
        }
        let value = line.rsplit(':').next().unwrap_or_default().trim();
        if let Ok(ip) = value.parse::<Ipv4Addr>() {
            if usable_gateway(ip) {
                return Some(ip);
            }
        }
    }
    None
}

/// Parses Linux `/proc/net/arp`, skipping incomplete entries.
pub fn parse_proc_net_arp(table: &str) -> Vec<Neighbor> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 || fields[2] == "0x0" {
                return None;
            }
            let ip = fields[0].parse().ok()?;
            let mac: MacAddr = fields[3].parse().ok()?;
            (mac.0 != [0; 6]).then_some(Neighbor { ip, mac })
        })
        .collect()
}

/// Parses `arp -a` in both the Unix (`? (10.0.2.2) at 52:54:00:…`) and the
/// Windows (`  10.0.2.2   52-54-00-…   dynamic`) layouts.
pub fn parse_arp_listing(output: &str) -> Vec<Neighbor> {
    output
        .lines()
        .filter_map(|line| {
            let words = line
                .split_whitespace()
                .map(|w| w.trim_matches(|c| c == '(' || c == ')'));
            let mut ip = None;
            let mut mac = None;
            for word in words {
                if ip.is_none() {
                    ip = word.parse::<Ipv4Addr>().ok();
                } else if mac.is_none() {
                    mac = word.parse::<MacAddr>().ok();
                }
            }
            let (ip, mac) = (ip?, mac?);
            (mac.0 != [0xFF; 6] && mac.0 != [0; 6]).then_some(Neighbor { ip, mac })
        })
        .collect()
}
