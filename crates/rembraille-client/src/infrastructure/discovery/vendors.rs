//! Fixed hypervisor tables: vendor detection, well-known host addresses and
//! host-adapter MAC prefixes.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Virtualisation products the guest may be running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hypervisor {
    VirtualBox,
    VMware,
    Parallels,
    HyperV,
    Qemu,
}

const VIRTUALBOX_HOSTS: &[Ipv4Addr] = &[Ipv4Addr::new(10, 0, 2, 2), Ipv4Addr::new(192, 168, 56, 1)];
const VMWARE_HOSTS: &[Ipv4Addr] = &[
    Ipv4Addr::new(192, 168, 142, 1),
    Ipv4Addr::new(192, 168, 91, 1),
    Ipv4Addr::new(172, 16, 0, 1),
];
const PARALLELS_HOSTS: &[Ipv4Addr] = &[Ipv4Addr::new(10, 211, 55, 2)];
const HYPERV_HOSTS: &[Ipv4Addr] = &[Ipv4Addr::new(192, 168, 137, 1)];
const QEMU_HOSTS: &[Ipv4Addr] = &[Ipv4Addr::new(10, 0, 2, 2), Ipv4Addr::new(192, 168, 122, 1)];

impl Hypervisor {
    /// Addresses where this product's host usually answers, most likely first.
    pub fn suggested_hosts(self) -> &'static [Ipv4Addr] {
        match self {
            Hypervisor::VirtualBox => VIRTUALBOX_HOSTS,
            Hypervisor::VMware => VMWARE_HOSTS,
            Hypervisor::Parallels => PARALLELS_HOSTS,
            Hypervisor::HyperV => HYPERV_HOSTS,
            Hypervisor::Qemu => QEMU_HOSTS,
        }
    }

    /// Identifies the hypervisor from free text such as DMI product and
    /// vendor strings or `systeminfo` output.
    pub fn detect(text: &str) -> Option<Self> {
        let text = text.to_ascii_lowercase();
        if text.contains("vmware") {
            Some(Hypervisor::VMware)
        } else if text.contains("virtualbox") || text.contains("vbox") || text.contains("innotek") {
            Some(Hypervisor::VirtualBox)
        } else if text.contains("parallels") {
            Some(Hypervisor::Parallels)
        } else if text.contains("qemu") || text.contains("kvm") {
            Some(Hypervisor::Qemu)
        } else if text.contains("hyper-v") || text.contains("virtual machine") {
            // Hyper-V guests report "Microsoft Corporation / Virtual Machine".
            Some(Hypervisor::HyperV)
        } else {
            None
        }
    }
}

impl fmt::Display for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hypervisor::VirtualBox => "VirtualBox",
            Hypervisor::VMware => "VMware",
            Hypervisor::Parallels => "Parallels",
            Hypervisor::HyperV => "Hyper-V",
            Hypervisor::Qemu => "QEMU/KVM",
        };
        f.write_str(name)
    }
}

/// Organisationally unique identifiers used by hypervisor host adapters.
const HOST_ADAPTER_OUIS: &[([u8; 3], Hypervisor)] = &[
    ([0x00, 0x50, 0x56], Hypervisor::VMware),
    ([0x00, 0x0C, 0x29], Hypervisor::VMware),
    ([0x00, 0x05, 0x69], Hypervisor::VMware),
    ([0x00, 0x1C, 0x14], Hypervisor::VMware),
    ([0x0A, 0x00, 0x27], Hypervisor::VirtualBox),
    ([0x08, 0x00, 0x27], Hypervisor::VirtualBox),
    ([0x00, 0x1C, 0x42], Hypervisor::Parallels),
    ([0x00, 0x15, 0x5D], Hypervisor::HyperV),
    ([0x52, 0x54, 0x00], Hypervisor::Qemu),
];

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// The hypervisor whose host adapter carries this address, if any.
    pub fn hypervisor_vendor(&self) -> Option<Hypervisor> {
        let oui = self.oui();
        HOST_ADAPTER_OUIS
            .iter()
            .find(|(prefix, _)| *prefix == oui)
            .map(|&(_, vendor)| vendor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts `aa:bb:cc:dd:ee:ff` (Unix) and `aa-bb-cc-dd-ee-ff` (Windows).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(err)?;
            if part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(MacAddr(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parses_both_separator_styles() {
        let unix: MacAddr = "08:00:27:ab:cd:ef".parse().unwrap();
        let windows: MacAddr = "08-00-27-AB-CD-EF".parse().unwrap();
        assert_eq!(unix, windows);
        assert_eq!(unix.to_string(), "08:00:27:ab:cd:ef");
    }

    #[test]
    fn test_mac_rejects_incomplete_and_garbage() {
        assert!("08:00:27".parse::<MacAddr>().is_err());
        assert!("08:00:27:ab:cd:ef:01".parse::<MacAddr>().is_err());
        assert!("(incomplete)".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_oui_lookup_identifies_host_adapters() {
        let vmnet: MacAddr = "00:50:56:c0:00:08".parse().unwrap();
        let vbox: MacAddr = "0a:00:27:00:00:00".parse().unwrap();
        let intel: MacAddr = "3c:22:fb:01:02:03".parse().unwrap();
        assert_eq!(vmnet.hypervisor_vendor(), Some(Hypervisor::VMware));
        assert_eq!(vbox.hypervisor_vendor(), Some(Hypervisor::VirtualBox));
        assert_eq!(intel.hypervisor_vendor(), None);
    }

    #[test]
    fn test_detect_from_dmi_strings() {
        assert_eq!(Hypervisor::detect("VirtualBox\ninnotek GmbH"), Some(Hypervisor::VirtualBox));
        assert_eq!(
            Hypervisor::detect("VMware Virtual Platform"),
            Some(Hypervisor::VMware)
        );
        assert_eq!(
            Hypervisor::detect("Standard PC (Q35 + ICH9, 2009)\nQEMU"),
            Some(Hypervisor::Qemu)
        );
        assert_eq!(
            Hypervisor::detect("Virtual Machine\nMicrosoft Corporation"),
            Some(Hypervisor::HyperV)
        );
        assert_eq!(Hypervisor::detect("ThinkPad X1 Carbon\nLENOVO"), None);
    }

    #[test]
    fn test_virtualbox_suggestions_start_with_nat_gateway() {
        assert_eq!(
            Hypervisor::VirtualBox.suggested_hosts().first(),
            Some(&Ipv4Addr::new(10, 0, 2, 2))
        );
    }

    #[test]
    fn test_every_hypervisor_has_suggested_hosts() {
        let all = [
            Hypervisor::VirtualBox,
            Hypervisor::VMware,
            Hypervisor::Parallels,
            Hypervisor::HyperV,
            Hypervisor::Qemu,
        ];
        for hypervisor in all {
            assert!(!hypervisor.suggested_hosts().is_empty(), "{hypervisor}");
        }
        assert_eq!(
            Hypervisor::VMware.suggested_hosts(),
            &[
                Ipv4Addr::new(192, 168, 142, 1),
                Ipv4Addr::new(192, 168, 91, 1),
                Ipv4Addr::new(172, 16, 0, 1),
            ]
        );
        assert_eq!(
            Hypervisor::Qemu.suggested_hosts().last(),
            Some(&Ipv4Addr::new(192, 168, 122, 1))
        );
    }
}
