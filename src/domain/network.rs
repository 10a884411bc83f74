//! Virtual network interface model and per-flavor config rendering.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::Deserialize;

/// Address family block of a [`NetworkSpec`]: optional prefixed address,
/// optional gateway, DNS server list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpConfig {
    #[serde(default)]
    pub address: Option<IpNet>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
}

/// Declarative network interface description.
///
/// The interface name comes from the descriptor's map key; the MAC address
/// is back-filled once by the pipeline after the domain is defined, so the
/// udev naming rule and config files can reference the realized hardware.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSpec {
    #[serde(skip)]
    pub name: String,
    /// Host bridge this interface attaches to.
    pub bridge: String,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub ipv4: Option<IpConfig>,
    #[serde(default)]
    pub ipv6: Option<IpConfig>,
    #[serde(skip)]
    mac: Option<String>,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>, bridge: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: bridge.into(),
            vlan: None,
            ipv4: None,
            ipv6: None,
            mac: None,
        }
    }

    pub fn with_vlan(mut self, vlan: u16) -> Self {
        self.vlan = Some(vlan);
        self
    }

    pub fn with_ipv4(mut self, config: IpConfig) -> Self {
        self.ipv4 = Some(config);
        self
    }

    pub fn with_ipv6(mut self, config: IpConfig) -> Self {
        self.ipv6 = Some(config);
        self
    }

    pub fn ipv4_address(&self) -> Option<&IpNet> {
        self.ipv4.as_ref().and_then(|c| c.address.as_ref())
    }

    pub fn ipv6_address(&self) -> Option<&IpNet> {
        self.ipv6.as_ref().and_then(|c| c.address.as_ref())
    }

    /// Bare IPs of both families, v4 first.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4_address()
            .into_iter()
            .chain(self.ipv6_address())
            .map(|net| net.addr())
            .collect()
    }

    /// DNS servers of both families, in declaration order.
    pub fn dns_servers(&self) -> Vec<IpAddr> {
        let mut servers = Vec::new();
        if let Some(cfg) = &self.ipv4 {
            servers.extend(cfg.dns.iter().copied());
        }
        if let Some(cfg) = &self.ipv6 {
            servers.extend(cfg.dns.iter().copied());
        }
        servers
    }

    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    /// One-time back-fill of the realized MAC address.
    pub fn set_mac(&mut self, mac: String) {
        self.mac = Some(mac);
    }

    /// netctl profile body (ArchLinux), one element per line.
    pub fn netctl_profile(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Description=\"{} network\"", self.name),
            format!("Interface={}", self.name),
            "Connection=ethernet".to_string(),
        ];
        if let Some(address) = self.ipv4_address() {
            lines.push("IP=static".to_string());
            lines.push(format!("Address=('{address}')"));
            if let Some(gateway) = self.ipv4.as_ref().and_then(|c| c.gateway) {
                lines.push(format!("Gateway='{gateway}'"));
            }
        } else {
            lines.push("IP=no".to_string());
        }
        if let Some(address) = self.ipv6_address() {
            lines.push("IP6=static".to_string());
            lines.push(format!("Address6=('{address}')"));
            if let Some(gateway) = self.ipv6.as_ref().and_then(|c| c.gateway) {
                lines.push(format!("Gateway6='{gateway}'"));
            }
        } else {
            lines.push("IP6=no".to_string());
        }
        let dns = self.dns_servers();
        if !dns.is_empty() {
            let quoted: Vec<String> = dns.iter().map(|s| format!("'{s}'")).collect();
            lines.push(format!("DNS=({})", quoted.join(" ")));
        }
        lines
    }

    /// /etc/network/interfaces.d stanza (Ubuntu), one element per line.
    pub fn eni_stanza(&self) -> Vec<String> {
        let mut lines = vec![format!("auto {}", self.name)];
        match self.ipv4_address() {
            Some(address) => {
                lines.push(format!("iface {} inet static", self.name));
                lines.push(format!("    address {address}"));
                if let Some(gateway) = self.ipv4.as_ref().and_then(|c| c.gateway) {
                    lines.push(format!("    gateway {gateway}"));
                }
            }
            None => lines.push(format!("iface {} inet manual", self.name)),
        }
        if let Some(address) = self.ipv6_address() {
            lines.push(format!("iface {} inet6 static", self.name));
            lines.push(format!("    address {address}"));
            if let Some(gateway) = self.ipv6.as_ref().and_then(|c| c.gateway) {
                lines.push(format!("    gateway {gateway}"));
            }
        }
        let dns = self.dns_servers();
        if !dns.is_empty() {
            let servers: Vec<String> = dns.iter().map(ToString::to_string).collect();
            lines.push(format!("    dns-nameservers {}", servers.join(" ")));
        }
        lines
    }

    /// udev rule pinning the flavor-native name to the realized MAC, so the
    /// name survives reboot regardless of enumeration order.
    pub fn udev_rule(&self) -> Option<String> {
        self.mac().map(|mac| {
            format!(
                "SUBSYSTEM==\"net\", ACTION==\"add\", ATTR{{address}}==\"{mac}\", NAME=\"{}\"",
                self.name
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_v4(name: &str) -> NetworkSpec {
        NetworkSpec {
            name: name.to_string(),
            bridge: "br0".to_string(),
            vlan: Some(100),
            ipv4: Some(IpConfig {
                address: Some("10.0.0.5/24".parse().unwrap()),
                gateway: Some("10.0.0.1".parse().unwrap()),
                dns: vec!["10.0.0.53".parse().unwrap()],
            }),
            ipv6: None,
            mac: None,
        }
    }

    fn unaddressed(name: &str) -> NetworkSpec {
        NetworkSpec {
            name: name.to_string(),
            bridge: "br1".to_string(),
            vlan: None,
            ipv4: None,
            ipv6: None,
            mac: None,
        }
    }

    #[test]
    fn netctl_profile_static_ipv4() {
        let net = static_v4("eth0");
        let profile = net.netctl_profile();
        assert_eq!(profile[0], "Description=\"eth0 network\"");
        assert!(profile.contains(&"IP=static".to_string()));
        assert!(profile.contains(&"Address=('10.0.0.5/24')".to_string()));
        assert!(profile.contains(&"Gateway='10.0.0.1'".to_string()));
        assert!(profile.contains(&"IP6=no".to_string()));
        assert!(profile.contains(&"DNS=('10.0.0.53')".to_string()));
    }

    #[test]
    fn netctl_profile_without_addressing() {
        let profile = unaddressed("eth1").netctl_profile();
        assert!(profile.contains(&"IP=no".to_string()));
        assert!(profile.contains(&"IP6=no".to_string()));
        assert!(!profile.iter().any(|l| l.starts_with("DNS=")));
    }

    #[test]
    fn eni_stanza_static_ipv4() {
        let stanza = static_v4("eth0").eni_stanza();
        assert_eq!(stanza[0], "auto eth0");
        assert_eq!(stanza[1], "iface eth0 inet static");
        assert!(stanza.contains(&"    address 10.0.0.5/24".to_string()));
        assert!(stanza.contains(&"    gateway 10.0.0.1".to_string()));
        assert!(stanza.contains(&"    dns-nameservers 10.0.0.53".to_string()));
    }

    #[test]
    fn eni_stanza_without_addressing_is_manual() {
        let stanza = unaddressed("eth1").eni_stanza();
        assert_eq!(stanza[1], "iface eth1 inet manual");
    }

    #[test]
    fn udev_rule_requires_a_realized_mac() {
        let mut net = static_v4("eth0");
        assert!(net.udev_rule().is_none());
        net.set_mac("52:54:00:aa:bb:cc".to_string());
        assert_eq!(
            net.udev_rule().unwrap(),
            "SUBSYSTEM==\"net\", ACTION==\"add\", \
             ATTR{address}==\"52:54:00:aa:bb:cc\", NAME=\"eth0\""
        );
    }

    #[test]
    fn addresses_lists_bare_ips() {
        let net = static_v4("eth0");
        assert_eq!(net.addresses(), vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
        assert!(unaddressed("eth1").addresses().is_empty());
    }
}
