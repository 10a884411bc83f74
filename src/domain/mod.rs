//! Guest descriptor model.
//!
//! A [`GuestDescriptor`] is the deserialized guest definition file. It is
//! turned into a [`Guest`] once at pipeline start: aliases are resolved to
//! ordered disk/network lists and the guest flavor is validated. The guest
//! is read-only for the run, except for the one-time MAC and image-path
//! back-fills after the virtual hardware exists.

pub mod disk;
pub mod network;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Deserialize;

pub use disk::{Disk, DiskSpec};
pub use network::{IpConfig, NetworkSpec};

use crate::error::ProvisionError;

/// OS installation strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestFlavor {
    ArchLinux,
    Ubuntu,
    /// Externally prepared disk image; no disk preparation or installation.
    Plain,
}

impl FromStr for GuestFlavor {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archlinux" => Ok(Self::ArchLinux),
            "ubuntu" => Ok(Self::Ubuntu),
            "plain" => Ok(Self::Plain),
            other => Err(ProvisionError::UnsupportedGuestFlavor(other.to_string())),
        }
    }
}

impl fmt::Display for GuestFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ArchLinux => "archlinux",
            Self::Ubuntu => "ubuntu",
            Self::Plain => "plain",
        };
        f.write_str(name)
    }
}

/// One SSH public key from the descriptor's access block.
#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub key: String,
}

/// Access credentials: pre-hashed root password and/or SSH keys by label.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "ssh-keys")]
    pub ssh_keys: BTreeMap<String, SshKey>,
}

/// Deserialized guest definition file.
#[derive(Debug, Deserialize)]
pub struct GuestDescriptor {
    pub fqdn: String,
    pub hostname: String,
    /// Memory in MB.
    pub memory: u64,
    pub vcpu: u32,
    #[serde(rename = "guesttype")]
    pub guest_type: String,
    #[serde(default)]
    pub disks: BTreeMap<String, DiskSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default)]
    pub access: Option<AccessConfig>,
}

/// A validated guest ready for provisioning. Disks and networks are in
/// ascending alias order, so disk index 0 is always prepared first.
#[derive(Debug)]
pub struct Guest {
    pub fqdn: String,
    pub hostname: String,
    pub memory_mb: u64,
    pub vcpu: u32,
    pub flavor: GuestFlavor,
    pub disks: Vec<Disk>,
    pub networks: Vec<NetworkSpec>,
    pub access: Option<AccessConfig>,
}

impl Guest {
    pub fn from_descriptor(descriptor: GuestDescriptor) -> Result<Self> {
        let flavor: GuestFlavor = descriptor.guest_type.parse()?;

        let mut disks = Vec::with_capacity(descriptor.disks.len());
        for (alias, spec) in descriptor.disks {
            disks.push(Disk::new(&alias, spec)?);
        }

        let mut networks = Vec::with_capacity(descriptor.networks.len());
        for (alias, mut spec) in descriptor.networks {
            spec.name = alias;
            networks.push(spec);
        }

        Ok(Self {
            fqdn: descriptor.fqdn,
            hostname: descriptor.hostname,
            memory_mb: descriptor.memory,
            vcpu: descriptor.vcpu,
            flavor,
            disks,
            networks,
            access: descriptor.access,
        })
    }

    /// The designated boot disk (index 0), if any disk carries it.
    pub fn boot_disk(&self) -> Option<&Disk> {
        self.disks.iter().find(|d| d.is_boot())
    }
}
