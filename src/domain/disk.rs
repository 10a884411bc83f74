//! Virtual disk model.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::Deserialize;

/// Declarative disk description from the guest definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskSpec {
    /// Storage pool the backing volume is created in.
    pub pool: String,
    /// Filesystem this disk will hold (ext4, swap). Validated by the disk
    /// preparer, not at parse time, so an unknown value surfaces as
    /// `UnsupportedFilesystem` against the offending disk.
    pub fstype: String,
    /// Target device name in the guest (vda, vdb, ...).
    pub target: String,
    /// Where to mount the disk in the guest; ignored for swap.
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// Capacity in whole gigabytes.
    pub capacity: u64,
}

/// A disk realized for one provisioning run: spec plus alias, numeric index
/// and (after volume creation) the backing image path.
#[derive(Debug, Clone)]
pub struct Disk {
    pub alias: String,
    /// Trailing decimal of the alias. Index 0 is the boot disk and selects
    /// the nbd device slot during preparation.
    pub index: u32,
    pub spec: DiskSpec,
    image: Option<PathBuf>,
}

impl Disk {
    pub fn new(alias: &str, spec: DiskSpec) -> Result<Self> {
        let digits: String = alias
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        if digits.is_empty() {
            bail!("disk alias '{alias}' must end in a decimal index");
        }
        let index: u32 = digits.parse()?;
        Ok(Self {
            alias: alias.to_string(),
            index,
            spec,
            image: None,
        })
    }

    pub fn is_boot(&self) -> bool {
        self.index == 0
    }

    /// Host nbd device this disk's image is attached to during preparation.
    pub fn device(&self) -> String {
        format!("/dev/nbd{}", self.index)
    }

    /// Volume name in the storage pool.
    pub fn volume_name(&self, hostname: &str) -> String {
        format!("{hostname}-{}.qcow2", self.alias)
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.spec.capacity * 1024 * 1024 * 1024
    }

    /// Backing image path, known once the volume exists.
    pub fn image(&self) -> Option<&PathBuf> {
        self.image.as_ref()
    }

    /// One-time back-fill after volume creation.
    pub fn attach_image(&mut self, path: PathBuf) {
        self.image = Some(path);
    }
}
