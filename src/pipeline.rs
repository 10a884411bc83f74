//! The provisioning pipeline: ordered stages from descriptor to running
//! guest.
//!
//! Stage order is fixed. Host resources acquired during disk preparation
//! are tracked in a [`ResourceLedger`] that is released exactly once, on
//! success and on failure alike, before the pipeline returns.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::disks::DiskPreparer;
use crate::domain::Guest;
use crate::hypervisor::{xml, Hypervisor};
use crate::installer::{installer_for, GuestInstaller, TargetContext};
use crate::ledger::ResourceLedger;
use crate::preflight;
use crate::process::Runner;

/// Default mount root for the guest filesystems during installation.
pub const DEFAULT_TARGET_ROOT: &str = "/provision";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Preflight,
    DefineGuest,
    DiskPrep,
    Install,
    NetworkConfig,
    LocaleConfig,
    BootConfig,
    AccessConfig,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::DefineGuest => "define guest",
            Self::DiskPrep => "disk preparation",
            Self::Install => "installation",
            Self::NetworkConfig => "network configuration",
            Self::LocaleConfig => "locale configuration",
            Self::BootConfig => "boot configuration",
            Self::AccessConfig => "access configuration",
        };
        f.write_str(name)
    }
}

/// One provisioning run for one guest.
pub struct ProvisioningPipeline<'a> {
    guest: Guest,
    hypervisor: &'a dyn Hypervisor,
    runner: &'a dyn Runner,
    target_root: PathBuf,
    proxy: Option<String>,
    tool_check: fn(&[(&'static str, &'static str)]) -> Result<()>,
}

impl<'a> ProvisioningPipeline<'a> {
    pub fn new(guest: Guest, hypervisor: &'a dyn Hypervisor, runner: &'a dyn Runner) -> Self {
        Self {
            guest,
            hypervisor,
            runner,
            target_root: PathBuf::from(DEFAULT_TARGET_ROOT),
            proxy: None,
            tool_check: preflight::check_required_tools,
        }
    }

    /// Override the mount root used during installation.
    pub fn target_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_root = path.into();
        self
    }

    /// Package-download proxy as host:port.
    pub fn proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Run the pipeline to completion.
    pub fn run(mut self) -> Result<()> {
        let installer = installer_for(self.guest.flavor);
        info!(
            "provisioning {} guest {}",
            installer.flavor(),
            self.guest.fqdn
        );

        // Disk-backed flavors shell out to the whole partitioning and
        // chroot toolchain; a plain guest only ever needs virsh.
        let tools = if installer.needs_disks() {
            preflight::host_tools(installer.required_tools())
        } else {
            vec![("virsh", "libvirt")]
        };
        (self.tool_check)(&tools).with_context(|| stage_failure(Stage::Preflight))?;

        self.define_guest()
            .with_context(|| stage_failure(Stage::DefineGuest))?;

        if installer.needs_disks() {
            // A leftover target root means another run's filesystems may
            // still be mounted there. Refuse rather than mount over them.
            fs::create_dir(&self.target_root).with_context(|| {
                format!(
                    "target root {} already exists or cannot be created",
                    self.target_root.display()
                )
            })?;

            let mut ledger = ResourceLedger::new();
            let result = self.run_disk_stages(installer.as_ref(), &mut ledger);
            ledger.release_all(self.runner);
            if let Err(err) = fs::remove_dir(&self.target_root) {
                warn!(
                    "could not remove target root {}: {err}",
                    self.target_root.display()
                );
            }
            result?;
        }

        self.hypervisor.set_autostart(&self.guest.fqdn, true)?;
        if installer.needs_disks() {
            self.hypervisor.start(&self.guest.fqdn)?;
        }
        info!("guest {} provisioned", self.guest.fqdn);
        Ok(())
    }

    /// Create backing volumes, define the domain and back-fill the MAC
    /// addresses libvirt generated.
    fn define_guest(&mut self) -> Result<()> {
        info!("define guest {}", self.guest.fqdn);
        for disk in &mut self.guest.disks {
            let path = self.hypervisor.create_volume(
                &disk.spec.pool,
                &disk.volume_name(&self.guest.hostname),
                disk.capacity_bytes(),
            )?;
            disk.attach_image(path);
        }

        let document = xml::domain_xml(&self.guest)?;
        self.hypervisor.define(&document)?;

        // MACs come back in attachment order, which matches the order the
        // interfaces were rendered into the domain document.
        let macs = self.hypervisor.interface_macs(&self.guest.fqdn)?;
        if macs.len() != self.guest.networks.len() {
            bail!(
                "domain reports {} interfaces, definition has {}",
                macs.len(),
                self.guest.networks.len()
            );
        }
        for (network, mac) in self.guest.networks.iter_mut().zip(macs) {
            network.set_mac(mac);
        }
        Ok(())
    }

    fn run_disk_stages(
        &self,
        installer: &dyn GuestInstaller,
        ledger: &mut ResourceLedger,
    ) -> Result<()> {
        let preparer = DiskPreparer::new(self.runner, &self.target_root);
        let uuids = preparer
            .prepare(&self.guest.disks, ledger)
            .with_context(|| stage_failure(Stage::DiskPrep))?;

        let ctx = TargetContext::new(&self.target_root, self.runner, self.proxy.as_deref());
        installer
            .install(&ctx, &self.guest)
            .with_context(|| stage_failure(Stage::Install))?;
        installer
            .configure_network(&ctx, &self.guest)
            .with_context(|| stage_failure(Stage::NetworkConfig))?;
        installer
            .configure_locale(&ctx, &self.guest)
            .with_context(|| stage_failure(Stage::LocaleConfig))?;
        installer
            .configure_boot(&ctx, &self.guest, &uuids)
            .with_context(|| stage_failure(Stage::BootConfig))?;
        installer
            .configure_access(&ctx, &self.guest)
            .with_context(|| stage_failure(Stage::AccessConfig))?;
        Ok(())
    }
}

fn stage_failure(stage: Stage) -> String {
    format!("{stage} stage failed")
}
