//! Hypervisor control plane.
//!
//! The pipeline drives the hypervisor through the [`Hypervisor`] trait;
//! [`VirshHypervisor`] implements it by shelling out to `virsh`, which keeps
//! the privileged libvirt surface identical to what an operator would type
//! by hand.

pub mod xml;

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;

use crate::process::{Cmd, Runner};

pub trait Hypervisor {
    /// Create a qcow2 volume in `pool` and return its backing file path.
    fn create_volume(&self, pool: &str, name: &str, capacity_bytes: u64) -> Result<PathBuf>;

    /// Define a persistent domain from a complete domain document.
    fn define(&self, xml: &str) -> Result<()>;

    /// MAC addresses of the domain's interfaces, in attachment order. Order
    /// matters: callers match them positionally against the interfaces they
    /// defined the domain with.
    fn interface_macs(&self, domain: &str) -> Result<Vec<String>>;

    fn set_autostart(&self, domain: &str, enabled: bool) -> Result<()>;

    fn start(&self, domain: &str) -> Result<()>;

    /// Forcibly stop a running domain.
    fn destroy(&self, domain: &str) -> Result<()>;
}

/// Drives libvirt through the `virsh` command line tool.
pub struct VirshHypervisor<'a> {
    runner: &'a dyn Runner,
    /// Optional libvirt connection URI (`virsh -c`).
    connect: Option<String>,
}

impl<'a> VirshHypervisor<'a> {
    pub fn new(runner: &'a dyn Runner, connect: Option<String>) -> Self {
        Self { runner, connect }
    }

    fn virsh(&self) -> Cmd {
        let mut cmd = Cmd::new("virsh");
        if let Some(uri) = &self.connect {
            cmd = cmd.args(["-c", uri.as_str()]);
        }
        cmd
    }
}

impl Hypervisor for VirshHypervisor<'_> {
    fn create_volume(&self, pool: &str, name: &str, capacity_bytes: u64) -> Result<PathBuf> {
        debug!("create volume {name} in pool {pool}");
        let capacity = capacity_bytes.to_string();
        self.runner.run(&self.virsh().args([
            "vol-create-as",
            "--pool",
            pool,
            "--name",
            name,
            "--capacity",
            capacity.as_str(),
            "--format",
            "qcow2",
            "--prealloc-metadata",
        ]))?;
        let path = self
            .runner
            .run_capture(&self.virsh().args(["vol-path", "--pool", pool, name]))?;
        let path = path.trim();
        if path.is_empty() {
            anyhow::bail!("virsh returned no path for volume '{name}' in pool '{pool}'");
        }
        Ok(PathBuf::from(path))
    }

    fn define(&self, xml: &str) -> Result<()> {
        // virsh define only takes a file, so the document goes through a
        // scratch file that is removed again on success.
        let path = std::env::temp_dir().join(format!("guestforge-domain-{}.xml", std::process::id()));
        std::fs::write(&path, xml)
            .with_context(|| format!("writing domain document to {}", path.display()))?;
        let result = self.runner.run(&self.virsh().arg("define").arg_path(&path));
        let _ = std::fs::remove_file(&path);
        result
    }

    fn interface_macs(&self, domain: &str) -> Result<Vec<String>> {
        let output = self
            .runner
            .run_capture(&self.virsh().args(["domiflist", domain]))?;
        // Table output; the MAC is the only 17-character token with five
        // colon separators on each interface row.
        let macs: Vec<String> = output
            .lines()
            .flat_map(|line| line.split_whitespace())
            .filter(|token| token.len() == 17 && token.matches(':').count() == 5)
            .map(str::to_string)
            .collect();
        Ok(macs)
    }

    fn set_autostart(&self, domain: &str, enabled: bool) -> Result<()> {
        let mut cmd = self.virsh().args(["autostart", domain]);
        if !enabled {
            cmd = cmd.arg("--disable");
        }
        self.runner.run(&cmd)
    }

    fn start(&self, domain: &str) -> Result<()> {
        self.runner.run(&self.virsh().args(["start", domain]))
    }

    fn destroy(&self, domain: &str) -> Result<()> {
        self.runner.run(&self.virsh().args(["destroy", domain]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;

    #[test]
    fn create_volume_issues_vol_create_and_returns_vol_path() {
        let runner = RecordingRunner::new();
        runner.on("vol-path", "/var/lib/libvirt/images/web1-disk0.qcow2\n");
        let hv = VirshHypervisor::new(&runner, None);

        let path = hv
            .create_volume("default", "web1-disk0.qcow2", 10737418240)
            .unwrap();

        assert_eq!(
            path,
            PathBuf::from("/var/lib/libvirt/images/web1-disk0.qcow2")
        );
        let joined = runner.joined_calls();
        assert_eq!(
            joined[0],
            "virsh vol-create-as --pool default --name web1-disk0.qcow2 \
             --capacity 10737418240 --format qcow2 --prealloc-metadata"
        );
        assert_eq!(joined[1], "virsh vol-path --pool default web1-disk0.qcow2");
    }

    #[test]
    fn connection_uri_is_passed_to_every_invocation() {
        let runner = RecordingRunner::new();
        let hv = VirshHypervisor::new(&runner, Some("qemu:///system".to_string()));

        hv.start("web1.example.com").unwrap();
        hv.set_autostart("web1.example.com", true).unwrap();
        hv.destroy("web1.example.com").unwrap();

        let joined = runner.joined_calls();
        assert_eq!(joined[0], "virsh -c qemu:///system start web1.example.com");
        assert_eq!(
            joined[1],
            "virsh -c qemu:///system autostart web1.example.com"
        );
        assert_eq!(joined[2], "virsh -c qemu:///system destroy web1.example.com");
    }

    #[test]
    fn autostart_disable_appends_the_flag() {
        let runner = RecordingRunner::new();
        let hv = VirshHypervisor::new(&runner, None);

        hv.set_autostart("web1", false).unwrap();

        assert_eq!(
            runner.joined_calls()[0],
            "virsh autostart web1 --disable"
        );
    }

    #[test]
    fn interface_macs_are_parsed_from_domiflist_in_row_order() {
        let runner = RecordingRunner::new();
        runner.on(
            "domiflist",
            " Interface   Type     Source   Model    MAC\n\
             -------------------------------------------------------\n\
             vnet0       bridge   br0      virtio   52:54:00:aa:bb:cc\n\
             vnet1       bridge   br1      virtio   52:54:00:dd:ee:ff\n",
        );
        let hv = VirshHypervisor::new(&runner, None);

        let macs = hv.interface_macs("web1.example.com").unwrap();

        assert_eq!(macs, vec!["52:54:00:aa:bb:cc", "52:54:00:dd:ee:ff"]);
    }

    #[test]
    fn define_writes_a_scratch_file_and_cleans_it_up() {
        let runner = RecordingRunner::new();
        let hv = VirshHypervisor::new(&runner, None);

        hv.define("<domain type='kvm'/>").unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0][0], "virsh");
        assert_eq!(calls[0][1], "define");
        assert!(!std::path::Path::new(&calls[0][2]).exists());
    }
}
