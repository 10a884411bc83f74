//! Guest installers: the flavor-specific half of the pipeline.
//!
//! Each flavor implements the same five ordered capabilities (install,
//! network, locale, boot+fstab, access) against a mounted target root. The
//! pipeline only ever holds the [`GuestInstaller`] trait; flavor selection
//! happens once in [`installer_for`].

pub mod archlinux;
pub mod plain;
pub mod ubuntu;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::disks::UuidMap;
use crate::domain::{Guest, GuestFlavor};
use crate::process::{Cmd, Runner};

/// PATH handed to chroot-executed commands; the target's own PATH cannot be
/// trusted while it is still being populated.
pub const CHROOT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Execution context for installer steps: the mounted target root, the
/// command runner and an optional package-download proxy.
pub struct TargetContext<'a> {
    root: &'a Path,
    runner: &'a dyn Runner,
    proxy: Option<&'a str>,
}

impl<'a> TargetContext<'a> {
    pub fn new(root: &'a Path, runner: &'a dyn Runner, proxy: Option<&'a str>) -> Self {
        Self {
            root,
            runner,
            proxy,
        }
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Absolute host path for an in-guest path.
    pub fn target_path(&self, guest_path: &str) -> PathBuf {
        self.root.join(guest_path.trim_start_matches('/'))
    }

    /// Run a command on the host. Proxy variables are exported when a proxy
    /// is configured, so bootstrap tools pick them up.
    pub fn run<I, S>(&self, argv: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Cmd::from_argv(argv.into_iter().map(Into::into).collect());
        if let Some(proxy) = self.proxy {
            cmd = cmd
                .env("http_proxy", format!("http://{proxy}"))
                .env("ftp_proxy", format!("http://{proxy}"));
        }
        self.runner.run(&cmd)
    }

    /// Run a command inside the target root via arch-chroot.
    pub fn run_chroot<I, S>(&self, argv: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_chroot_env(argv, &[])
    }

    /// Run a command inside the target root with extra environment
    /// variables (e.g. DEBIAN_FRONTEND for apt).
    pub fn run_chroot_env<I, S>(&self, argv: I, extra_env: &[(&str, &str)]) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = Cmd::new("arch-chroot")
            .arg_path(self.root)
            .args(argv.into_iter().map(Into::into))
            .path_override(CHROOT_PATH);
        for (key, value) in extra_env {
            cmd = cmd.env(*key, *value);
        }
        self.runner.run(&cmd)
    }

    /// Write a file in the guest, one line per element, trailing newline.
    pub fn write_file(&self, guest_path: &str, lines: &[String]) -> Result<()> {
        self.put_file(guest_path, lines, false)
    }

    /// Append to a file in the guest, creating it if missing.
    pub fn append_file(&self, guest_path: &str, lines: &[String]) -> Result<()> {
        self.put_file(guest_path, lines, true)
    }

    fn put_file(&self, guest_path: &str, lines: &[String], append: bool) -> Result<()> {
        let path = self.target_path(guest_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut content = lines.join("\n");
        content.push('\n');
        if append {
            use std::io::Write;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("appending to {}", path.display()))?;
        } else {
            fs::write(&path, content)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    pub fn create_dir(&self, guest_path: &str) -> Result<()> {
        let path = self.target_path(guest_path);
        fs::create_dir_all(&path).with_context(|| format!("creating {}", path.display()))
    }

    #[cfg(unix)]
    pub fn chmod_file(&self, guest_path: &str, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let path = self.target_path(guest_path);
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("chmod {}", path.display()))
    }

    pub fn remove_file(&self, guest_path: &str) -> Result<()> {
        let path = self.target_path(guest_path);
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))
    }
}

/// The fixed capability interface every guest flavor implements.
pub trait GuestInstaller {
    fn flavor(&self) -> GuestFlavor;

    /// Whether this flavor needs disk preparation and a target root at all.
    fn needs_disks(&self) -> bool {
        true
    }

    /// Flavor-specific host tools, as (tool, package) pairs for preflight.
    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Base OS bootstrap into the target root.
    fn install(&self, ctx: &TargetContext, guest: &Guest) -> Result<()>;

    /// Per-interface config files, udev naming rules, hostname and hosts.
    fn configure_network(&self, ctx: &TargetContext, guest: &Guest) -> Result<()>;

    /// Locale generation and selection.
    fn configure_locale(&self, ctx: &TargetContext, guest: &Guest) -> Result<()>;

    /// fstab entries plus bootloader installation and configuration.
    fn configure_boot(&self, ctx: &TargetContext, guest: &Guest, uuids: &UuidMap) -> Result<()>;

    /// SSH service, serial console, root password and authorized keys.
    fn configure_access(&self, ctx: &TargetContext, guest: &Guest) -> Result<()>;
}

/// Select the installer for a validated flavor.
pub fn installer_for(flavor: GuestFlavor) -> Box<dyn GuestInstaller> {
    match flavor {
        GuestFlavor::ArchLinux => Box::new(archlinux::ArchLinuxInstaller),
        GuestFlavor::Ubuntu => Box::new(ubuntu::UbuntuInstaller),
        GuestFlavor::Plain => Box::new(plain::PlainInstaller),
    }
}

/// fstab lines for the prepared filesystems: ext4 entries first in
/// ascending mountpoint order with fsck pass numbers counting up from 1,
/// then swap entries with pass 0. Deterministic for a fixed [`UuidMap`].
pub fn fstab_lines(uuids: &UuidMap) -> Vec<String> {
    let mut lines = Vec::new();
    let mut fsck = 0;
    for (mountpoint, uuid) in uuids.ext4() {
        fsck += 1;
        lines.push(format!(
            "UUID={uuid} {mountpoint} ext4 rw,relatime,data=ordered 0 {fsck}"
        ));
    }
    for uuid in uuids.swap() {
        lines.push(format!("UUID={uuid} none swap defaults 0 0"));
    }
    lines
}

pub(crate) fn append_fstab(ctx: &TargetContext, uuids: &UuidMap) -> Result<()> {
    ctx.append_file("/etc/fstab", &fstab_lines(uuids))
}

pub(crate) fn write_hostname(ctx: &TargetContext, guest: &Guest) -> Result<()> {
    ctx.write_file("/etc/hostname", &[guest.hostname.clone()])
}

/// Loopback entries plus one line per realized address pointing at the
/// guest's FQDN and hostname.
pub(crate) fn write_hosts(ctx: &TargetContext, guest: &Guest) -> Result<()> {
    let mut entries = vec![
        "127.0.0.1 localhost.localdomain localhost".to_string(),
        "::1 localhost.localdomain localhost".to_string(),
    ];
    for network in &guest.networks {
        for address in network.addresses() {
            entries.push(format!("{address} {} {}", guest.fqdn, guest.hostname));
        }
    }
    ctx.write_file("/etc/hosts", &entries)
}

/// MAC-to-name rules for every interface that realized a MAC address.
pub(crate) fn write_udev_rules(ctx: &TargetContext, guest: &Guest) -> Result<()> {
    let rules: Vec<String> = guest
        .networks
        .iter()
        .filter_map(|n| n.udev_rule())
        .collect();
    ctx.write_file("/etc/udev/rules.d/10-network.rules", &rules)
}

/// Root password and authorized_keys from the descriptor's access block.
pub(crate) fn configure_root_access(ctx: &TargetContext, guest: &Guest) -> Result<()> {
    let Some(access) = &guest.access else {
        return Ok(());
    };
    if let Some(password) = &access.password {
        ctx.run_chroot(["usermod", "-p", password.as_str(), "root"])?;
    }
    if !access.ssh_keys.is_empty() {
        let lines: Vec<String> = access
            .ssh_keys
            .iter()
            .map(|(label, key)| format!("{} {} {label}", key.key_type, key.key))
            .collect();
        ctx.create_dir("/root/.ssh")?;
        ctx.write_file("/root/.ssh/authorized_keys", &lines)?;
    }
    Ok(())
}

/// Rewrite the generated grub entry's root= parameter to the root UUID.
/// grub-mkconfig cannot see the UUID through the nbd device, so the
/// substitution is mandatory.
pub(crate) fn rewrite_grub_root(ctx: &TargetContext, sed_expr: &str) -> Result<()> {
    let grub_cfg = ctx.target_path("/boot/grub/grub.cfg");
    ctx.run([
        "sed".to_string(),
        "-i".to_string(),
        "-e".to_string(),
        sed_expr.to_string(),
        grub_cfg.to_string_lossy().into_owned(),
    ])
}
