//! Ubuntu guest installer.
//!
//! Package installation runs inside the chroot, where started services
//! would leak onto the host; apt operations are wrapped in a temporary
//! policy-rc.d script that vetoes every service start.

use anyhow::{Context, Result};
use log::info;

use super::{GuestInstaller, TargetContext};
use crate::disks::UuidMap;
use crate::domain::{Guest, GuestFlavor};

/// Distribution release debootstrap installs.
const SUITE: &str = "xenial";
/// Package mirror debootstrap downloads from.
const MIRROR: &str = "http://ch.archive.ubuntu.com/ubuntu/";

const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

pub struct UbuntuInstaller;

impl GuestInstaller for UbuntuInstaller {
    fn flavor(&self) -> GuestFlavor {
        GuestFlavor::Ubuntu
    }

    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[("debootstrap", "debootstrap")]
    }

    fn install(&self, ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        info!("do ubuntu installation");
        ctx.run([
            "debootstrap".to_string(),
            SUITE.to_string(),
            ctx.root().to_string_lossy().into_owned(),
            MIRROR.to_string(),
        ])
    }

    fn configure_network(&self, ctx: &TargetContext, guest: &Guest) -> Result<()> {
        info!("setup guest networking");
        let mut dns_lines = Vec::new();
        for network in &guest.networks {
            ctx.write_file(
                &format!("/etc/network/interfaces.d/{}", network.name),
                &network.eni_stanza(),
            )?;
            for server in network.dns_servers() {
                dns_lines.push(format!("nameserver {server}"));
            }
        }
        super::write_udev_rules(ctx, guest)?;
        super::write_hostname(ctx, guest)?;
        super::write_hosts(ctx, guest)?;
        if !dns_lines.is_empty() {
            ctx.write_file("/etc/resolvconf/resolv.conf.d/original", &dns_lines)?;
            ctx.write_file("/etc/resolvconf/resolv.conf.d/tail", &dns_lines)?;
        }
        Ok(())
    }

    fn configure_locale(&self, _ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        // The debootstrapped default locale is acceptable.
        Ok(())
    }

    fn configure_boot(&self, ctx: &TargetContext, guest: &Guest, uuids: &UuidMap) -> Result<()> {
        info!("setup boot configuration");
        super::append_fstab(ctx, uuids)?;

        ctx.run_chroot_env(
            ["apt-get", "-qy", "install", "grub-pc", "linux-image-virtual"],
            APT_ENV,
        )?;
        let boot_device = guest
            .boot_disk()
            .context("ubuntu guest has no boot disk (index 0)")?
            .device();
        ctx.run_chroot(["grub-install", "--target=i386-pc", boot_device.as_str()])?;
        ctx.run_chroot(["systemctl", "enable", "getty@ttyS0.service"])?;
        // Drop quiet/splash so the serial console shows boot output.
        ctx.run_chroot([
            "sed",
            "-i",
            "s/^\\(GRUB_CMDLINE_LINUX_DEFAULT=\\).*/\\1\"\"/",
            "/etc/default/grub",
        ])?;
        ctx.run_chroot(["update-grub"])?;

        let root_uuid = uuids
            .root_uuid()
            .context("no root filesystem UUID recorded")?;
        super::rewrite_grub_root(
            ctx,
            &format!("s/vmlinuz-\\(.*\\) root=[^ ]*/vmlinuz-\\1 root=UUID={root_uuid}/"),
        )
    }

    fn configure_access(&self, ctx: &TargetContext, guest: &Guest) -> Result<()> {
        info!("setup ssh/local user access");
        ctx.write_file("/usr/sbin/policy-rc.d", &["exit 101".to_string()])?;
        ctx.chmod_file("/usr/sbin/policy-rc.d", 0o555)?;
        ctx.run_chroot_env(["apt-get", "-qy", "install", "ssh"], APT_ENV)?;
        ctx.remove_file("/usr/sbin/policy-rc.d")?;
        super::configure_root_access(ctx, guest)
    }
}
