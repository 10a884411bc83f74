//! ArchLinux guest installer.

use anyhow::{Context, Result};
use log::info;

use super::{GuestInstaller, TargetContext};
use crate::disks::UuidMap;
use crate::domain::{Guest, GuestFlavor};

pub struct ArchLinuxInstaller;

impl GuestInstaller for ArchLinuxInstaller {
    fn flavor(&self) -> GuestFlavor {
        GuestFlavor::ArchLinux
    }

    fn required_tools(&self) -> &'static [(&'static str, &'static str)] {
        &[("pacstrap", "arch-install-scripts")]
    }

    fn install(&self, ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        info!("do archlinux installation");
        ctx.run([
            "pacstrap".to_string(),
            ctx.root().to_string_lossy().into_owned(),
            "base".to_string(),
        ])
    }

    fn configure_network(&self, ctx: &TargetContext, guest: &Guest) -> Result<()> {
        info!("setup guest networking");
        for network in &guest.networks {
            ctx.write_file(
                &format!("/etc/netctl/{}", network.name),
                &network.netctl_profile(),
            )?;
            ctx.run_chroot(["netctl", "enable", network.name.as_str()])?;
        }
        super::write_udev_rules(ctx, guest)?;
        super::write_hostname(ctx, guest)?;
        super::write_hosts(ctx, guest)
    }

    fn configure_locale(&self, ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        info!("setup locale/language settings");
        ctx.write_file(
            "/etc/locale.gen",
            &[
                "en_US.UTF-8 UTF-8".to_string(),
                "de_CH.UTF-8 UTF-8".to_string(),
            ],
        )?;
        ctx.write_file(
            "/etc/locale.conf",
            &[
                "LANG=\"en_US.UTF-8\"".to_string(),
                "LC_CTYPE=\"en_US.UTF-8\"".to_string(),
                "LC_COLLATE=C".to_string(),
                "LC_MESSAGES=\"en_US.UTF-8\"".to_string(),
                "LC_MONETARY=\"de_CH.UTF-8\"".to_string(),
                "LC_NUMERIC=\"de_CH.UTF-8\"".to_string(),
                "LC_PAPER=\"de_CH.UTF-8\"".to_string(),
                "LC_TIME=\"de_CH.UTF-8\"".to_string(),
            ],
        )?;
        ctx.write_file(
            "/etc/vconsole.conf",
            &[
                "KEYMAP=sg".to_string(),
                "FONT=lat9w-16".to_string(),
                "FONT_MAP=8859-1_to_uni".to_string(),
            ],
        )?;
        ctx.run_chroot([
            "ln",
            "-sf",
            "/usr/share/zoneinfo/Europe/Zurich",
            "/etc/localtime",
        ])?;
        ctx.run_chroot(["locale-gen"])
    }

    fn configure_boot(&self, ctx: &TargetContext, guest: &Guest, uuids: &UuidMap) -> Result<()> {
        info!("setup boot configuration");
        super::append_fstab(ctx, uuids)?;

        ctx.write_file(
            "/etc/mkinitcpio.conf",
            &[
                "MODULES=\"virtio virtio_blk virtio_pci virtio_net\"".to_string(),
                "BINARIES=\"\"".to_string(),
                "FILES=\"\"".to_string(),
                "HOOKS=\"base udev autodetect modconf block mdadm_udev lvm2 \
                 filesystems keyboard fsck\""
                    .to_string(),
            ],
        )?;
        ctx.run_chroot(["mkinitcpio", "-p", "linux"])?;

        ctx.run_chroot(["pacman", "-Syy", "--noconfirm", "grub"])?;
        let boot_device = guest
            .boot_disk()
            .context("archlinux guest has no boot disk (index 0)")?
            .device();
        ctx.run_chroot(["grub-install", "--target=i386-pc", boot_device.as_str()])?;
        ctx.run_chroot(["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])?;

        let root_uuid = uuids
            .root_uuid()
            .context("no root filesystem UUID recorded")?;
        super::rewrite_grub_root(
            ctx,
            &format!("s/vmlinuz-linux root=[^ ]*/vmlinuz-linux root=UUID={root_uuid}/"),
        )
    }

    fn configure_access(&self, ctx: &TargetContext, guest: &Guest) -> Result<()> {
        info!("setup ssh/local user access");
        ctx.run_chroot(["pacman", "-Syy", "--noconfirm", "openssh"])?;
        ctx.run_chroot(["systemctl", "enable", "sshd.service"])?;
        ctx.run_chroot(["systemctl", "enable", "getty@ttyS0.service"])?;
        super::configure_root_access(ctx, guest)
    }
}
