//! Disk preparation: attach, partition, format, mount, record UUIDs.
//!
//! Each virtual disk image is attached as an nbd block device at the slot
//! matching its disk index. The pipeline assumes exclusive use of those
//! slots; concurrent runs over overlapping index ranges are unsafe and out
//! of scope.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::domain::Disk;
use crate::error::ProvisionError;
use crate::ledger::{CleanupAction, ResourceLedger};
use crate::process::{Cmd, Runner};

/// Filesystem UUIDs accumulated during disk preparation.
///
/// ext4 entries are keyed by in-guest mountpoint (ascending order fixed by
/// the map); swap UUIDs are kept in preparation order. Consumed read-only
/// by fstab and bootloader configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UuidMap {
    ext4: BTreeMap<String, String>,
    swap: Vec<String>,
}

impl UuidMap {
    pub fn record_ext4(&mut self, mountpoint: impl Into<String>, uuid: impl Into<String>) {
        self.ext4.insert(mountpoint.into(), uuid.into());
    }

    pub fn record_swap(&mut self, uuid: impl Into<String>) {
        self.swap.push(uuid.into());
    }

    pub fn ext4(&self) -> &BTreeMap<String, String> {
        &self.ext4
    }

    pub fn swap(&self) -> &[String] {
        &self.swap
    }

    /// UUID of the root filesystem, present whenever any ext4 disk exists.
    pub fn root_uuid(&self) -> Option<&str> {
        self.ext4.get("/").map(String::as_str)
    }
}

/// Prepares a guest's disks on the host and mounts them under the target
/// root. Every acquisition pushes its inverse onto the ledger before the
/// next step runs.
pub struct DiskPreparer<'a> {
    runner: &'a dyn Runner,
    target_root: &'a Path,
}

impl<'a> DiskPreparer<'a> {
    pub fn new(runner: &'a dyn Runner, target_root: &'a Path) -> Self {
        Self {
            runner,
            target_root,
        }
    }

    /// Prepare all disks, in the given (ascending alias) order.
    pub fn prepare(&self, disks: &[Disk], ledger: &mut ResourceLedger) -> Result<UuidMap> {
        info!("prepare disks");
        let mut uuids = UuidMap::default();
        for disk in disks {
            self.prepare_disk(disk, ledger, &mut uuids)
                .with_context(|| format!("preparing disk '{}'", disk.alias))?;
        }
        Ok(uuids)
    }

    fn prepare_disk(
        &self,
        disk: &Disk,
        ledger: &mut ResourceLedger,
        uuids: &mut UuidMap,
    ) -> Result<()> {
        // Reject unknown filesystems before touching the device at all.
        match disk.spec.fstype.as_str() {
            "ext4" | "swap" => {}
            other => {
                return Err(ProvisionError::UnsupportedFilesystem(other.to_string()).into())
            }
        }

        let image = disk
            .image()
            .context("disk has no backing image; was the volume created?")?;
        let dev = disk.device();

        // Attach the image as a block device; detach on unwind.
        self.runner.run(
            &Cmd::new("qemu-nbd")
                .args(["-n", "-c", dev.as_str()])
                .arg_path(image),
        )?;
        ledger.push(CleanupAction::new(["qemu-nbd", "-d", dev.as_str()]));

        // Empty GPT partition table.
        self.runner.run(&Cmd::new("sgdisk").args(["-o", dev.as_str()]))?;

        // Partition numbering restarts at 1 on every device.
        let part = if disk.is_boot() {
            // BIOS boot partition on the first disk, data partition after it.
            self.runner.run(
                &Cmd::new("sgdisk").args(["-n", "1:2048:4095", "-t", "1:ef02", dev.as_str()]),
            )?;
            let endsector = self
                .runner
                .run_capture(&Cmd::new("sgdisk").args(["-E", dev.as_str()]))?
                .trim()
                .to_string();
            let data_part = format!("2:4096:{endsector}");
            self.runner
                .run(&Cmd::new("sgdisk").args(["-n", data_part.as_str(), dev.as_str()]))?;
            2
        } else {
            self.runner
                .run(&Cmd::new("sgdisk").args(["-n", "1", dev.as_str()]))?;
            1
        };
        let partdev = format!("{dev}p{part}");

        match disk.spec.fstype.as_str() {
            "ext4" => self.prepare_ext4(disk, &partdev, ledger, uuids),
            "swap" => self.prepare_swap(part, &dev, &partdev, ledger, uuids),
            _ => unreachable!("fstype validated above"),
        }
    }

    fn prepare_ext4(
        &self,
        disk: &Disk,
        partdev: &str,
        ledger: &mut ResourceLedger,
        uuids: &mut UuidMap,
    ) -> Result<()> {
        let mountpoint = disk
            .spec
            .mountpoint
            .as_deref()
            .context("ext4 disk is missing a mountpoint")?;

        self.runner.run(&Cmd::new("mkfs.ext4").arg(partdev))?;

        let mount_path = self.mount_path(mountpoint);
        if mountpoint == "/" {
            // Label the root filesystem instead of creating a directory; the
            // label is the bootloader's fallback root identifier.
            self.runner
                .run(&Cmd::new("tune2fs").args(["-L", "ROOTFS", partdev]))?;
        } else {
            fs::create_dir_all(&mount_path)
                .with_context(|| format!("creating mountpoint {}", mount_path.display()))?;
        }

        self.runner
            .run(&Cmd::new("mount").arg(partdev).arg_path(&mount_path))?;
        ledger.push(CleanupAction::new([
            "umount".to_string(),
            mount_path.to_string_lossy().into_owned(),
        ]));

        let uuid = self.read_uuid(partdev)?;
        uuids.record_ext4(mountpoint, uuid);
        Ok(())
    }

    fn prepare_swap(
        &self,
        part: u32,
        dev: &str,
        partdev: &str,
        ledger: &mut ResourceLedger,
        uuids: &mut UuidMap,
    ) -> Result<()> {
        let typecode = format!("{part}:8200");
        self.runner
            .run(&Cmd::new("sgdisk").args(["-t", typecode.as_str(), dev]))?;
        self.runner.run(&Cmd::new("mkswap").args(["-f", partdev]))?;
        self.runner.run(&Cmd::new("swapon").arg(partdev))?;
        ledger.push(CleanupAction::new(["swapoff", partdev]));

        let uuid = self.read_uuid(partdev)?;
        uuids.record_swap(uuid);
        Ok(())
    }

    fn mount_path(&self, mountpoint: &str) -> PathBuf {
        let relative = mountpoint.trim_start_matches('/');
        if relative.is_empty() {
            self.target_root.to_path_buf()
        } else {
            self.target_root.join(relative)
        }
    }

    fn read_uuid(&self, partdev: &str) -> Result<String> {
        let uuid = self
            .runner
            .run_capture(&Cmd::new("blkid").args(["-s", "UUID", "-o", "value", partdev]))?;
        Ok(uuid.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiskSpec;
    use crate::process::testing::RecordingRunner;
    use tempfile::TempDir;

    fn disk(alias: &str, fstype: &str, mountpoint: Option<&str>) -> Disk {
        let mut disk = Disk::new(
            alias,
            DiskSpec {
                pool: "default".into(),
                fstype: fstype.into(),
                target: "vda".into(),
                mountpoint: mountpoint.map(Into::into),
                capacity: 10,
            },
        )
        .unwrap();
        disk.attach_image(PathBuf::from(format!("/var/lib/libvirt/{alias}.qcow2")));
        disk
    }

    fn sgdisk_creates(calls: &[Vec<String>], dev: &str) -> usize {
        calls
            .iter()
            .filter(|argv| argv[0] == "sgdisk" && argv.contains(&"-n".to_string()))
            .filter(|argv| argv.last().map(String::as_str) == Some(dev))
            .count()
    }

    #[test]
    fn boot_disk_gets_two_partitions_others_one() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![
            disk("disk0", "ext4", Some("/")),
            disk("disk1", "ext4", Some("/var")),
            disk("disk2", "swap", None),
        ];
        preparer.prepare(&disks, &mut ledger).unwrap();

        let calls = runner.calls();
        assert_eq!(sgdisk_creates(&calls, "/dev/nbd0"), 2);
        assert_eq!(sgdisk_creates(&calls, "/dev/nbd1"), 1);
        assert_eq!(sgdisk_creates(&calls, "/dev/nbd2"), 1);
    }

    #[test]
    fn root_disk_is_labelled_not_mkdired() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        runner.on("blkid", "21f83a47-0000-4000-8000-1234567890ab");
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![disk("disk0", "ext4", Some("/"))];
        let uuids = preparer.prepare(&disks, &mut ledger).unwrap();

        assert_eq!(
            uuids.ext4().get("/").map(String::as_str),
            Some("21f83a47-0000-4000-8000-1234567890ab")
        );
        assert_eq!(uuids.root_uuid(), uuids.ext4().get("/").map(String::as_str));
        let joined = runner.joined_calls();
        assert!(joined.contains(&"tune2fs -L ROOTFS /dev/nbd0p2".to_string()));
        // No mountpoint directory was created under the target root.
        assert_eq!(fs::read_dir(target.path()).unwrap().count(), 0);
    }

    #[test]
    fn non_root_mountpoint_directory_is_created() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![disk("disk1", "ext4", Some("/var/log"))];
        preparer.prepare(&disks, &mut ledger).unwrap();

        assert!(target.path().join("var/log").is_dir());
        assert!(!runner.joined_calls().iter().any(|c| c.contains("tune2fs")));
    }

    #[test]
    fn swap_disk_command_sequence_and_uuid() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![disk("disk1", "swap", None)];
        let uuids = preparer.prepare(&disks, &mut ledger).unwrap();

        let joined = runner.joined_calls();
        assert!(joined.contains(&"sgdisk -t 1:8200 /dev/nbd1".to_string()));
        assert!(joined.contains(&"mkswap -f /dev/nbd1p1".to_string()));
        assert!(joined.contains(&"swapon /dev/nbd1p1".to_string()));
        assert_eq!(uuids.swap().len(), 1);
        assert!(uuids.ext4().is_empty());
    }

    #[test]
    fn ledger_records_one_inverse_per_acquisition_in_order() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![
            disk("disk0", "ext4", Some("/")),
            disk("disk1", "swap", None),
        ];
        preparer.prepare(&disks, &mut ledger).unwrap();

        // attach+mount for disk0, attach+swapon for disk1.
        assert_eq!(ledger.len(), 4);

        let before = runner.calls().len();
        ledger.release_all(&runner);
        let released: Vec<String> = runner.joined_calls().split_off(before);
        assert_eq!(
            released,
            vec![
                "swapoff /dev/nbd1p1".to_string(),
                "qemu-nbd -d /dev/nbd1".to_string(),
                format!("umount {}", target.path().display()),
                "qemu-nbd -d /dev/nbd0".to_string(),
            ]
        );
    }

    #[test]
    fn unsupported_fstype_fails_before_any_command() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![disk("disk0", "btrfs", Some("/"))];
        let err = preparer.prepare(&disks, &mut ledger).unwrap_err();

        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::UnsupportedFilesystem(fstype)) => assert_eq!(fstype, "btrfs"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.calls().is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn earlier_disks_stay_on_the_ledger_when_a_later_disk_fails() {
        let target = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        runner.fail_on("/dev/nbd1");
        let preparer = DiskPreparer::new(&runner, target.path());
        let mut ledger = ResourceLedger::new();

        let disks = vec![
            disk("disk0", "ext4", Some("/")),
            disk("disk1", "ext4", Some("/var")),
        ];
        preparer.prepare(&disks, &mut ledger).unwrap_err();

        // disk0's attach and mount are registered; disk1 failed at attach.
        assert_eq!(ledger.len(), 2);
    }
}
