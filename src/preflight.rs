//! Host tool checks run before any state is touched.

use anyhow::{bail, Result};

/// Tools every disk-backed provisioning run shells out to, paired with the
/// package that provides them for the error message.
const COMMON_TOOLS: &[(&str, &str)] = &[
    ("virsh", "libvirt"),
    ("qemu-nbd", "qemu"),
    ("sgdisk", "gptfdisk"),
    ("mkfs.ext4", "e2fsprogs"),
    ("tune2fs", "e2fsprogs"),
    ("blkid", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
    ("mkswap", "util-linux"),
    ("swapon", "util-linux"),
    ("swapoff", "util-linux"),
    ("sed", "sed"),
    ("arch-chroot", "arch-install-scripts"),
];

pub fn command_exists(tool: &str) -> bool {
    which::which(tool).is_ok()
}

/// Fail with one aggregated message naming every missing tool, so the
/// operator fixes the host in a single pass instead of one error at a time.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("{tool} (from {package})"))
        .collect();
    if !missing.is_empty() {
        bail!("missing required host tools: {}", missing.join(", "));
    }
    Ok(())
}

/// The common toolset plus any flavor-specific extras.
pub fn host_tools(
    extra: &[(&'static str, &'static str)],
) -> Vec<(&'static str, &'static str)> {
    let mut tools = COMMON_TOOLS.to_vec();
    tools.extend_from_slice(extra);
    tools
}
