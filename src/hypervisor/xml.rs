//! libvirt domain document rendering.
//!
//! Plain string rendering; the document shape is fixed (KVM, virtio
//! everywhere, serial console for headless access) and values come from a
//! validated descriptor, so a full XML library buys nothing here.

use anyhow::{Context, Result};

use crate::domain::{Disk, Guest, NetworkSpec};

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Device fragment for one disk. Requires the backing volume to exist.
pub fn disk_xml(disk: &Disk) -> Result<String> {
    let image = disk
        .image()
        .with_context(|| format!("disk '{}' has no backing volume", disk.alias))?;
    Ok(format!(
        "    <disk type='file' device='disk'>\n\
         \x20     <driver name='qemu' type='qcow2'/>\n\
         \x20     <source file='{}'/>\n\
         \x20     <target dev='{}' bus='virtio'/>\n\
         \x20     <alias name='virtio-{}'/>\n\
         \x20   </disk>\n",
        escape(&image.to_string_lossy()),
        escape(&disk.spec.target),
        escape(&disk.alias),
    ))
}

/// Device fragment for one bridged interface.
pub fn interface_xml(network: &NetworkSpec) -> String {
    let mut xml = String::from("    <interface type='bridge'>\n");
    xml.push_str(&format!(
        "      <source bridge='{}'/>\n",
        escape(&network.bridge)
    ));
    if let Some(vlan) = network.vlan {
        xml.push_str(&format!(
            "      <vlan>\n        <tag id='{vlan}'/>\n      </vlan>\n"
        ));
    }
    xml.push_str("      <virtualport type='openvswitch'/>\n");
    xml.push_str("      <model type='virtio'/>\n");
    xml.push_str("    </interface>\n");
    xml
}

/// Complete domain document for `virsh define`.
pub fn domain_xml(guest: &Guest) -> Result<String> {
    let mut devices = String::new();
    for disk in &guest.disks {
        devices.push_str(&disk_xml(disk)?);
    }
    for network in &guest.networks {
        devices.push_str(&interface_xml(network));
    }

    Ok(format!(
        "<domain type='kvm'>\n\
         \x20 <name>{name}</name>\n\
         \x20 <memory unit='MiB'>{memory}</memory>\n\
         \x20 <currentMemory unit='MiB'>{memory}</currentMemory>\n\
         \x20 <vcpu>{vcpu}</vcpu>\n\
         \x20 <os>\n\
         \x20   <type arch='x86_64' machine='pc'>hvm</type>\n\
         \x20   <boot dev='hd'/>\n\
         \x20 </os>\n\
         \x20 <features>\n\
         \x20   <acpi/>\n\
         \x20   <apic/>\n\
         \x20 </features>\n\
         \x20 <clock offset='utc'/>\n\
         \x20 <on_poweroff>destroy</on_poweroff>\n\
         \x20 <on_reboot>restart</on_reboot>\n\
         \x20 <on_crash>restart</on_crash>\n\
         \x20 <devices>\n\
         \x20   <emulator>/usr/bin/qemu-system-x86_64</emulator>\n\
         {devices}\
         \x20   <serial type='pty'>\n\
         \x20     <target port='0'/>\n\
         \x20   </serial>\n\
         \x20   <console type='pty'>\n\
         \x20     <target type='serial' port='0'/>\n\
         \x20   </console>\n\
         \x20   <graphics type='vnc' port='-1' autoport='yes'/>\n\
         \x20   <video>\n\
         \x20     <model type='cirrus'/>\n\
         \x20   </video>\n\
         \x20   <memballoon model='virtio'/>\n\
         \x20 </devices>\n\
         </domain>\n",
        name = escape(&guest.fqdn),
        memory = guest.memory_mb,
        vcpu = guest.vcpu,
    ))
}
