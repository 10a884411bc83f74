//! Provision libvirt/KVM guests from declarative JSON definitions.
//!
//! A guest definition names the virtual hardware (memory, vcpus, disks,
//! bridged networks) and a guest flavor. The [`ProvisioningPipeline`]
//! defines the domain, creates and prepares the backing disks on the host,
//! installs the flavor's OS into them through a chroot and leaves a defined,
//! autostarting, running guest behind. Host resources acquired along the
//! way (nbd attachments, mounts, swap) are always released, on failure too.

pub mod disks;
pub mod domain;
pub mod error;
pub mod hypervisor;
pub mod installer;
pub mod ledger;
pub mod pipeline;
pub mod preflight;
pub mod process;

pub use error::ProvisionError;
pub use pipeline::ProvisioningPipeline;
