use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use guestforge::domain::{Guest, GuestDescriptor};
use guestforge::hypervisor::VirshHypervisor;
use guestforge::process::HostRunner;
use guestforge::ProvisioningPipeline;

/// Provision a libvirt guest from a JSON definition file.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Guest definition file.
    definition: PathBuf,

    /// Mount root for the guest filesystems during installation.
    #[arg(long, default_value = guestforge::pipeline::DEFAULT_TARGET_ROOT)]
    mountpoint: PathBuf,

    /// Package-download proxy as host:port.
    #[arg(long)]
    proxy: Option<String>,

    /// libvirt connection URI.
    #[arg(long)]
    connect: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let file = File::open(&cli.definition)
        .with_context(|| format!("opening definition file {}", cli.definition.display()))?;
    let descriptor: GuestDescriptor = serde_json::from_reader(file)
        .with_context(|| format!("parsing definition file {}", cli.definition.display()))?;
    let guest = Guest::from_descriptor(descriptor)?;

    let runner = HostRunner;
    let hypervisor = VirshHypervisor::new(&runner, cli.connect);

    ProvisioningPipeline::new(guest, &hypervisor, &runner)
        .target_root(cli.mountpoint)
        .proxy(cli.proxy)
        .run()
}
