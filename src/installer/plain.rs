//! Plain guest: an externally prepared disk image, nothing to install.

use anyhow::Result;

use super::{GuestInstaller, TargetContext};
use crate::disks::UuidMap;
use crate::domain::{Guest, GuestFlavor};

pub struct PlainInstaller;

impl GuestInstaller for PlainInstaller {
    fn flavor(&self) -> GuestFlavor {
        GuestFlavor::Plain
    }

    fn needs_disks(&self) -> bool {
        false
    }

    fn install(&self, _ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        Ok(())
    }

    fn configure_network(&self, _ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        Ok(())
    }

    fn configure_locale(&self, _ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        Ok(())
    }

    fn configure_boot(&self, _ctx: &TargetContext, _guest: &Guest, _uuids: &UuidMap) -> Result<()> {
        Ok(())
    }

    fn configure_access(&self, _ctx: &TargetContext, _guest: &Guest) -> Result<()> {
        Ok(())
    }
}
