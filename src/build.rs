//! The image build pipeline.
//!
//! Strictly linear: each stage either succeeds and hands its result to
//! the next, or fails and aborts the whole build. There are no retries;
//! a transient tool failure is permanent for this invocation. The
//! cleanup stack (and its Ctrl-C hook) is installed before the first
//! resource is acquired, so every exit path unwinds whatever exists.

use crate::boot;
use crate::cleanup::{self, CleanupStack};
use crate::config::BuildConfig;
use crate::device::{self, DiskTarget};
use crate::filesystem;
use crate::install;
use crate::lockfile::BuildLock;
use crate::partition::{self, PartitionPlan};
use crate::device::LogicalDisk;
use crate::preflight;
use crate::setup;
use anyhow::Result;
use std::path::Path;

/// Build a bootable image at `image_path` from the config at
/// `config_path`.
pub fn run_build(image_path: &Path, config_path: &Path) -> Result<()> {
    let config = BuildConfig::load(config_path)?;
    let _lock = BuildLock::acquire(image_path)?;
    preflight::check_host(&config)?;

    let cleanup = CleanupStack::new(cleanup::suppressed_by_env());
    cleanup.install_interrupt_hook()?;

    let result = run_pipeline(image_path, &config, &cleanup);
    cleanup.unwind();

    let disk = result?;
    match &disk.backing {
        Some(backing) => println!("\nBuild complete: {}", backing.display()),
        None => println!("\nBuild complete: {}", disk.device.display()),
    }
    Ok(())
}

fn run_pipeline(
    image_path: &Path,
    config: &BuildConfig,
    cleanup: &CleanupStack,
) -> Result<LogicalDisk> {
    let target = DiskTarget::classify(image_path)?;
    let disk = device::resolve(target, config.image_size, cleanup)?;

    let plan = PartitionPlan::generate()?;
    partition::apply(&disk.device, &plan)?;
    let parts = partition::resolve_devices(&disk.device)?;

    let mounts = filesystem::provision(&parts, cleanup)?;
    install::install_base_system(&mounts.mount_root, &config.packages)?;
    boot::configure(&mounts, &plan, &config.hostname)?;
    setup::run(config, &mounts.mount_root)?;

    Ok(disk)
}
