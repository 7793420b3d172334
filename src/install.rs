//! Base system installation via pacstrap.

use crate::process::Cmd;
use anyhow::Result;
use std::path::Path;

/// Packages every image gets: a bootable kernel, firmware, and the
/// bootloader stack.
pub const BASE_PACKAGES: &[&str] = &["base", "linux", "linux-firmware", "grub", "efibootmgr"];

/// Install the base set plus caller packages into the mounted root.
///
/// `-c` makes pacstrap use the host's package cache, so repeated builds
/// do not re-download. Output streams to the terminal; installation can
/// take minutes.
pub fn install_base_system(mount_root: &Path, extra_packages: &[String]) -> Result<()> {
    let packages = package_set(extra_packages);
    println!("\nInstalling base system ({} packages)...", packages.len());

    Cmd::new("pacstrap")
        .arg("-c")
        .arg_path(mount_root)
        .args(&packages)
        .error_msg("pacstrap failed")
        .run_streamed()?;
    Ok(())
}

/// Ordered union of the base set and the caller's packages.
fn package_set(extra: &[String]) -> Vec<String> {
    let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|p| p.to_string()).collect();
    for pkg in extra {
        if !packages.iter().any(|existing| existing == pkg) {
            packages.push(pkg.clone());
        }
    }
    packages
}
