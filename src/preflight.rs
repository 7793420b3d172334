//! Host validation before any destructive step.
//!
//! The pipeline shells out to privileged tools; checking them up front
//! turns a mid-build "command not found" into a clear error before any
//! partition table has been touched.

use crate::config::BuildConfig;
use anyhow::{bail, Result};

/// Tools every build needs, as (command, providing package) pairs.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("sgdisk", "gptfdisk"),
    ("losetup", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
    ("uuidgen", "util-linux"),
    ("mkfs.vfat", "dosfstools"),
    ("mkfs.ext4", "e2fsprogs"),
    ("pacstrap", "arch-install-scripts"),
    ("arch-chroot", "arch-install-scripts"),
];

/// Check if a command can be found in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// True when the process runs with effective uid 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() == 0 }
}

/// Validate the host for a build with the given config.
///
/// Checks the base tool set, rsync when a setup directory will be
/// staged, and that we are root (losetup, mount and pacstrap all
/// require it).
pub fn check_host(config: &BuildConfig) -> Result<()> {
    if !is_root() {
        bail!("this build must run as root (it partitions, mounts and chroots)");
    }

    check_required_tools(REQUIRED_TOOLS)?;
    if config.setup_dir.is_some() {
        check_required_tools(&[("rsync", "rsync")])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_exists_finds_sh() {
        assert!(command_exists("sh"));
        assert!(!command_exists("archimage_nonexistent_tool_xyz"));
    }

    #[test]
    fn check_required_tools_passes_for_coreutils() {
        let tools = &[("ls", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn missing_tool_error_names_the_package() {
        let tools = &[("archimage_nonexistent_tool_xyz", "fake-package")];
        let err = check_required_tools(tools).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("archimage_nonexistent_tool_xyz"));
        assert!(msg.contains("fake-package"));
    }

    #[test]
    fn required_tools_list_is_well_formed() {
        assert!(!REQUIRED_TOOLS.is_empty());
        for (tool, package) in REQUIRED_TOOLS {
            assert!(!tool.is_empty());
            assert!(!package.is_empty());
        }
    }
}
