//! Isolated-root execution inside the mounted image tree.
//!
//! Wraps `arch-chroot`, which bind-mounts /proc, /sys and /dev into the
//! target before switching root, so tools like grub-install and package
//! hooks see a normal system.

use crate::process::Cmd;
use anyhow::Result;
use std::path::Path;

/// Run a command inside the mounted tree, capturing output.
pub fn run(mount_root: &Path, args: &[&str]) -> Result<()> {
    let program = args.first().copied().unwrap_or("<none>");
    Cmd::new("arch-chroot")
        .arg_path(mount_root)
        .args(args.iter().copied())
        .error_msg(format!("'{program}' failed inside the new root"))
        .run()?;
    Ok(())
}

/// Run a command inside the mounted tree with inherited stdio.
///
/// Used for the setup script, whose output belongs on the operator's
/// terminal.
pub fn run_streamed(mount_root: &Path, args: &[&str]) -> Result<()> {
    let program = args.first().copied().unwrap_or("<none>");
    Cmd::new("arch-chroot")
        .arg_path(mount_root)
        .args(args.iter().copied())
        .error_msg(format!("'{program}' failed inside the new root"))
        .run_streamed()?;
    Ok(())
}

/// Open an interactive shell inside the mounted tree.
///
/// Blocks until the operator exits the shell. The shell's own exit
/// status is not a build failure.
pub fn interactive_shell(mount_root: &Path) -> Result<()> {
    Cmd::new("arch-chroot")
        .arg_path(mount_root)
        .allow_fail()
        .run_streamed()?;
    Ok(())
}
