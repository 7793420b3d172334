//! Filesystem formatting and mounting.
//!
//! Registration order here is what makes the unwind correct: the
//! scratch directory's removal is registered before anything is mounted
//! into it, and a single recursive unmount is registered before the EFI
//! submount exists, so the unwind always sees EFI unmounted before
//! root, and root unmounted before the directory is removed.

use crate::cleanup::CleanupStack;
use crate::partition::ResolvedPartitionDevices;
use crate::process::Cmd;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Label stamped on the root filesystem so the partition is
/// recognizable in lsblk/blkid output.
pub const ROOT_FS_LABEL: &str = "root";

/// Scratch mount tree owned by the build pipeline.
#[derive(Debug, Clone)]
pub struct MountContext {
    /// Where the root partition is mounted.
    pub mount_root: PathBuf,
    /// EFI partition mount, at `<mount_root>/boot`.
    pub efi_mount: PathBuf,
}

/// Format both partitions and mount root with EFI nested under it.
pub fn provision(
    parts: &ResolvedPartitionDevices,
    cleanup: &CleanupStack,
) -> Result<MountContext> {
    format_efi(&parts.efi)?;
    format_root(&parts.root)?;

    // Uniquely-named scratch directory for the mount tree. Its removal
    // must be registered before the first mount attempt so a failed
    // mount still leaves the directory cleanly removed.
    let scratch = tempfile::Builder::new()
        .prefix("archimage-")
        .tempdir()
        .context("creating scratch mount directory")?;
    let mount_root = scratch.path().to_path_buf();
    cleanup.push(
        format!("scratch mount directory {}", mount_root.display()),
        move || scratch.close().map_err(Into::into),
    );

    println!("Mounting {} at {}...", parts.root.display(), mount_root.display());
    Cmd::new("mount")
        .arg_path(&parts.root)
        .arg_path(&mount_root)
        .error_msg(format!("mounting root partition '{}' failed", parts.root.display()))
        .run()?;

    // One recursive unmount covers root and the EFI submount; EFI must
    // be registered nowhere else or it would unwind after root.
    let tree = mount_root.clone();
    cleanup.push(
        format!("mounted filesystems under {}", mount_root.display()),
        move || {
            Cmd::new("umount")
                .arg("-R")
                .arg_path(&tree)
                .error_msg(format!("recursive unmount of '{}' failed", tree.display()))
                .run()?;
            Ok(())
        },
    );

    let efi_mount = mount_root.join("boot");
    fs::create_dir_all(&efi_mount)
        .with_context(|| format!("creating EFI mount point '{}'", efi_mount.display()))?;
    Cmd::new("mount")
        .arg_path(&parts.efi)
        .arg_path(&efi_mount)
        .error_msg(format!("mounting EFI partition '{}' failed", parts.efi.display()))
        .run()?;

    Ok(MountContext {
        mount_root,
        efi_mount,
    })
}

/// FAT32 with tool defaults; the partition is freshly created, so
/// overwriting is safe by construction.
fn format_efi(device: &Path) -> Result<()> {
    println!("Formatting {} as FAT32...", device.display());
    Cmd::new("mkfs.vfat")
        .arg_path(device)
        .error_msg(format!("formatting '{}' as FAT32 failed", device.display()))
        .run()?;
    Ok(())
}

/// ext4, forced so any residual signature on a reused device is
/// overwritten.
fn format_root(device: &Path) -> Result<()> {
    println!("Formatting {} as ext4...", device.display());
    Cmd::new("mkfs.ext4")
        .args(["-F", "-L", ROOT_FS_LABEL])
        .arg_path(device)
        .error_msg(format!("formatting '{}' as ext4 failed", device.display()))
        .run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupStack;

    #[test]
    fn scratch_directory_is_removed_on_unwind() {
        // Exercise the registration pattern directly: a tempdir whose
        // close is pushed onto the stack must be gone after unwind.
        let cleanup = CleanupStack::new(false);
        let scratch = tempfile::Builder::new()
            .prefix("archimage-")
            .tempdir()
            .unwrap();
        let path = scratch.path().to_path_buf();
        cleanup.push("scratch dir", move || scratch.close().map_err(Into::into));

        assert!(path.exists());
        cleanup.unwind();
        assert!(!path.exists());
    }

    #[test]
    fn suppressed_unwind_keeps_scratch_directory() {
        let cleanup = CleanupStack::new(true);
        let scratch = tempfile::Builder::new()
            .prefix("archimage-")
            .tempdir()
            .unwrap();
        let path = scratch.path().to_path_buf();
        cleanup.push("scratch dir", move || scratch.close().map_err(Into::into));

        cleanup.unwind();
        assert!(path.exists());
        std::fs::remove_dir_all(&path).unwrap();
    }
}
