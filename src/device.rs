//! Target classification and logical disk resolution.
//!
//! Downstream stages never care whether they are writing to real
//! hardware or to a file behind a loop device; this module collapses
//! the difference into a single [`LogicalDisk`] device path.

use crate::cleanup::CleanupStack;
use crate::process::Cmd;
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// What the output path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskTarget {
    /// An existing block device; its partition table will be destroyed.
    BlockDevice(PathBuf),
    /// A regular file (existing or not); recreated and loop-attached.
    ImageFile(PathBuf),
}

/// The single device path all partition operations address.
#[derive(Debug, Clone)]
pub struct LogicalDisk {
    /// Loop device or real block device.
    pub device: PathBuf,
    /// Backing image file when the target was not a device.
    pub backing: Option<PathBuf>,
}

impl DiskTarget {
    /// Classify `path` as a block device or an image file.
    ///
    /// A missing path is an image file to be created. Anything that
    /// exists but is neither a block device nor a regular file is a
    /// fatal error, raised before any resource is acquired.
    pub fn classify(path: &Path) -> Result<Self> {
        match fs::metadata(path) {
            Ok(meta) if meta.file_type().is_block_device() => {
                Ok(Self::BlockDevice(path.to_path_buf()))
            }
            Ok(meta) if meta.file_type().is_file() => Ok(Self::ImageFile(path.to_path_buf())),
            Ok(meta) => bail!(
                "cannot build onto '{}': neither a block device nor a regular file ({:?})",
                path.display(),
                meta.file_type()
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Ok(Self::ImageFile(path.to_path_buf()))
            }
            Err(err) => Err(err).with_context(|| format!("inspecting target '{}'", path.display())),
        }
    }
}

/// Turn a [`DiskTarget`] into a [`LogicalDisk`], registering cleanup.
///
/// Block devices get their partition table destroyed in place and carry
/// no cleanup obligation (the caller owns the device). Image files are
/// recreated at `size` bytes (sparse), attached to a free loop device
/// with partition scanning enabled, and the detach is registered on the
/// cleanup stack.
pub fn resolve(target: DiskTarget, size: u64, cleanup: &CleanupStack) -> Result<LogicalDisk> {
    match target {
        DiskTarget::BlockDevice(path) => {
            println!("Destroying existing partition table on {}...", path.display());
            Cmd::new("sgdisk")
                .arg("--zap-all")
                .arg_path(&path)
                .error_msg(format!("wiping partition table on '{}' failed", path.display()))
                .run()?;
            Ok(LogicalDisk {
                device: path,
                backing: None,
            })
        }
        DiskTarget::ImageFile(path) => {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("removing stale image '{}'", path.display()))?;
            }
            allocate_sparse(&path, size)?;
            let device = attach_loop(&path)?;
            println!("Attached {} to {}", path.display(), device.display());

            let detach = device.clone();
            cleanup.push(format!("loop device {}", device.display()), move || {
                Cmd::new("losetup")
                    .arg("-d")
                    .arg_path(&detach)
                    .error_msg(format!("detaching '{}' failed", detach.display()))
                    .run()?;
                Ok(())
            });

            Ok(LogicalDisk {
                device,
                backing: Some(path),
            })
        }
    }
}

/// Create a sparse file of `size` bytes.
fn allocate_sparse(path: &Path, size: u64) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating image file '{}'", path.display()))?;
    file.set_len(size)
        .with_context(|| format!("sizing image file '{}' to {} bytes", path.display(), size))?;
    Ok(())
}

/// Attach `path` to the next free loop device with partition scanning.
fn attach_loop(path: &Path) -> Result<PathBuf> {
    let out = Cmd::new("losetup")
        .args(["--find", "--show", "--partscan"])
        .arg_path(path)
        .error_msg(format!("attaching '{}' to a loop device failed", path.display()))
        .run()?;

    let device = out.stdout_trimmed();
    if device.is_empty() {
        bail!("losetup reported no loop device for '{}'", path.display());
    }
    Ok(PathBuf::from(device))
}
