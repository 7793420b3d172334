//! Boot configuration: fstab, hostname, timezone, GRUB.
//!
//! The fstab entry references the root partition by the PARTUUID that
//! was generated before partitioning, never by its device path, which
//! is transient across boots and machines. At boot the root is overlaid
//! by a volatile upper layer; this entry describes the underlying
//! partition, not the effective runtime root.

use crate::chroot;
use crate::filesystem::MountContext;
use crate::partition::PartitionPlan;
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs as unix_fs;
use std::path::Path;

/// Mount options for the root entry.
pub const ROOT_MOUNT_OPTIONS: &str = "rw,relatime,data=ordered";

/// Timezone the image boots with.
pub const TIMEZONE_TARGET: &str = "/usr/share/zoneinfo/UTC";

/// Make the installed tree bootable.
pub fn configure(mounts: &MountContext, plan: &PartitionPlan, hostname: &str) -> Result<()> {
    println!("\nConfiguring boot...");
    write_fstab(&mounts.mount_root, &plan.root_partuuid)?;
    write_hostname(&mounts.mount_root, hostname)?;
    set_timezone(&mounts.mount_root)?;
    append_grub_defaults(&mounts.mount_root)?;
    install_grub(mounts)?;
    Ok(())
}

/// The single fstab line for the root partition.
fn fstab_contents(root_partuuid: &str) -> String {
    format!(
        "# <file system> <dir> <type> <options> <dump> <pass>\n\
         PARTUUID={root_partuuid} / ext4 {ROOT_MOUNT_OPTIONS} 0 0\n"
    )
}

fn write_fstab(mount_root: &Path, root_partuuid: &str) -> Result<()> {
    let path = mount_root.join("etc/fstab");
    fs::write(&path, fstab_contents(root_partuuid))
        .with_context(|| format!("writing '{}'", path.display()))
}

fn write_hostname(mount_root: &Path, hostname: &str) -> Result<()> {
    let path = mount_root.join("etc/hostname");
    fs::write(&path, format!("{hostname}\n"))
        .with_context(|| format!("writing '{}'", path.display()))
}

/// Point /etc/localtime at UTC, replacing whatever the base install
/// left there.
fn set_timezone(mount_root: &Path) -> Result<()> {
    let link = mount_root.join("etc/localtime");
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("removing existing '{}'", link.display()))?;
    }
    unix_fs::symlink(TIMEZONE_TARGET, &link)
        .with_context(|| format!("linking '{}' to {}", link.display(), TIMEZONE_TARGET))
}

/// Boot parameters appended to the bootloader's default config.
fn grub_default_lines() -> String {
    "GRUB_TIMEOUT=1\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet loglevel=3 audit=0\"\n".to_string()
}

fn append_grub_defaults(mount_root: &Path) -> Result<()> {
    let path = mount_root.join("etc/default/grub");
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .with_context(|| format!("opening '{}'", path.display()))?;
    file.write_all(grub_default_lines().as_bytes())
        .with_context(|| format!("appending to '{}'", path.display()))
}

/// Install GRUB for removable EFI media and regenerate its menu.
///
/// `--removable` places the loader at the fallback path instead of
/// relying on NVRAM boot entries, so the image stays bootable when
/// moved between machines. Both steps run inside the new root so the
/// paths GRUB records match the booted system.
fn install_grub(mounts: &MountContext) -> Result<()> {
    println!("Installing bootloader into {}...", mounts.efi_mount.display());
    chroot::run(
        &mounts.mount_root,
        &[
            "grub-install",
            "--target=x86_64-efi",
            "--efi-directory=/boot",
            "--removable",
        ],
    )?;
    chroot::run(
        &mounts.mount_root,
        &["grub-mkconfig", "-o", "/boot/grub/grub.cfg"],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_etc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc/default")).unwrap();
        dir
    }

    #[test]
    fn fstab_references_the_pregenerated_partuuid() {
        let uuid = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee";
        let contents = fstab_contents(uuid);
        let entry = contents.lines().nth(1).unwrap();
        assert!(entry.starts_with(&format!("PARTUUID={uuid} ")));
        assert!(entry.contains(" / ext4 "));
        assert!(entry.contains(ROOT_MOUNT_OPTIONS));
        assert!(entry.ends_with(" 0 0"));
    }

    #[test]
    fn fstab_has_exactly_one_entry() {
        let contents = fstab_contents("x");
        let entries: Vec<_> = contents
            .lines()
            .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn hostname_is_written_with_trailing_newline() {
        let dir = tree_with_etc();
        write_hostname(dir.path(), "test-host").unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/hostname")).unwrap();
        assert_eq!(contents, "test-host\n");
    }

    #[test]
    fn timezone_symlink_points_at_utc() {
        let dir = tree_with_etc();
        set_timezone(dir.path()).unwrap();
        let target = fs::read_link(dir.path().join("etc/localtime")).unwrap();
        assert_eq!(target, Path::new(TIMEZONE_TARGET));
    }

    #[test]
    fn timezone_replaces_an_existing_link() {
        let dir = tree_with_etc();
        let link = dir.path().join("etc/localtime");
        unix_fs::symlink("/usr/share/zoneinfo/Europe/Berlin", &link).unwrap();
        set_timezone(dir.path()).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new(TIMEZONE_TARGET));
    }

    #[test]
    fn grub_defaults_are_appended_not_overwritten() {
        let dir = tree_with_etc();
        let path = dir.path().join("etc/default/grub");
        fs::write(&path, "GRUB_DISTRIBUTOR=\"Arch\"\n").unwrap();
        append_grub_defaults(dir.path()).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("GRUB_DISTRIBUTOR=\"Arch\"\n"));
        assert!(contents.contains("GRUB_TIMEOUT=1"));
        assert!(contents.contains("loglevel=3 audit=0"));
    }

    #[test]
    fn grub_defaults_file_is_created_when_missing() {
        let dir = tree_with_etc();
        append_grub_defaults(dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/default/grub")).unwrap();
        assert_eq!(contents, grub_default_lines());
    }

    #[test]
    fn fstab_written_into_tree() {
        let dir = tree_with_etc();
        write_fstab(dir.path(), "1234").unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/fstab")).unwrap();
        assert!(contents.contains("PARTUUID=1234 /"));
    }
}
