//! GPT partitioning and partition device resolution.
//!
//! The two partition GUIDs are generated before the table is written,
//! so later stages (the fstab writer in particular) can reference them
//! without ever parsing tool output. Both partitions are created in a
//! single sgdisk invocation; there is no intermediate state with only
//! one partition on disk.

use crate::process::Cmd;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// EFI system partition size.
pub const EFI_PART_SIZE_MIB: u64 = 100;
/// sgdisk type code for an EFI system partition.
pub const EFI_TYPE_CODE: &str = "ef00";
/// sgdisk type code for a Linux filesystem partition.
pub const ROOT_TYPE_CODE: &str = "8300";

/// Partition layout with pre-generated unique identifiers.
///
/// Partition 1: EFI system partition, 100 MiB.
/// Partition 2: Linux root, remaining space.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    pub efi_partuuid: String,
    pub root_partuuid: String,
}

impl PartitionPlan {
    /// Generate fresh partition GUIDs.
    pub fn generate() -> Result<Self> {
        Ok(Self {
            efi_partuuid: generate_partuuid()?,
            root_partuuid: generate_partuuid()?,
        })
    }
}

/// Generate a random UUID using uuidgen.
fn generate_partuuid() -> Result<String> {
    let out = Cmd::new("uuidgen").error_msg("uuidgen failed").run()?;
    let uuid = out.stdout_trimmed().to_lowercase();
    if uuid.is_empty() {
        bail!("uuidgen produced no output");
    }
    Ok(uuid)
}

/// Write the partition table in one atomic sgdisk transaction.
pub fn apply(disk: &Path, plan: &PartitionPlan) -> Result<()> {
    println!("Partitioning {}...", disk.display());
    Cmd::new("sgdisk")
        .args(sgdisk_args(plan))
        .arg_path(disk)
        .error_msg(format!("partitioning '{}' failed", disk.display()))
        .run()?;
    Ok(())
}

/// Arguments creating both partitions with explicit size, type and GUID.
fn sgdisk_args(plan: &PartitionPlan) -> Vec<String> {
    vec![
        format!("--new=1:0:+{}M", EFI_PART_SIZE_MIB),
        format!("--typecode=1:{}", EFI_TYPE_CODE),
        format!("--partition-guid=1:{}", plan.efi_partuuid),
        "--new=2:0:0".to_string(),
        format!("--typecode=2:{}", ROOT_TYPE_CODE),
        format!("--partition-guid=2:{}", plan.root_partuuid),
    ]
}

/// How the kernel names partition subdevices of a disk.
///
/// Physically-partitioned devices get `<base>N` (`sda1`); partitioned
/// loop devices get `<base>pN` (`loop0p1`). Probed once, then carried
/// as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceNamingScheme {
    Plain,
    PSuffix,
}

impl DeviceNamingScheme {
    /// Path of partition `index` on `disk` under this scheme.
    pub fn partition_path(self, disk: &Path, index: u32) -> PathBuf {
        let base = disk
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self {
            Self::Plain => format!("{base}{index}"),
            Self::PSuffix => format!("{base}p{index}"),
        };
        disk.with_file_name(name)
    }

    /// Discover which scheme the kernel used for `disk`.
    ///
    /// Neither candidate existing means the kernel has not materialized
    /// partition subdevices; the build cannot proceed with a guessed
    /// path, so that is a distinct fatal error.
    pub fn probe(disk: &Path) -> Result<Self> {
        let plain = Self::Plain.partition_path(disk, 1);
        if plain.exists() {
            return Ok(Self::Plain);
        }
        let p_suffix = Self::PSuffix.partition_path(disk, 1);
        if p_suffix.exists() {
            return Ok(Self::PSuffix);
        }
        bail!(
            "no partition devices found for '{}' (tried '{}' and '{}')",
            disk.display(),
            plain.display(),
            p_suffix.display()
        );
    }
}

/// Kernel-exposed device paths for the two partitions.
#[derive(Debug, Clone)]
pub struct ResolvedPartitionDevices {
    pub efi: PathBuf,
    pub root: PathBuf,
}

/// Resolve partition device paths for a freshly partitioned disk.
pub fn resolve_devices(disk: &Path) -> Result<ResolvedPartitionDevices> {
    // Partition nodes appear asynchronously after the rescan; give the
    // kernel a moment before probing.
    std::thread::sleep(Duration::from_millis(500));

    let scheme = DeviceNamingScheme::probe(disk)?;
    Ok(ResolvedPartitionDevices {
        efi: scheme.partition_path(disk, 1),
        root: scheme.partition_path(disk, 2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_scheme_renders_sda_style() {
        let path = DeviceNamingScheme::Plain.partition_path(Path::new("/dev/sda"), 1);
        assert_eq!(path, PathBuf::from("/dev/sda1"));
    }

    #[test]
    fn p_suffix_scheme_renders_loop_style() {
        let path = DeviceNamingScheme::PSuffix.partition_path(Path::new("/dev/loop0"), 2);
        assert_eq!(path, PathBuf::from("/dev/loop0p2"));
    }

    #[test]
    fn probe_selects_plain_when_bare_suffix_exists() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("sdx");
        fs::write(&disk, b"").unwrap();
        fs::write(dir.path().join("sdx1"), b"").unwrap();
        assert_eq!(
            DeviceNamingScheme::probe(&disk).unwrap(),
            DeviceNamingScheme::Plain
        );
    }

    #[test]
    fn probe_selects_p_suffix_when_pn_exists() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("loop7");
        fs::write(&disk, b"").unwrap();
        fs::write(dir.path().join("loop7p1"), b"").unwrap();
        assert_eq!(
            DeviceNamingScheme::probe(&disk).unwrap(),
            DeviceNamingScheme::PSuffix
        );
    }

    #[test]
    fn probe_fails_distinctly_when_no_subdevices_exist() {
        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("sdy");
        fs::write(&disk, b"").unwrap();
        let err = DeviceNamingScheme::probe(&disk).unwrap_err();
        assert!(err.to_string().contains("no partition devices found"));
    }

    #[test]
    fn sgdisk_args_embed_both_pregenerated_guids() {
        let plan = PartitionPlan {
            efi_partuuid: "11111111-2222-3333-4444-555555555555".into(),
            root_partuuid: "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".into(),
        };
        let args = sgdisk_args(&plan);
        assert!(args.contains(&"--partition-guid=1:11111111-2222-3333-4444-555555555555".to_string()));
        assert!(args.contains(&"--partition-guid=2:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".to_string()));
        assert!(args.contains(&format!("--new=1:0:+{}M", EFI_PART_SIZE_MIB)));
        assert!(args.contains(&"--new=2:0:0".to_string()));
        assert!(args.contains(&format!("--typecode=1:{}", EFI_TYPE_CODE)));
        assert!(args.contains(&format!("--typecode=2:{}", ROOT_TYPE_CODE)));
    }

    #[test]
    fn uuidgen_output_is_lowercased() {
        // uuidgen is in util-linux and present on any host this crate
        // targets; skip quietly elsewhere.
        if !crate::preflight::command_exists("uuidgen") {
            return;
        }
        let uuid = generate_partuuid().unwrap();
        assert_eq!(uuid, uuid.to_lowercase());
        assert_eq!(uuid.len(), 36);
    }
}
