//! Caller-supplied setup step inside the new root.
//!
//! An optional directory tree is staged to `/setup` (rsync, honoring an
//! exclude list) and an optional script runs via chroot with no
//! arguments. The script's contract: anything it needs beyond packages
//! it reads from `/setup`; anything it writes to `/tmp` is discarded,
//! since `/tmp` is volatile in the running image. Both the script and
//! the staged directory are removed before the image is finalized.

use crate::chroot;
use crate::config::BuildConfig;
use crate::process::Cmd;
use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Staging directory name inside the image root.
pub const SETUP_DIR_NAME: &str = "setup";
/// Script name inside the image root.
pub const SETUP_SCRIPT_NAME: &str = "setup.sh";

/// Stage files, run the setup script, optionally open an inspection
/// shell, then remove the staging.
pub fn run(config: &BuildConfig, mount_root: &Path) -> Result<()> {
    let staged = match &config.setup_dir {
        Some(dir) => Some(stage_setup_dir(
            dir,
            config.setup_exclude.as_deref(),
            mount_root,
        )?),
        None => None,
    };

    if let Some(script) = &config.setup_script {
        run_setup_script(script, mount_root)?;
    }

    if inspect_requested() {
        println!("INSPECT set; opening a shell inside the image (exit to continue)");
        chroot::interactive_shell(mount_root)?;
    }

    if let Some(staged) = staged {
        fs::remove_dir_all(&staged)
            .with_context(|| format!("removing staged '{}'", staged.display()))?;
    }

    Ok(())
}

/// Copy the setup directory into `<mount_root>/setup`.
fn stage_setup_dir(dir: &Path, exclude: Option<&Path>, mount_root: &Path) -> Result<PathBuf> {
    let dest = mount_root.join(SETUP_DIR_NAME);
    println!("Staging {} to /{}...", dir.display(), SETUP_DIR_NAME);

    let mut cmd = Cmd::new("rsync").arg("-a");
    if let Some(exclude) = exclude {
        cmd = cmd.arg(format!("--exclude-from={}", exclude.display()));
    }
    // Trailing slash: copy the directory's contents, not the directory.
    cmd.arg(format!("{}/", dir.display()))
        .arg_path(&dest)
        .error_msg(format!("staging '{}' failed", dir.display()))
        .run()?;

    Ok(dest)
}

/// Copy the script to the image root, executable.
fn stage_script(script: &Path, mount_root: &Path) -> Result<PathBuf> {
    let dest = mount_root.join(SETUP_SCRIPT_NAME);
    fs::copy(script, &dest).with_context(|| {
        format!("copying '{}' to '{}'", script.display(), dest.display())
    })?;
    let mut perms = fs::metadata(&dest)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&dest, perms)
        .with_context(|| format!("marking '{}' executable", dest.display()))?;
    Ok(dest)
}

/// Execute the setup script inside the new root.
///
/// A non-zero exit aborts the whole build. The script file itself is
/// removed either way; it must not ship in the image.
fn run_setup_script(script: &Path, mount_root: &Path) -> Result<()> {
    let dest = stage_script(script, mount_root)?;
    println!("Running setup script {}...", script.display());

    let script_path = format!("/{SETUP_SCRIPT_NAME}");
    let result = chroot::run_streamed(mount_root, &[script_path.as_str()]);
    let _ = fs::remove_file(&dest);
    result
}

/// True when `INSPECT` is set to a non-empty value.
fn inspect_requested() -> bool {
    std::env::var_os("INSPECT").is_some_and(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::command_exists;
    use serial_test::serial;

    #[test]
    fn staged_script_is_executable_copy() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("my-setup.sh");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        let mount_root = tempfile::tempdir().unwrap();

        let dest = stage_script(&script, mount_root.path()).unwrap();
        assert_eq!(dest, mount_root.path().join(SETUP_SCRIPT_NAME));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "#!/bin/sh\necho hi\n");
        let mode = fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn stage_setup_dir_copies_and_honors_excludes() {
        if !command_exists("rsync") {
            return;
        }
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("keep.txt"), "keep").unwrap();
        fs::write(src.path().join("drop.log"), "drop").unwrap();
        let exclude = src.path().join("exclude.list");
        fs::write(&exclude, "*.log\nexclude.list\n").unwrap();
        let mount_root = tempfile::tempdir().unwrap();

        let staged =
            stage_setup_dir(src.path(), Some(exclude.as_path()), mount_root.path()).unwrap();
        assert_eq!(staged, mount_root.path().join(SETUP_DIR_NAME));
        assert!(staged.join("keep.txt").exists());
        assert!(!staged.join("drop.log").exists());
    }

    #[test]
    fn stage_setup_dir_without_excludes_copies_everything() {
        if !command_exists("rsync") {
            return;
        }
        let src = tempfile::tempdir().unwrap();
        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/file"), "x").unwrap();
        let mount_root = tempfile::tempdir().unwrap();

        let staged = stage_setup_dir(src.path(), None, mount_root.path()).unwrap();
        assert!(staged.join("nested/file").exists());
    }

    #[test]
    #[serial]
    fn inspect_reads_env() {
        std::env::remove_var("INSPECT");
        assert!(!inspect_requested());
        std::env::set_var("INSPECT", "1");
        assert!(inspect_requested());
        std::env::remove_var("INSPECT");
    }
}
