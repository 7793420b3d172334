//! Build configuration loading.
//!
//! The config is a declarative TOML document, not an executed script.
//! Every field is optional and merged over built-in defaults; unknown
//! keys are rejected so typos fail loudly. Setup paths are resolved
//! against the directory holding the config file, never against the
//! process working directory.
//!
//! ```toml
//! image_size = "10GiB"
//! packages = ["openssh", "vim"]
//! hostname = "test-host"
//! setup_script = "setup.sh"
//! setup_dir = "setup"
//! setup_exclude = "setup.exclude"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE_SIZE: &str = "10GiB";
pub const DEFAULT_HOSTNAME: &str = "arch-image";

/// Immutable per-invocation build configuration.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Image size in bytes (only used for file-backed targets).
    pub image_size: u64,
    /// Extra packages installed on top of the base set, in order.
    pub packages: Vec<String>,
    /// Contents of `/etc/hostname` in the image.
    pub hostname: String,
    /// Script executed inside the new root after installation.
    pub setup_script: Option<PathBuf>,
    /// Directory staged to `/setup` inside the new root.
    pub setup_dir: Option<PathBuf>,
    /// rsync exclude-pattern file applied while staging `setup_dir`.
    pub setup_exclude: Option<PathBuf>,
    /// Directory of the config file; all relative paths resolve here.
    pub config_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    image_size: Option<String>,
    packages: Option<Vec<String>>,
    hostname: Option<String>,
    setup_script: Option<PathBuf>,
    setup_dir: Option<PathBuf>,
    setup_exclude: Option<PathBuf>,
}

impl BuildConfig {
    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        let parsed: ConfigToml = toml::from_str(&raw)
            .with_context(|| format!("parsing config '{}'", path.display()))?;

        let config_dir = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let config_dir = config_dir
            .canonicalize()
            .with_context(|| format!("resolving config directory of '{}'", path.display()))?;

        let image_size = parse_size(parsed.image_size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE))
            .with_context(|| format!("invalid image_size in '{}'", path.display()))?;

        let hostname = parsed
            .hostname
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        if hostname.trim().is_empty() || hostname.chars().any(char::is_whitespace) {
            bail!(
                "invalid hostname '{}' in '{}': must be a single non-empty word",
                hostname,
                path.display()
            );
        }

        let mut packages = Vec::new();
        for pkg in parsed.packages.unwrap_or_default() {
            let pkg = pkg.trim().to_string();
            if pkg.is_empty() {
                bail!("empty package name in '{}'", path.display());
            }
            if !packages.contains(&pkg) {
                packages.push(pkg);
            }
        }

        Ok(Self {
            image_size,
            packages,
            hostname,
            setup_script: parsed.setup_script.map(|p| resolve(&config_dir, p)),
            setup_dir: parsed.setup_dir.map(|p| resolve(&config_dir, p)),
            setup_exclude: parsed.setup_exclude.map(|p| resolve(&config_dir, p)),
            config_dir,
        })
    }
}

fn resolve(config_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        config_dir.join(path)
    }
}

/// Parse a human-readable byte size.
///
/// Accepts bare byte counts, binary suffixes (`K`/`KiB`, `M`/`MiB`,
/// `G`/`GiB`, `T`/`TiB`) and decimal suffixes (`KB`, `MB`, `GB`, `TB`),
/// matching what `truncate -s` understands.
pub fn parse_size(input: &str) -> Result<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, suffix) = input.split_at(split);

    if digits.is_empty() {
        bail!("size '{}' has no numeric part", input);
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("size '{}' is not a whole number of units", input))?;

    let multiplier: u64 = match suffix.trim() {
        "" | "B" => 1,
        "K" | "KiB" => 1 << 10,
        "M" | "MiB" => 1 << 20,
        "G" | "GiB" => 1 << 30,
        "T" | "TiB" => 1 << 40,
        "KB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        other => bail!("size '{}' has unknown suffix '{}'", input, other),
    };

    let bytes = value
        .checked_mul(multiplier)
        .with_context(|| format!("size '{}' overflows", input))?;
    if bytes == 0 {
        bail!("size must be non-zero");
    }
    Ok(bytes)
}
