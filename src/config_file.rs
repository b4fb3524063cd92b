//! Installer configuration file.
//!
//! Every field has a default, so an empty `{}` file (or no file at all) gives
//! the standard amd64 layout under `/mnt/gentoo`. The file only needs to
//! mention what differs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::tools::disk::parse_size_mib;

/// Disk-Readiness Guard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Minimum free space for build directories, in GiB
    pub min_free_gib: u64,
    /// Directories checked before the first stage runs. The live system's
    /// `/var/tmp` by default; `[]` turns the entry check off.
    pub entry_paths: Vec<PathBuf>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_free_gib: 10,
            entry_paths: vec![PathBuf::from("/var/tmp")],
        }
    }
}

impl GuardConfig {
    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_gib.saturating_mul(1024 * 1024 * 1024)
    }
}

/// Installation configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Where the target root is mounted on the live system
    pub mount_root: PathBuf,
    /// Gentoo architecture keyword used in stage3 URLs
    pub arch: String,
    /// Release mirror base, e.g. `https://distfiles.gentoo.org/releases`
    pub mirror: String,
    /// Binary package host written by the binpkg stage
    pub binhost: String,
    /// Editor command for interactive file edits (may include flags)
    pub editor: String,
    pub volume_group: String,
    /// Device-mapper name for the opened LUKS container
    pub luks_mapper: String,
    /// Size of the root logical volume
    pub root_lv_size: String,
    /// Label of the firmware boot entry
    pub boot_label: String,
    /// Wait for Enter after each completed stage
    pub pause_between_stages: bool,
    pub guard: GuardConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt/gentoo"),
            arch: "amd64".to_string(),
            mirror: "https://distfiles.gentoo.org/releases".to_string(),
            binhost: "https://distfiles.gentoo.org/releases/amd64/binpackages/23.0/x86-64/"
                .to_string(),
            editor: "nano -w".to_string(),
            volume_group: "vg0".to_string(),
            luks_mapper: "cryptcontainer".to_string(),
            root_lv_size: "50G".to_string(),
            boot_label: "Gentoo".to_string(),
            pause_between_stages: true,
            guard: GuardConfig::default(),
        }
    }
}

impl InstallerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.mount_root.is_absolute() {
            anyhow::bail!("mount_root must be an absolute path");
        }
        if self.mount_root == Path::new("/") {
            anyhow::bail!("mount_root must not be the live system's root");
        }

        let arch = self.arch.trim();
        if arch.is_empty() || !arch.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            anyhow::bail!("arch must be a Gentoo architecture keyword such as amd64");
        }

        for (name, url) in [("mirror", &self.mirror), ("binhost", &self.binhost)] {
            let url = url.trim();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.editor.trim().is_empty() {
            anyhow::bail!("editor must be specified");
        }

        for (name, value) in [
            ("volume_group", &self.volume_group),
            ("luks_mapper", &self.luks_mapper),
        ] {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
            {
                anyhow::bail!(
                    "{} can only contain letters, numbers, and _ - . +",
                    name
                );
            }
        }

        match parse_size_mib(&self.root_lv_size) {
            Some(mib) if mib > 0 => {}
            _ => anyhow::bail!("root_lv_size must be a size such as 50G"),
        }

        if self.boot_label.trim().is_empty() {
            anyhow::bail!("boot_label must be specified");
        }

        if self.guard.min_free_gib == 0 {
            anyhow::bail!("guard.min_free_gib must be at least 1");
        }
        if let Some(path) = self.guard.entry_paths.iter().find(|p| !p.is_absolute()) {
            anyhow::bail!("guard.entry_paths must be absolute: {}", path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = InstallerConfig::new();
        config.validate().expect("defaults are valid");
        assert_eq!(config.mount_root, PathBuf::from("/mnt/gentoo"));
        assert_eq!(config.guard.min_free_bytes(), 10 * 1024 * 1024 * 1024);
        assert_eq!(config.guard.entry_paths, vec![PathBuf::from("/var/tmp")]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: InstallerConfig =
            serde_json::from_str(r#"{"volume_group": "gentoo", "guard": {"min_free_gib": 20}}"#).expect("parse");
        assert_eq!(config.volume_group, "gentoo");
        assert_eq!(config.luks_mapper, "cryptcontainer");
        assert_eq!(config.guard.min_free_gib, 20);
        assert_eq!(config.guard.entry_paths, vec![PathBuf::from("/var/tmp")]);

        let config: InstallerConfig =
            serde_json::from_str(r#"{"guard": {"entry_paths": []}}"#).expect("parse");
        assert!(config.guard.entry_paths.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gentinstall.json");

        let mut config = InstallerConfig::new();
        config.pause_between_stages = false;
        config.save_to_file(&path).expect("save");

        let loaded = InstallerConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = InstallerConfig::new();
        config.mount_root = PathBuf::from("mnt/gentoo");
        assert!(config.validate().is_err());

        let mut config = InstallerConfig::new();
        config.volume_group = "vg 0".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallerConfig::new();
        config.root_lv_size = "lots".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallerConfig::new();
        config.mirror = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallerConfig::new();
        config.guard.min_free_gib = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = InstallerConfig::load_from_file("/nonexistent/gentinstall.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read configuration"));
    }
}
