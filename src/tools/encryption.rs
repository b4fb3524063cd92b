//! Type-safe arguments for LUKS and LVM tools.
//!
//! - `LuksFormatArgs` / `LuksOpenArgs` / `LuksCloseArgs` for `cryptsetup`
//! - `PvCreateArgs`, `VgCreateArgs`, `LvCreateArgs`, `VgChangeArgs` for LVM
//!
//! # Passphrases
//!
//! Passphrases are never part of an argument list (visible in `ps aux`).
//! `luksFormat` and `open` run interactively and `cryptsetup` reads the
//! passphrase from the terminal itself.

use crate::operation::{Operation, ToolArgs};

/// LUKS cipher selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LuksCipher {
    /// AES-256 in XTS mode
    #[default]
    Aes256Xts,
    Serpent256Xts,
    Twofish256Xts,
}

impl LuksCipher {
    pub fn as_cipher_str(&self) -> &'static str {
        match self {
            LuksCipher::Aes256Xts => "aes-xts-plain64",
            LuksCipher::Serpent256Xts => "serpent-xts-plain64",
            LuksCipher::Twofish256Xts => "twofish-xts-plain64",
        }
    }

    /// Key size in bits. XTS splits the key in two, so 512 gives 256-bit
    /// strength.
    pub fn key_size(&self) -> u32 {
        512
    }
}

impl std::fmt::Display for LuksCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_cipher_str())
    }
}

/// Type-safe arguments for `cryptsetup luksFormat`.
///
/// # Field to Flag Mapping
///
/// | Rust Field | CLI Flag      | Notes |
/// |------------|---------------|-------|
/// | `cipher`   | `--cipher`    | default aes-xts-plain64 |
/// | `cipher`   | `--key-size`  | derived from the cipher |
/// | (always)   | `-y`          | passphrase asked twice |
/// | `device`   | positional    | partition to encrypt |
///
/// Destructive and interactive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuksFormatArgs {
    pub device: String,
    pub cipher: LuksCipher,
}

impl ToolArgs for LuksFormatArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("cryptsetup").args([
            "-v".to_string(),
            "--type".to_string(),
            "luks2".to_string(),
            "--cipher".to_string(),
            self.cipher.as_cipher_str().to_string(),
            "--key-size".to_string(),
            self.cipher.key_size().to_string(),
            "-y".to_string(),
            "luksFormat".to_string(),
            self.device.clone(),
        ])
    }
}

/// Type-safe arguments for `cryptsetup open`.
///
/// The decrypted device appears at `/dev/mapper/<mapper_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuksOpenArgs {
    pub device: String,
    pub mapper_name: String,
}

impl LuksOpenArgs {
    pub fn mapped_device(&self) -> String {
        format!("/dev/mapper/{}", self.mapper_name)
    }
}

impl ToolArgs for LuksOpenArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("cryptsetup").args([
            "open",
            "--type",
            "luks",
            self.device.as_str(),
            self.mapper_name.as_str(),
        ])
    }
}

/// `cryptsetup close`; tolerated because it is only used for cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuksCloseArgs {
    pub mapper_name: String,
}

impl ToolArgs for LuksCloseArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("cryptsetup")
            .args(["close", self.mapper_name.as_str()])
            .tolerated()
    }
}

/// Query listing open dm-crypt mappings.
pub fn crypt_mappings_query() -> Operation {
    Operation::new("dmsetup")
        .args(["ls", "--target", "crypt"])
        .captured()
        .tolerated()
}

/// Mapping names from `dmsetup ls --target crypt`.
///
/// An empty table prints `No devices found`.
pub fn parse_crypt_mappings(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| *name != "No")
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvCreateArgs {
    pub device: String,
}

impl ToolArgs for PvCreateArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("pvcreate").arg(self.device.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgCreateArgs {
    pub name: String,
    pub device: String,
}

impl ToolArgs for VgCreateArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("vgcreate").args([self.name.as_str(), self.device.as_str()])
    }
}

/// `vgchange -a y|n`. Deactivation is a tolerated cleanup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VgChangeArgs {
    pub activate: bool,
}

impl ToolArgs for VgChangeArgs {
    fn to_operation(&self) -> Operation {
        if self.activate {
            Operation::new("vgchange").arg("-ay")
        } else {
            Operation::new("vgchange").arg("-an").tolerated()
        }
    }
}

/// Size of a logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LvSize {
    /// `--size <size>` such as `50G`
    Fixed(String),
    /// `--extents 100%FREE`
    RemainingSpace,
}

/// Type-safe arguments for `lvcreate`.
///
/// | Rust Field     | CLI Flag                     |
/// |----------------|------------------------------|
/// | `size`         | `--size` or `--extents`      |
/// | `volume_group` | positional                   |
/// | `name`         | `--name`                     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvCreateArgs {
    pub volume_group: String,
    pub name: String,
    pub size: LvSize,
}

impl LvCreateArgs {
    /// Device path of the created volume, e.g. `/dev/vg0/root`.
    pub fn device(&self) -> String {
        format!("/dev/{}/{}", self.volume_group, self.name)
    }
}

impl ToolArgs for LvCreateArgs {
    fn to_operation(&self) -> Operation {
        let op = Operation::new("lvcreate");
        let op = match &self.size {
            LvSize::Fixed(size) => op.args(["--size", size.as_str()]),
            LvSize::RemainingSpace => op.args(["--extents", "100%FREE"]),
        };
        op.args([self.volume_group.as_str(), "--name", self.name.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luks_format_flags() {
        let args = LuksFormatArgs {
            device: "/dev/sda2".into(),
            cipher: LuksCipher::default(),
        };
        let op = args.to_operation();
        assert_eq!(
            op.to_string(),
            "cryptsetup -v --type luks2 --cipher aes-xts-plain64 --key-size 512 -y luksFormat /dev/sda2"
        );
        assert!(op.is_fatal());
    }

    #[test]
    fn test_luks_open_mapped_device() {
        let args = LuksOpenArgs {
            device: "/dev/nvme0n1p2".into(),
            mapper_name: "cryptcontainer".into(),
        };
        assert_eq!(args.mapped_device(), "/dev/mapper/cryptcontainer");
        assert_eq!(
            args.to_operation().to_string(),
            "cryptsetup open --type luks /dev/nvme0n1p2 cryptcontainer"
        );
    }

    #[test]
    fn test_lvcreate_sizes() {
        let root = LvCreateArgs {
            volume_group: "vg0".into(),
            name: "root".into(),
            size: LvSize::Fixed("50G".into()),
        };
        assert_eq!(root.to_operation().to_string(), "lvcreate --size 50G vg0 --name root");
        assert_eq!(root.device(), "/dev/vg0/root");

        let home = LvCreateArgs {
            volume_group: "vg0".into(),
            name: "home".into(),
            size: LvSize::RemainingSpace,
        };
        assert_eq!(
            home.to_operation().to_string(),
            "lvcreate --extents 100%FREE vg0 --name home"
        );
    }

    #[test]
    fn test_cleanup_ops_are_tolerated() {
        assert!(!VgChangeArgs { activate: false }.to_operation().is_fatal());
        assert!(!LuksCloseArgs {
            mapper_name: "cryptcontainer".into()
        }
        .to_operation()
        .is_fatal());
    }

    #[test]
    fn test_parse_crypt_mappings() {
        assert!(parse_crypt_mappings("No devices found\n").is_empty());
        assert_eq!(
            parse_crypt_mappings("cryptcontainer\t(253:0)\nluks-home\t(253:3)\n"),
            vec!["cryptcontainer".to_string(), "luks-home".to_string()]
        );
    }
}
