//! Type-safe arguments for partitioning, formatting and mounting.
//!
//! - `PartedArgs` for `parted --script`
//! - `MkfsArgs` for `mkfs.vfat`, `mkfs.ext4` and `mkswap`
//! - `MountArgs` for device, proc and bind mounts
//! - `SwapOnArgs` for `swapon`
//!
//! plus helpers for the disk release that precedes partitioning.

use crate::operation::{Operation, ToolArgs};

/// First usable MiB; partitions start here for alignment.
pub const PARTITION_START_MIB: u64 = 1;

/// Largest size the installer accepts for a partition or volume (1 PiB).
pub const MAX_SIZE_MIB: u64 = 1 << 30;

/// Parse a size such as `512M`, `512MiB`, `4G`, `1T` or a bare number of MiB
/// into MiB. `0` is a valid size meaning "none".
///
/// # Example
///
/// ```
/// use gentinstall::tools::disk::parse_size_mib;
///
/// assert_eq!(parse_size_mib("512M"), Some(512));
/// assert_eq!(parse_size_mib("4G"), Some(4096));
/// assert_eq!(parse_size_mib("1GiB"), Some(1024));
/// assert_eq!(parse_size_mib("lots"), None);
/// ```
pub fn parse_size_mib(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let value: u64 = digits.parse().ok()?;

    let factor = match unit.to_ascii_lowercase().as_str() {
        "" | "m" | "mb" | "mib" => 1,
        "g" | "gb" | "gib" => 1024,
        "t" | "tb" | "tib" => 1024 * 1024,
        _ => return None,
    };
    value.checked_mul(factor)
}

/// Device path of partition `number` on `disk`.
///
/// Disks whose name ends in a digit (`nvme0n1`, `mmcblk0`, `loop0`) take a
/// `p` separator.
pub fn partition_path(disk: &str, number: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, number)
    } else {
        format!("{}{}", disk, number)
    }
}

/// Split a partition path into its disk and partition number.
///
/// # Example
///
/// ```
/// use gentinstall::tools::disk::split_partition;
///
/// assert_eq!(split_partition("/dev/sda1"), Some(("/dev/sda".to_string(), 1)));
/// assert_eq!(split_partition("/dev/nvme0n1p2"), Some(("/dev/nvme0n1".to_string(), 2)));
/// assert_eq!(split_partition("/dev/sda"), None);
/// ```
pub fn split_partition(device: &str) -> Option<(String, u32)> {
    let device = device.trim();
    let digits_at = device.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits_at == device.len() {
        return None;
    }
    let number: u32 = device[digits_at..].parse().ok()?;
    let stem = &device[..digits_at];

    // nvme0n1p2 / mmcblk0p1: strip the `p` only when it follows a digit
    let disk = match stem.strip_suffix('p') {
        Some(base) if base.ends_with(|c: char| c.is_ascii_digit()) => base,
        _ => stem,
    };
    if disk.is_empty() || disk.ends_with('/') {
        return None;
    }
    Some((disk.to_string(), number))
}

/// Where a partition ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartEnd {
    Mib(u64),
    /// Remainder of the disk
    Rest,
}

/// One `parted --script` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartedCommand {
    MkLabelGpt,
    MkPart {
        name: &'static str,
        fs_type: &'static str,
        start_mib: u64,
        end: PartEnd,
    },
    /// `set <number> <flag> on`
    SetFlag { number: u32, flag: &'static str },
    Print,
}

/// Type-safe arguments for `parted`.
///
/// # Field to Flag Mapping
///
/// | Rust Field | Argument             | Notes |
/// |------------|----------------------|-------|
/// | (always)   | `--script`           | Never prompt |
/// | `disk`     | positional           | Whole disk, e.g. `/dev/sda` |
/// | `command`  | trailing words       | `mkpart efi fat32 1MiB 513MiB` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartedArgs {
    pub disk: String,
    pub command: PartedCommand,
}

impl ToolArgs for PartedArgs {
    fn to_operation(&self) -> Operation {
        let op = Operation::new("parted").args(["--script", self.disk.as_str()]);
        match &self.command {
            PartedCommand::MkLabelGpt => op.args(["mklabel", "gpt"]),
            PartedCommand::MkPart {
                name,
                fs_type,
                start_mib,
                end,
            } => {
                let end = match end {
                    PartEnd::Mib(mib) => format!("{}MiB", mib),
                    PartEnd::Rest => "100%".to_string(),
                };
                op.args([
                    "mkpart".to_string(),
                    name.to_string(),
                    fs_type.to_string(),
                    format!("{}MiB", start_mib),
                    end,
                ])
            }
            PartedCommand::SetFlag { number, flag } => {
                op.args(["set".to_string(), number.to_string(), flag.to_string(), "on".to_string()])
            }
            PartedCommand::Print => op.arg("print"),
        }
    }
}

/// GPT layout: EFI system partition, optional swap, root filling the rest.
///
/// Boundaries are computed in MiB from the requested sizes, so a `4G` swap
/// is 4 GiB long rather than ending at the 4 GiB mark. `None` when a
/// boundary would not fit in a `u64`.
pub fn plan_partitions(disk: &str, efi_mib: u64, swap_mib: u64) -> Option<Vec<PartedArgs>> {
    let efi_end = PARTITION_START_MIB.checked_add(efi_mib)?;
    let mut commands = vec![
        PartedCommand::MkLabelGpt,
        PartedCommand::MkPart {
            name: "efi",
            fs_type: "fat32",
            start_mib: PARTITION_START_MIB,
            end: PartEnd::Mib(efi_end),
        },
        PartedCommand::SetFlag {
            number: 1,
            flag: "esp",
        },
    ];

    let root_start = if swap_mib > 0 {
        let swap_end = efi_end.checked_add(swap_mib)?;
        commands.push(PartedCommand::MkPart {
            name: "swap",
            fs_type: "linux-swap",
            start_mib: efi_end,
            end: PartEnd::Mib(swap_end),
        });
        swap_end
    } else {
        efi_end
    };

    commands.push(PartedCommand::MkPart {
        name: "root",
        fs_type: "ext4",
        start_mib: root_start,
        end: PartEnd::Rest,
    });

    Some(
        commands
            .into_iter()
            .map(|command| PartedArgs {
                disk: disk.to_string(),
                command,
            })
            .collect(),
    )
}

/// Filesystem to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filesystem {
    /// FAT32 for the EFI system partition
    Vfat32,
    Ext4,
    Swap,
}

/// Type-safe arguments for the mkfs family.
///
/// | `filesystem` | Command                 |
/// |--------------|-------------------------|
/// | `Vfat32`     | `mkfs.vfat -F32 <dev>`  |
/// | `Ext4`       | `mkfs.ext4 <dev>`       |
/// | `Swap`       | `mkswap <dev>`          |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsArgs {
    pub device: String,
    pub filesystem: Filesystem,
}

impl ToolArgs for MkfsArgs {
    fn to_operation(&self) -> Operation {
        match self.filesystem {
            Filesystem::Vfat32 => Operation::new("mkfs.vfat").args(["-F32", self.device.as_str()]),
            Filesystem::Ext4 => Operation::new("mkfs.ext4").arg(self.device.as_str()),
            Filesystem::Swap => Operation::new("mkswap").arg(self.device.as_str()),
        }
    }
}

/// Kind of mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Plain block device mount
    Device,
    /// `--types proc`
    Proc,
    /// `--rbind`
    RecursiveBind,
    /// `--bind`
    Bind,
    /// `--make-rslave` on an existing mount (source unused)
    MakeRslave,
    /// `--make-slave` on an existing mount (source unused)
    MakeSlave,
}

/// Type-safe arguments for `mount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountArgs {
    pub source: String,
    pub target: String,
    pub kind: MountKind,
}

impl MountArgs {
    pub fn new(source: impl Into<String>, target: impl Into<String>, kind: MountKind) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            kind,
        }
    }
}

impl ToolArgs for MountArgs {
    fn to_operation(&self) -> Operation {
        let op = Operation::new("mount");
        let (source, target) = (self.source.as_str(), self.target.as_str());
        match self.kind {
            MountKind::Device => op.args([source, target]),
            MountKind::Proc => op.args(["--types", "proc", source, target]),
            MountKind::RecursiveBind => op.args(["--rbind", source, target]),
            MountKind::Bind => op.args(["--bind", source, target]),
            MountKind::MakeRslave => op.args(["--make-rslave", target]),
            MountKind::MakeSlave => op.args(["--make-slave", target]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOnArgs {
    pub device: String,
}

impl ToolArgs for SwapOnArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("swapon").arg(self.device.as_str())
    }
}

/// A device row from `lsblk -lnp -o NAME,TYPE,MOUNTPOINT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub path: String,
    pub kind: String,
    pub mountpoint: Option<String>,
}

impl BlockDevice {
    pub fn is_swap(&self) -> bool {
        self.mountpoint.as_deref() == Some("[SWAP]")
    }

    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some() && !self.is_swap()
    }
}

/// Query listing `disk` and everything stacked on it.
pub fn lsblk_query(disk: &str) -> Operation {
    Operation::new("lsblk")
        .args(["-lnp", "-o", "NAME,TYPE,MOUNTPOINT", disk])
        .captured()
        .tolerated()
}

/// Parse `lsblk -lnp -o NAME,TYPE,MOUNTPOINT` output.
pub fn parse_lsblk(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let path = fields.next()?.to_string();
            let kind = fields.next()?.to_string();
            let rest: Vec<&str> = fields.collect();
            let mountpoint = if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            };
            Some(BlockDevice {
                path,
                kind,
                mountpoint,
            })
        })
        .collect()
}

/// Tolerated operations freeing `devices` for repartitioning: lazy unmounts
/// (deepest mount point first), then swapoff.
pub fn release_operations(devices: &[BlockDevice]) -> Vec<Operation> {
    let mut mounted: Vec<&BlockDevice> = devices.iter().filter(|d| d.is_mounted()).collect();
    mounted.sort_by_key(|d| {
        std::cmp::Reverse(d.mountpoint.as_deref().map(|m| m.matches('/').count()).unwrap_or(0))
    });

    let unmounts = mounted
        .into_iter()
        .map(|d| Operation::new("umount").args(["-lf", d.path.as_str()]).tolerated());
    let swapoffs = devices
        .iter()
        .filter(|d| d.is_swap())
        .map(|d| Operation::new("swapoff").arg(d.path.as_str()).tolerated());

    unmounts.chain(swapoffs).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_mib() {
        assert_eq!(parse_size_mib("0"), Some(0));
        assert_eq!(parse_size_mib("512"), Some(512));
        assert_eq!(parse_size_mib(" 1G "), Some(1024));
        assert_eq!(parse_size_mib("2t"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size_mib("G"), None);
        assert_eq!(parse_size_mib("1.5G"), None);
        assert_eq!(parse_size_mib("4X"), None);
    }

    #[test]
    fn test_partition_path() {
        assert_eq!(partition_path("/dev/sda", 2), "/dev/sda2");
        assert_eq!(partition_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_path("/dev/mmcblk0", 3), "/dev/mmcblk0p3");
    }

    #[test]
    fn test_split_partition() {
        assert_eq!(split_partition("/dev/vda12"), Some(("/dev/vda".to_string(), 12)));
        assert_eq!(split_partition("/dev/mmcblk0p1"), Some(("/dev/mmcblk0".to_string(), 1)));
        assert_eq!(split_partition(""), None);
        assert_eq!(split_partition("/dev/1"), None);
    }

    #[test]
    fn test_plan_with_swap_uses_lengths() {
        let plan: Vec<String> = plan_partitions("/dev/sda", 512, 4096)
            .expect("sizes fit")
            .iter()
            .map(|p| p.to_operation().to_string())
            .collect();
        assert_eq!(
            plan,
            vec![
                "parted --script /dev/sda mklabel gpt",
                "parted --script /dev/sda mkpart efi fat32 1MiB 513MiB",
                "parted --script /dev/sda set 1 esp on",
                "parted --script /dev/sda mkpart swap linux-swap 513MiB 4609MiB",
                "parted --script /dev/sda mkpart root ext4 4609MiB 100%",
            ]
        );
    }

    #[test]
    fn test_plan_without_swap() {
        let plan = plan_partitions("/dev/nvme0n1", 1024, 0).expect("sizes fit");
        assert_eq!(plan.len(), 4);
        assert_eq!(
            plan[3].to_operation().to_string(),
            "parted --script /dev/nvme0n1 mkpart root ext4 1025MiB 100%"
        );
    }

    #[test]
    fn test_plan_rejects_overflowing_boundaries() {
        assert!(plan_partitions("/dev/sda", u64::MAX, 0).is_none());
        assert!(plan_partitions("/dev/sda", 512, u64::MAX - 100).is_none());
        assert!(plan_partitions("/dev/sda", MAX_SIZE_MIB, MAX_SIZE_MIB).is_some());
    }

    #[test]
    fn test_mkfs_commands() {
        let efi = MkfsArgs {
            device: "/dev/sda1".into(),
            filesystem: Filesystem::Vfat32,
        };
        assert_eq!(efi.to_operation().to_string(), "mkfs.vfat -F32 /dev/sda1");

        let swap = MkfsArgs {
            device: "/dev/vg0/swap".into(),
            filesystem: Filesystem::Swap,
        };
        assert_eq!(swap.to_operation().to_string(), "mkswap /dev/vg0/swap");
    }

    #[test]
    fn test_mount_kinds() {
        let proc = MountArgs::new("/proc", "/mnt/gentoo/proc", MountKind::Proc);
        assert_eq!(
            proc.to_operation().to_string(),
            "mount --types proc /proc /mnt/gentoo/proc"
        );
        let slave = MountArgs::new("", "/mnt/gentoo/sys", MountKind::MakeRslave);
        assert_eq!(slave.to_operation().to_string(), "mount --make-rslave /mnt/gentoo/sys");
    }

    #[test]
    fn test_release_unmounts_deepest_first_then_swapoff() {
        let output = "\
/dev/sda disk
/dev/sda1 part /mnt/gentoo/boot
/dev/sda2 part [SWAP]
/dev/sda3 part /mnt/gentoo
";
        let devices = parse_lsblk(output);
        assert_eq!(devices.len(), 4);

        let ops: Vec<String> = release_operations(&devices)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            ops,
            vec!["umount -lf /dev/sda1", "umount -lf /dev/sda3", "swapoff /dev/sda2"]
        );
        assert!(release_operations(&devices).iter().all(|op| !op.is_fatal()));
    }
}
