//! Disk-Readiness Guard
//!
//! Package builds unpack tens of gigabytes into the portage temp area. On a
//! live ISO `/tmp` and `/var/tmp` are RAM-backed, so a build that lands there
//! dies halfway through. The guard refuses to proceed unless the directory is
//! real, sits on a disk-backed filesystem and has enough free space.

use crate::error::{InstallerError, Result};
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Filesystem types that live in memory (or on top of it).
pub const VOLATILE_FILESYSTEMS: &[&str] = &["tmpfs", "overlay", "aufs", "ramfs"];

/// Default free-space threshold: 10 GiB.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn new(mount_point: impl Into<PathBuf>, fs_type: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            fs_type: fs_type.into(),
        }
    }

    pub fn is_volatile(&self) -> bool {
        VOLATILE_FILESYSTEMS.contains(&self.fs_type.as_str())
    }
}

/// Host facts the guard depends on.
pub trait DiskProbe {
    /// Current mount table, in mount order.
    fn mounts(&self) -> io::Result<Vec<MountEntry>>;

    /// Bytes available to unprivileged users on the filesystem holding `path`.
    fn free_bytes(&self, path: &Path) -> io::Result<u64>;

    /// Detach the mount at `path`.
    fn unmount(&mut self, path: &Path) -> io::Result<()>;
}

/// `DiskProbe` over `/proc/self/mounts`, `statvfs(2)` and `umount2(2)`.
#[derive(Debug, Default)]
pub struct HostProbe;

impl DiskProbe for HostProbe {
    fn mounts(&self) -> io::Result<Vec<MountEntry>> {
        Ok(parse_mounts(&fs::read_to_string(MOUNT_TABLE)?))
    }

    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    fn unmount(&mut self, path: &Path) -> io::Result<()> {
        nix::mount::umount2(path, nix::mount::MntFlags::MNT_DETACH)?;
        Ok(())
    }
}

/// Parse `/proc/self/mounts` content.
///
/// Mount points escape space, tab, newline and backslash as octal (`\040`).
pub fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountEntry::new(unescape_mount_path(mount_point), fs_type))
        })
        .collect()
}

fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(value) = raw
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// The mount whose mount point is the longest prefix of `path`.
///
/// Later entries win on ties, matching how stacked mounts shadow earlier
/// ones.
pub fn backing_mount<'a>(mounts: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    mounts
        .iter()
        .filter(|entry| path.starts_with(&entry.mount_point))
        .fold(None, |best: Option<&MountEntry>, entry| match best {
            Some(current)
                if current.mount_point.components().count()
                    > entry.mount_point.components().count() =>
            {
                Some(current)
            }
            _ => Some(entry),
        })
}

/// Verdict on one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardReport {
    pub path: PathBuf,
    pub ok: bool,
    pub reason: String,
}

impl GuardReport {
    fn pass(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            ok: true,
            reason: reason.into(),
        }
    }

    fn fail(path: &Path, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            ok: false,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for GuardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.ok { "OK" } else { "NOT READY" };
        write!(f, "[{}] {}: {}", verdict, self.path.display(), self.reason)
    }
}

/// The guard itself: a threshold plus the dry-run switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGuard {
    pub min_free_bytes: u64,
    /// Report failures as warnings and never modify mounts
    pub dry_run: bool,
}

impl Default for DiskGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_FREE_BYTES)
    }
}

impl DiskGuard {
    pub fn new(min_free_bytes: u64) -> Self {
        Self {
            min_free_bytes,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Check `path`: a real directory, on a disk-backed filesystem, with at
    /// least `min_free_bytes` available (boundary inclusive).
    pub fn verify(&self, probe: &dyn DiskProbe, path: &Path) -> GuardReport {
        match fs::symlink_metadata(path) {
            Err(e) => return GuardReport::fail(path, format!("cannot stat: {}", e)),
            Ok(meta) if meta.file_type().is_symlink() => {
                return GuardReport::fail(path, "is a symlink");
            }
            Ok(meta) if !meta.is_dir() => return GuardReport::fail(path, "not a directory"),
            Ok(_) => {}
        }

        let resolved = match fs::canonicalize(path) {
            Ok(p) => p,
            Err(e) => return GuardReport::fail(path, format!("cannot resolve: {}", e)),
        };

        let mounts = match probe.mounts() {
            Ok(m) => m,
            Err(e) => return GuardReport::fail(path, format!("cannot read mount table: {}", e)),
        };
        let fs_type = match backing_mount(&mounts, &resolved) {
            Some(entry) if entry.is_volatile() => {
                return GuardReport::fail(
                    path,
                    format!(
                        "backed by {} mounted at {}",
                        entry.fs_type,
                        entry.mount_point.display()
                    ),
                );
            }
            Some(entry) => entry.fs_type.clone(),
            None => "unknown".to_string(),
        };

        let free = match probe.free_bytes(&resolved) {
            Ok(bytes) => bytes,
            Err(e) => return GuardReport::fail(path, format!("statvfs failed: {}", e)),
        };
        if free < self.min_free_bytes {
            return GuardReport::fail(
                path,
                format!(
                    "only {} free, need {}",
                    format_bytes(free),
                    format_bytes(self.min_free_bytes)
                ),
            );
        }

        GuardReport::pass(path, format!("{} with {} free", fs_type, format_bytes(free)))
    }

    /// `verify`, turning a failing report into `DiskNotReady`.
    pub fn require(&self, probe: &dyn DiskProbe, path: &Path) -> Result<GuardReport> {
        let report = self.verify(probe, path);
        if report.ok {
            tracing::info!(path = %path.display(), reason = %report.reason, "disk ready");
            return Ok(report);
        }
        if self.dry_run {
            tracing::warn!(path = %path.display(), reason = %report.reason, "[DRY RUN] disk not ready");
            return Ok(report);
        }
        tracing::error!(path = %path.display(), reason = %report.reason, "disk not ready");
        Err(InstallerError::disk_not_ready(path, report.reason))
    }

    /// If a volatile filesystem is mounted exactly at `path`, unmount it.
    /// Afterwards the directory exists with mode `1777`.
    pub fn ensure_disk_backed(&self, probe: &mut dyn DiskProbe, path: &Path) -> Result<()> {
        let mounts = probe.mounts()?;
        let lookup = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if let Some(entry) = mounts
            .iter()
            .rev()
            .find(|entry| entry.mount_point == lookup)
            .filter(|entry| entry.is_volatile())
        {
            if self.dry_run {
                tracing::info!(path = %path.display(), fs = %entry.fs_type, "[DRY RUN] would unmount");
                return Ok(());
            }
            tracing::warn!(path = %path.display(), fs = %entry.fs_type, "unmounting volatile filesystem");
            probe.unmount(&lookup).map_err(|e| {
                InstallerError::disk_not_ready(path, format!("cannot unmount {}: {}", entry.fs_type, e))
            })?;
        }

        if self.dry_run {
            return Ok(());
        }
        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o1777))?;
        Ok(())
    }
}

/// Human-readable byte count (binary units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mounts_decodes_escapes() {
        let table = "\
sysfs /sys sysfs rw,nosuid 0 0
/dev/sda2 / ext4 rw,relatime 0 0
tmpfs /tmp tmpfs rw 0 0
/dev/sdb1 /media/my\\040disk vfat rw 0 0
";
        let mounts = parse_mounts(table);
        assert_eq!(mounts.len(), 4);
        assert_eq!(mounts[2], MountEntry::new("/tmp", "tmpfs"));
        assert_eq!(mounts[3].mount_point, PathBuf::from("/media/my disk"));
    }

    #[test]
    fn test_backing_mount_longest_prefix() {
        let mounts = vec![
            MountEntry::new("/", "ext4"),
            MountEntry::new("/mnt/gentoo", "xfs"),
            MountEntry::new("/mnt/gentoo/var/tmp", "tmpfs"),
        ];
        let entry = backing_mount(&mounts, Path::new("/mnt/gentoo/var/tmp/portage")).expect("mount");
        assert_eq!(entry.fs_type, "tmpfs");

        let entry = backing_mount(&mounts, Path::new("/mnt/gentoo/usr")).expect("mount");
        assert_eq!(entry.fs_type, "xfs");

        // Component-wise: /mnt/gentoo-old is not under /mnt/gentoo
        let entry = backing_mount(&mounts, Path::new("/mnt/gentoo-old")).expect("mount");
        assert_eq!(entry.fs_type, "ext4");
    }

    #[test]
    fn test_stacked_mount_later_wins() {
        let mounts = vec![MountEntry::new("/tmp", "ext4"), MountEntry::new("/tmp", "tmpfs")];
        assert_eq!(
            backing_mount(&mounts, Path::new("/tmp/x")).map(|e| e.fs_type.as_str()),
            Some("tmpfs")
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(DEFAULT_MIN_FREE_BYTES), "10.0 GiB");
    }
}
