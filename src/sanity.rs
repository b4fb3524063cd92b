//! Pre-flight checks on the live system.
//!
//! Before the first stage runs the installer must be root and the tools the
//! early host-side stages call must be on `PATH`. Tools only some stages use
//! are reported as warnings naming those stages.

use crate::error::{InstallerError, Result};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A live-system tool and where it comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub binary: &'static str,
    /// Gentoo package providing it
    pub package: &'static str,
    /// Stages that call it
    pub needed_by: &'static str,
}

const fn req(binary: &'static str, package: &'static str, needed_by: &'static str) -> Requirement {
    Requirement {
        binary,
        package,
        needed_by,
    }
}

/// Without these no installation gets past the live-system stages.
pub const REQUIRED: &[Requirement] = &[
    req("bash", "app-shells/bash", "every chroot stage"),
    req("parted", "sys-block/parted", "partition-disk"),
    req("lsblk", "sys-apps/util-linux", "partition-disk"),
    req("mkfs.ext4", "sys-fs/e2fsprogs", "create-filesystems"),
    req("mkfs.vfat", "sys-fs/dosfstools", "create-filesystems"),
    req("chroot", "sys-apps/coreutils", "every chroot stage"),
    req("curl", "net-misc/curl", "stage3"),
    req("tar", "app-arch/tar", "stage3"),
];

/// Missing ones only cost the stages that use them.
pub const OPTIONAL: &[Requirement] = &[
    req("cryptsetup", "sys-fs/cryptsetup", "encryption-lvm"),
    req("pvcreate", "sys-fs/lvm2", "encryption-lvm"),
    req("ntpdate", "net-misc/ntp", "set-clock"),
    req("mirrorselect", "app-portage/mirrorselect", "select-mirrors"),
];

/// What the checks found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub is_root: bool,
    pub missing_required: Vec<Requirement>,
    pub missing_optional: Vec<Requirement>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.is_root && self.missing_required.is_empty()
    }
}

/// First executable regular file called `name` in the `PATH`-style list.
pub fn find_in_path(name: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Check `REQUIRED` and `OPTIONAL` against `search_path`.
pub fn inspect(search_path: &OsStr, is_root: bool) -> PreflightReport {
    let missing = |list: &[Requirement]| -> Vec<Requirement> {
        list.iter()
            .filter(|r| find_in_path(r.binary, search_path).is_none())
            .copied()
            .collect()
    };
    PreflightReport {
        is_root,
        missing_required: missing(REQUIRED),
        missing_optional: missing(OPTIONAL),
    }
}

/// Inspect the running process's environment.
pub fn verify_environment() -> PreflightReport {
    let search_path = std::env::var_os("PATH").unwrap_or_default();
    inspect(&search_path, nix::unistd::geteuid().is_root())
}

fn print_failure(report: &PreflightReport) {
    eprintln!();
    eprintln!("==================================================================");
    eprintln!("              gentinstall - Pre-flight Check Failed");
    eprintln!("==================================================================");
    eprintln!();

    if !report.is_root {
        eprintln!("ERROR: Root privileges required");
        eprintln!("   The installer partitions disks and writes to the target root.");
        eprintln!("   Run it as root from the Gentoo live environment.");
        eprintln!();
    }

    if !report.missing_required.is_empty() {
        eprintln!("ERROR: Missing required tools");
        for r in &report.missing_required {
            eprintln!("   * {} ({}, used by {})", r.binary, r.package, r.needed_by);
        }
        eprintln!("   Install them with: emerge --ask <package>");
        eprintln!();
    }
}

/// `GENTINSTALL_SKIP_ROOT_CHECK=1` (or `true`) disables the root check.
pub fn should_skip_root_check() -> bool {
    std::env::var("GENTINSTALL_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Turn a report into the error `main` exits with.
///
/// A dry run executes nothing, so missing tools are only warned about.
pub fn evaluate(mut report: PreflightReport, skip_root: bool, dry_run: bool) -> Result<()> {
    for r in &report.missing_optional {
        tracing::warn!(binary = r.binary, package = r.package, stages = r.needed_by, "optional tool missing");
    }
    if skip_root {
        tracing::warn!("root check skipped");
        report.is_root = true;
    }
    if dry_run && !report.missing_required.is_empty() {
        let names: Vec<&str> = report.missing_required.iter().map(|r| r.binary).collect();
        tracing::warn!(missing = ?names, "dry run: ignoring missing tools");
        report.missing_required.clear();
    }

    if report.is_ok() {
        tracing::info!("pre-flight checks passed");
        return Ok(());
    }

    print_failure(&report);
    if !report.is_root {
        return Err(InstallerError::NotPrivileged);
    }
    Err(InstallerError::MissingTools(
        report
            .missing_required
            .iter()
            .map(|r| r.binary.to_string())
            .collect(),
    ))
}

/// Run the checks for `install`.
pub fn run_preflight_checks(skip_root: bool, dry_run: bool) -> Result<()> {
    tracing::debug!(skip_root, dry_run, "running pre-flight checks");
    evaluate(verify_environment(), skip_root || should_skip_root_check(), dry_run)
}
