//! Semantic content for configuration files.
//!
//! Stages decide *what* goes into a file; these functions render it. The
//! `writer` module decides how it reaches disk.

use crate::types::InitSystem;
use std::fmt;

/// make.conf block enabling binary packages from `binhost`.
pub fn binpkg_block(binhost: &str) -> String {
    format!(
        "\n# Enable binary package support (binpkg)\n\
         FEATURES=\"${{FEATURES}} binpkg-request-signature getbinpkg parallel-fetch parallel-install\"\n\
         BINHOST=\"{}\"\n",
        binhost
    )
}

/// Global USE flags matching the init system of the installed stage3.
pub fn init_use_flags(init: InitSystem) -> &'static [&'static str] {
    match init {
        InitSystem::Systemd => &["systemd", "-elogind"],
        InitSystem::Openrc => &["elogind", "-systemd"],
    }
}

/// Extra USE flags for the desktop stage3 flavors.
pub const DESKTOP_USE_FLAGS: &[&str] = &["X", "wayland", "dbus", "policykit", "pulseaudio"];

/// `package.use` file written right after the stage3 is unpacked.
pub fn stage3_package_use(init: InitSystem, desktop: bool) -> String {
    let mut out = format!(
        "# Init system: {}\n*/* {}\n",
        init,
        init_use_flags(init).join(" ")
    );
    if desktop {
        out.push_str(&format!("# Desktop profile\n*/* {}\n", DESKTOP_USE_FLAGS.join(" ")));
    }
    out
}

/// `package.use` line from `cpuid2cpuflags` output (`CPU_FLAGS_X86: aes avx …`).
pub fn cpu_flags_line(cpuid2cpuflags_output: &str) -> String {
    format!("*/* {}\n", cpuid2cpuflags_output.trim())
}

/// USE override so the bootloader stage can install systemd-boot.
///
/// On systemd the tool ships with `sys-apps/systemd`; on OpenRC it comes from
/// `sys-apps/systemd-utils`.
pub fn systemd_boot_package_use(init: InitSystem) -> &'static str {
    match init {
        InitSystem::Systemd => "sys-apps/systemd boot\n",
        InitSystem::Openrc => "sys-apps/systemd-utils boot\n",
    }
}

pub const PORTAGE_NICENESS: &str = "PORTAGE_NICENESS=\"15\"\n";

/// OpenRC console keymap (`/etc/conf.d/keymaps`).
pub fn keymaps_conf(keymap: &str) -> String {
    format!("keymap=\"{}\"\n", keymap)
}

/// systemd-networkd unit bringing up any wired interface with DHCP.
pub const DHCP_NETWORK_UNIT: &str = "[Match]\nName=en*\n\n[Network]\nDHCP=yes\n";

/// systemd unit applying powertop's tunables at boot.
pub const POWERTOP_UNIT: &str = "[Unit]\n\
Description=Powertop tunings\n\n\
[Service]\n\
Type=oneshot\n\
ExecStart=/usr/sbin/powertop --auto-tune\n\n\
[Install]\n\
WantedBy=multi-user.target\n";

/// OpenRC `local` script doing the same.
pub const POWERTOP_LOCAL_START: &str = "#!/bin/sh\n/usr/sbin/powertop --auto-tune\n";

/// systemd-boot `loader.conf`.
pub const LOADER_CONF: &str = "default gentoo.conf\ntimeout 3\n";

/// Starting point for the systemd-boot entry; the operator reviews it in the
/// editor right after it is written. `crypt_root` is only emitted when the
/// LUKS partition's UUID is known.
pub fn loader_entry(root_device: &str, volume_managed: bool, luks_uuid: Option<&str>) -> String {
    let mut options = format!("root={} rw", root_device);
    if volume_managed {
        options.push_str(" dolvm");
    }
    if let Some(uuid) = luks_uuid {
        options.push_str(&format!(" crypt_root=UUID={}", uuid));
    }
    format!(
        "title   Gentoo Linux\nlinux   /vmlinuz\ninitrd  /initramfs\noptions {}\n",
        options
    )
}

/// One `/etc/fstab` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// `UUID=…` when known, else the device path
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    /// Entry for `device`, preferring its filesystem UUID.
    pub fn new(device: &str, uuid: Option<&str>, mount_point: &str, fs_type: &str) -> Self {
        let source = match uuid.map(str::trim).filter(|u| !u.is_empty()) {
            Some(uuid) => format!("UUID={}", uuid),
            None => device.to_string(),
        };
        let (options, pass) = match (fs_type, mount_point) {
            ("swap", _) => ("sw", 0),
            (_, "/") => ("defaults,noatime", 1),
            ("vfat", _) => ("defaults,noatime,umask=0077", 2),
            _ => ("defaults,noatime", 2),
        };
        Self {
            source,
            mount_point: mount_point.to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
            dump: 0,
            pass,
        }
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<45} {:<10} {:<6} {:<28} {} {}",
            self.source, self.mount_point, self.fs_type, self.options, self.dump, self.pass
        )
    }
}

/// Full fstab body.
pub fn fstab(entries: &[FstabEntry]) -> String {
    let mut out = String::from("# <fs> <mountpoint> <type> <opts> <dump> <pass>\n");
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binpkg_block_mentions_binhost() {
        let block = binpkg_block("https://example.org/binpackages/");
        assert!(block.contains("getbinpkg"));
        assert!(block.contains("BINHOST=\"https://example.org/binpackages/\""));
        assert!(block.starts_with('\n'));
    }

    #[test]
    fn test_stage3_package_use_plain_vs_desktop() {
        let plain = stage3_package_use(InitSystem::Openrc, false);
        assert!(plain.contains("*/* elogind -systemd"));
        assert!(!plain.contains("wayland"));

        let desktop = stage3_package_use(InitSystem::Systemd, true);
        assert!(desktop.contains("*/* systemd -elogind"));
        assert!(desktop.contains("wayland"));
    }

    #[test]
    fn test_cpu_flags_line() {
        assert_eq!(
            cpu_flags_line("CPU_FLAGS_X86: aes avx sse4_2\n"),
            "*/* CPU_FLAGS_X86: aes avx sse4_2\n"
        );
    }

    #[test]
    fn test_fstab_entry_prefers_uuid() {
        let root = FstabEntry::new("/dev/sda2", Some("1234-abcd\n"), "/", "ext4");
        assert_eq!(root.source, "UUID=1234-abcd");
        assert_eq!(root.pass, 1);

        let swap = FstabEntry::new("/dev/vg0/swap", None, "none", "swap");
        assert_eq!(swap.source, "/dev/vg0/swap");
        assert_eq!(swap.options, "sw");
        assert_eq!(swap.pass, 0);
    }

    #[test]
    fn test_loader_entry_lvm_options() {
        assert!(loader_entry("/dev/sda2", false, None).contains("options root=/dev/sda2 rw\n"));
        assert!(loader_entry("/dev/vg0/root", true, None).contains("options root=/dev/vg0/root rw dolvm\n"));
        assert!(
            loader_entry("/dev/vg0/root", true, Some("abcd-1234"))
                .contains("rw dolvm crypt_root=UUID=abcd-1234\n")
        );
    }
}
