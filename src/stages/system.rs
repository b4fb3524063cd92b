//! Final configuration of the installed system: fstab, bootloader, accounts,
//! network, locale, time sync and post-install extras.
//!
//! Most of these stages branch on the init system chosen with the stage3
//! tarball. When no tarball was installed the init system is unknown and the
//! init-specific stages skip themselves.

use crate::error::Result;
use crate::install_state::InstallationState;
use crate::operation::Operation;
use crate::pipeline::{StageContext, StageOutcome};
use crate::stages::INIT_UNKNOWN;
use crate::templates::{
    DHCP_NETWORK_UNIT, FstabEntry, LOADER_CONF, PORTAGE_NICENESS, POWERTOP_LOCAL_START, POWERTOP_UNIT,
    fstab as render_fstab, keymaps_conf, loader_entry, systemd_boot_package_use,
};
use crate::tools::disk::split_partition;
use crate::tools::portage::EmergeArgs;
use crate::tools::system::{
    DEFAULT_EFI_LOADER, EfiBootDeleteArgs, EfiBootEntryArgs, EnableServiceArgs, PasswdArgs, UserAddArgs,
    validate_username,
};
use crate::types::{DeviceRole, InitSystem};

const MAKE_CONF: &str = "/etc/portage/make.conf";

/// Mount point and filesystem type of each role in fstab, in mount order.
const FSTAB_LAYOUT: &[(DeviceRole, &str, &str)] = &[
    (DeviceRole::Root, "/", "ext4"),
    (DeviceRole::Efi, "/boot", "vfat"),
    (DeviceRole::Home, "/home", "ext4"),
    (DeviceRole::Swap, "none", "swap"),
];

/// Portage configuration files offered for review after the extras.
const PORTAGE_FILES: &[&str] = &[
    "/etc/portage/package.accept_keywords",
    "/etc/portage/package.unmask",
    "/etc/portage/package.mask",
];

/// Utility set installed on request by the post-install stage.
const EXTRA_UTILITIES: &[&str] = &[
    "app-editors/vim",
    "sys-process/htop",
    "app-misc/screen",
    "app-portage/gentoolkit",
    "sys-apps/pciutils",
    "sys-apps/usbutils",
    "net-misc/wget",
];

/// Filesystem UUID of `device` as `blkid` reports it, if any.
fn filesystem_uuid(ctx: &mut StageContext<'_>, device: &str) -> Result<Option<String>> {
    let lookup = ctx.run(
        Operation::new("blkid")
            .args(["-s", "UUID", "-o", "value", device])
            .captured()
            .tolerated(),
    )?;
    let uuid = lookup.stdout.trim();
    Ok((lookup.success && !uuid.is_empty()).then(|| uuid.to_string()))
}

pub fn fstab(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    if !state.has_device(DeviceRole::Root) {
        return Ok(StageOutcome::skipped("root device not assigned"));
    }

    let mut entries = Vec::new();
    for (role, mount_point, fs_type) in FSTAB_LAYOUT {
        if !state.has_device(*role) {
            continue;
        }
        let device = state.device(*role).to_string();
        let uuid = filesystem_uuid(ctx, &device)?;
        entries.push(FstabEntry::new(&device, uuid.as_deref(), mount_point, fs_type));
    }

    ctx.write_target("/etc/fstab", &render_fstab(&entries))?;
    ctx.edit("/etc/fstab")?;
    Ok(StageOutcome::Completed)
}

pub fn mtab(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run(Operation::new("ln").args(["-sf", "/proc/self/mounts", "/etc/mtab"]))?;
    Ok(StageOutcome::Completed)
}

pub fn bootloader(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let efi = state.device(DeviceRole::Efi).to_string();
    if efi.is_empty() {
        return Ok(StageOutcome::skipped("EFI device not assigned"));
    }
    let Some(init) = state.init_system() else {
        return Ok(StageOutcome::skipped(INIT_UNKNOWN));
    };

    let provider = match init {
        InitSystem::Systemd => "sys-apps/systemd",
        InitSystem::Openrc => "sys-apps/systemd-utils",
    };
    ctx.write_target(
        "/etc/portage/package.use/systemd-boot",
        systemd_boot_package_use(init),
    )?;
    ctx.run_tool(&EmergeArgs::install([provider]).ask())?;

    ctx.run_tool(&EmergeArgs::install(["sys-libs/efivar"]).ask())?;
    ctx.run(Operation::new("efivar").arg("-l").tolerated())?;
    ctx.run(Operation::new("findmnt").arg("/boot").tolerated())?;
    ctx.run(Operation::new("bootctl").args(["--esp-path=/boot", "install"]))?;

    let luks_uuid = match state.encrypted_container() {
        Some(container) => filesystem_uuid(ctx, container)?,
        None => None,
    };
    if state.volume_manager_enabled() && luks_uuid.is_none() {
        ctx.info("Could not read the LUKS partition UUID. Add crypt_root=UUID=<uuid> to the options line.");
    }

    ctx.write_target("/boot/loader/loader.conf", LOADER_CONF)?;
    ctx.write_target(
        "/boot/loader/entries/gentoo.conf",
        &loader_entry(
            state.effective_root_device(),
            state.volume_manager_enabled(),
            luks_uuid.as_deref(),
        ),
    )?;
    ctx.edit("/boot/loader/loader.conf")?;
    ctx.edit("/boot/loader/entries/gentoo.conf")?;

    ctx.run_tool(&EmergeArgs::install(["sys-boot/efibootmgr"]).ask())?;
    ctx.run(Operation::new("efibootmgr").arg("-v"))?;

    if ctx.ask_yes_no("Delete an old boot entry?")? {
        let entry = ctx.ask_line("Enter the boot entry number to delete (e.g., 0003)")?;
        if !entry.is_empty() {
            ctx.run_tool(&EfiBootDeleteArgs { entry })?;
        }
    }

    match split_partition(&efi) {
        Some((disk, partition)) => {
            ctx.run_tool(&EfiBootEntryArgs {
                disk,
                partition,
                label: ctx.config().boot_label.clone(),
                loader: DEFAULT_EFI_LOADER.to_string(),
            })?;
        }
        None => ctx.say(&format!(
            "[ERROR] Cannot tell disk and partition number from '{}'; add the firmware entry by hand.",
            efi
        )),
    }
    Ok(StageOutcome::Completed)
}

pub fn enable_lvm2(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let service = match state.init_system() {
        Some(InitSystem::Systemd) => EnableServiceArgs::new(InitSystem::Systemd, "lvm2-monitor.service"),
        Some(InitSystem::Openrc) => EnableServiceArgs::new(InitSystem::Openrc, "lvm").at_boot(),
        None => return Ok(StageOutcome::skipped(INIT_UNKNOWN)),
    };
    ctx.run_tool(&service)?;
    Ok(StageOutcome::Completed)
}

pub fn root_password(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&PasswdArgs::default())?;
    Ok(StageOutcome::Completed)
}

pub fn add_user(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let username = loop {
        let name = ctx.ask_line("Enter username to add (blank to skip)")?;
        if name.is_empty() {
            return Ok(StageOutcome::skipped("no username given"));
        }
        match validate_username(&name) {
            Ok(()) => break name,
            Err(e) => ctx.say(&format!("[ERROR] Invalid username '{}': {}", name, e)),
        }
    };

    ctx.run_tool(&UserAddArgs::new(username.as_str()))?;
    ctx.run_tool(&PasswdArgs {
        username: Some(username),
    })?;
    ctx.run_tool(&EmergeArgs::install(["app-admin/sudo"]).ask())?;
    ctx.run(Operation::new("visudo"))?;
    Ok(StageOutcome::Completed)
}

fn install_network_manager(ctx: &mut StageContext<'_>, init: InitSystem) -> Result<()> {
    ctx.run_tool(&EmergeArgs::install(["net-misc/networkmanager"]).ask())?;
    ctx.run_tool(&EnableServiceArgs::new(init, "NetworkManager"))?;
    Ok(())
}

pub fn network(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let Some(init) = state.init_system() else {
        return Ok(StageOutcome::skipped(INIT_UNKNOWN));
    };

    match init {
        InitSystem::Systemd => {
            if ctx.ask_yes_no("Use systemd-networkd?")? {
                let unit = "/etc/systemd/network/50-dhcp.network";
                ctx.write_target(unit, DHCP_NETWORK_UNIT)?;
                ctx.edit(unit)?;
                ctx.run_tool(&EnableServiceArgs::new(init, "systemd-networkd.service"))?;
            } else {
                install_network_manager(ctx, init)?;
            }
        }
        InitSystem::Openrc => {
            if ctx.ask_yes_no("Use dhcpcd?")? {
                ctx.run_tool(&EmergeArgs::install(["net-misc/dhcpcd"]).ask())?;
                ctx.run_tool(&EnableServiceArgs::new(init, "dhcpcd"))?;
            } else {
                install_network_manager(ctx, init)?;
            }
        }
    }
    Ok(StageOutcome::Completed)
}

pub fn locale(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let Some(init) = state.init_system() else {
        return Ok(StageOutcome::skipped(INIT_UNKNOWN));
    };

    let keymap = ctx.ask_line_or("Console keymap", "us")?;
    match init {
        InitSystem::Systemd => {
            let lang = ctx.ask_line_or("System locale", "en_US.utf8")?;
            let lang = format!("LANG={}", lang);
            ctx.run(Operation::new("localectl").args(["set-locale", lang.as_str()]))?;
            ctx.run(Operation::new("localectl").args(["set-keymap", keymap.as_str()]))?;
            ctx.run(Operation::new("localectl").args(["set-x11-keymap", keymap.as_str()]))?;
        }
        InitSystem::Openrc => {
            ctx.write_target("/etc/conf.d/keymaps", &keymaps_conf(&keymap))?;
        }
    }
    Ok(StageOutcome::Completed)
}

pub fn time_sync(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    match state.init_system() {
        Some(InitSystem::Systemd) => {
            ctx.run(Operation::new("timedatectl").args(["set-ntp", "true"]))?;
            ctx.run(Operation::new("timedatectl").arg("status").tolerated())?;
            ctx.edit("/etc/systemd/timesyncd.conf")?;
        }
        Some(InitSystem::Openrc) => {
            ctx.run_tool(&EmergeArgs::install(["net-misc/chrony"]).ask())?;
            ctx.run_tool(&EnableServiceArgs::new(InitSystem::Openrc, "chronyd"))?;
        }
        None => return Ok(StageOutcome::skipped(INIT_UNKNOWN)),
    }
    Ok(StageOutcome::Completed)
}

pub fn post_install(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let Some(init) = state.init_system() else {
        return Ok(StageOutcome::skipped(INIT_UNKNOWN));
    };

    ctx.run_tool(&EmergeArgs::install(["sys-apps/plocate"]).ask())?;
    ctx.run(Operation::new("updatedb").tolerated())?;
    ctx.run_tool(
        &EmergeArgs::install([
            "sys-fs/xfsprogs",
            "sys-fs/exfatprogs",
            "sys-fs/dosfstools",
            "sys-fs/ntfs3g",
        ])
        .ask(),
    )?;

    ctx.run_tool(&EmergeArgs::install(["sys-power/powertop"]).ask())?;
    match init {
        InitSystem::Systemd => {
            ctx.write_target("/etc/systemd/system/powertop.service", POWERTOP_UNIT)?;
            ctx.run_tool(&EnableServiceArgs::new(init, "powertop.service"))?;
        }
        InitSystem::Openrc => {
            let script = "/etc/local.d/powertop.start";
            ctx.write_target(script, POWERTOP_LOCAL_START)?;
            ctx.run(Operation::new("chmod").args(["+x", script]))?;
            ctx.run_tool(&EnableServiceArgs::new(init, "local"))?;
        }
    }

    if ctx.ask_yes_no("Install extra utilities (vim, htop, screen, gentoolkit, ...)?")? {
        ctx.run_tool(&EmergeArgs::install(EXTRA_UTILITIES.iter().copied()).ask())?;
    }

    ctx.append_target(MAKE_CONF, &format!("\n{}", PORTAGE_NICENESS))?;
    ctx.edit(MAKE_CONF)?;
    if ctx.ask_yes_no("Review package.accept_keywords, package.unmask and package.mask?")? {
        for file in PORTAGE_FILES {
            ctx.edit(file)?;
        }
    }
    Ok(StageOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install_state::VolumeLayout;
    use crate::test_support::{RecordingRunner, StageHarness};

    fn with_init(answers: &[&str], init: InitSystem) -> StageHarness {
        let mut h = StageHarness::new(answers.iter().copied());
        h.state.set_init_system(init).expect("set init");
        h
    }

    #[test]
    fn test_fstab_uses_uuids_and_skips_unset_roles() {
        let mut h = StageHarness::new(Vec::<String>::new());
        h.runner = RecordingRunner::new()
            .with_output("value /dev/sda1", "AAAA-BBBB\n")
            .with_output("value /dev/sda2", "1111-2222\n");
        h.state.assign_device(DeviceRole::Efi, "/dev/sda1").expect("assign");
        h.state.assign_device(DeviceRole::Root, "/dev/sda2").expect("assign");

        h.run_in_target(fstab).expect("stage runs");

        let table = h.written("/etc/fstab").expect("fstab written");
        let lines: Vec<&str> = table.lines().skip(1).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("UUID=1111-2222"));
        assert!(lines[1].starts_with("UUID=AAAA-BBBB"));
        assert!(lines[1].contains("/boot"));
        assert!(!table.contains("swap"));
    }

    #[test]
    fn test_fstab_falls_back_to_device_path() {
        let mut h = StageHarness::new(Vec::<String>::new());
        h.runner = RecordingRunner::new().fail_on("blkid");
        h.state.assign_device(DeviceRole::Root, "/dev/sda2").expect("assign");
        h.run_in_target(fstab).expect("stage runs");
        let table = h.written("/etc/fstab").expect("fstab written");
        assert!(table.lines().nth(1).is_some_and(|l| l.starts_with("/dev/sda2 ")));
    }

    #[test]
    fn test_bootloader_entry_from_efi_device() {
        let mut h = with_init(&["n"], InitSystem::Openrc);
        h.state.assign_device(DeviceRole::Efi, "/dev/nvme0n1p1").expect("assign");
        h.state.enable_volume_manager(VolumeLayout::in_group("vg0", true));

        h.run_in_target(bootloader).expect("stage runs");

        assert_eq!(
            h.written("/etc/portage/package.use/systemd-boot"),
            Some("sys-apps/systemd-utils boot\n")
        );
        assert!(h.runner.ran("bootctl --esp-path=/boot install"));
        assert!(h.runner.ran("efibootmgr -c -d /dev/nvme0n1 -p 1 -L Gentoo"));
        let entry = h.written("/boot/loader/entries/gentoo.conf").expect("entry written");
        assert!(entry.contains("root=/dev/vg0/root"));
        assert!(entry.contains("dolvm"));
        assert!(!entry.contains("crypt_root"));
        assert!(h.console.transcript().iter().any(|l| l.contains("Add crypt_root=UUID=")));
    }

    #[test]
    fn test_bootloader_entry_names_luks_partition_uuid() {
        let mut h = with_init(&["n"], InitSystem::Systemd);
        h.runner = RecordingRunner::new().with_output("value /dev/sda2", "5f3c-luks\n");
        h.state.assign_device(DeviceRole::Efi, "/dev/sda1").expect("assign");
        h.state
            .enable_volume_manager(VolumeLayout::in_group("vg0", false).on_container("/dev/sda2"));

        h.run_in_target(bootloader).expect("stage runs");

        let entry = h.written("/boot/loader/entries/gentoo.conf").expect("entry written");
        assert!(entry.contains("options root=/dev/vg0/root rw dolvm crypt_root=UUID=5f3c-luks\n"));
        assert!(!entry.contains('<'));
    }

    #[test]
    fn test_bootloader_deletes_requested_entry() {
        let mut h = with_init(&["y", "0003"], InitSystem::Systemd);
        h.state.assign_device(DeviceRole::Efi, "/dev/sda1").expect("assign");
        h.run_in_target(bootloader).expect("stage runs");
        assert!(h.runner.ran("efibootmgr -b 0003 -B"));
        assert!(h.runner.ran("efibootmgr -c -d /dev/sda -p 1"));
    }

    #[test]
    fn test_bootloader_needs_init() {
        let mut h = StageHarness::new(Vec::<String>::new());
        h.state.assign_device(DeviceRole::Efi, "/dev/sda1").expect("assign");
        let outcome = h.run_in_target(bootloader).expect("stage runs");
        assert_eq!(outcome, StageOutcome::skipped(INIT_UNKNOWN));
        assert!(h.runner.commands().is_empty());
    }

    #[test]
    fn test_enable_lvm2_per_init() {
        let mut h = with_init(&[], InitSystem::Openrc);
        h.run_in_target(enable_lvm2).expect("stage runs");
        assert!(h.runner.ran("rc-update add lvm boot"));

        let mut h = with_init(&[], InitSystem::Systemd);
        h.run_in_target(enable_lvm2).expect("stage runs");
        assert!(h.runner.ran("systemctl enable lvm2-monitor.service"));
    }

    #[test]
    fn test_add_user_reasks_invalid_name() {
        let mut h = StageHarness::new(["Bad Name", "alice"]);
        h.run_in_target(add_user).expect("stage runs");
        assert!(h.runner.ran("useradd -m -G users,wheel,audio,video,usb -s /bin/bash alice"));
        assert!(h.runner.ran("passwd alice"));
        assert!(h.runner.ran("visudo"));
        assert!(h
            .console
            .transcript()
            .iter()
            .any(|line| line.starts_with("[ERROR] Invalid username 'Bad Name'")));
    }

    #[test]
    fn test_network_systemd_networkd() {
        let mut h = with_init(&["y"], InitSystem::Systemd);
        h.run_in_target(network).expect("stage runs");
        assert_eq!(
            h.written("/etc/systemd/network/50-dhcp.network"),
            Some(DHCP_NETWORK_UNIT)
        );
        assert!(h.runner.ran("systemctl enable systemd-networkd.service"));
    }

    #[test]
    fn test_network_openrc_dhcpcd() {
        let mut h = with_init(&["y"], InitSystem::Openrc);
        h.run_in_target(network).expect("stage runs");
        assert!(h.runner.ran("emerge --ask net-misc/dhcpcd"));
        assert!(h.runner.ran("rc-update add dhcpcd default"));
    }

    #[test]
    fn test_locale_openrc_writes_keymaps() {
        let mut h = with_init(&["de"], InitSystem::Openrc);
        h.run_in_target(locale).expect("stage runs");
        assert_eq!(h.written("/etc/conf.d/keymaps"), Some("keymap=\"de\"\n"));
        assert!(!h.runner.ran("localectl"));
    }

    #[test]
    fn test_locale_systemd_defaults() {
        let mut h = with_init(&["", ""], InitSystem::Systemd);
        h.run_in_target(locale).expect("stage runs");
        assert!(h.runner.ran("localectl set-locale LANG=en_US.utf8"));
        assert!(h.runner.ran("localectl set-x11-keymap us"));
    }

    #[test]
    fn test_time_sync_openrc_uses_chrony() {
        let mut h = with_init(&[], InitSystem::Openrc);
        h.run_in_target(time_sync).expect("stage runs");
        assert!(h.runner.ran("rc-update add chronyd default"));
    }

    #[test]
    fn test_post_install_appends_niceness() {
        let mut h = with_init(&["n", "n"], InitSystem::Openrc);
        h.run_in_target(post_install).expect("stage runs");
        assert_eq!(h.written(MAKE_CONF), Some("\nPORTAGE_NICENESS=\"15\"\n"));
        assert_eq!(h.written("/etc/local.d/powertop.start"), Some(POWERTOP_LOCAL_START));
        assert!(h.runner.ran("rc-update add local default"));
        assert!(!h.runner.ran("app-editors/vim"));
    }
}
