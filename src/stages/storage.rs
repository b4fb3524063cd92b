//! Disk stages: partitioning, role assignment, LUKS/LVM, filesystems, mounts.

use crate::error::Result;
use crate::install_state::{InstallationState, VolumeLayout};
use crate::operation::Operation;
use crate::pipeline::{StageContext, StageOutcome};
use crate::stages::{ask_size, missing_roles_reason};
use crate::tools::disk::{
    Filesystem, MkfsArgs, MountArgs, MountKind, PartedArgs, PartedCommand, SwapOnArgs,
    lsblk_query, parse_lsblk, partition_path, plan_partitions, release_operations,
};
use crate::tools::encryption::{
    LuksCipher, LuksCloseArgs, LuksFormatArgs, LuksOpenArgs, LvCreateArgs, LvSize, PvCreateArgs,
    VgChangeArgs, VgCreateArgs, crypt_mappings_query, parse_crypt_mappings,
};
use crate::types::DeviceRole;

/// Release everything holding `disk`: mounts, swap, volume groups, LUKS
/// mappings. Every step is tolerated.
fn release_disk(ctx: &mut StageContext<'_>, disk: &str) -> Result<()> {
    ctx.info(&format!("Checking for mounted partitions on {}...", disk));
    let listing = ctx.run(lsblk_query(disk))?;
    let ops = release_operations(&parse_lsblk(&listing.stdout));
    if ops.is_empty() {
        ctx.info(&format!("No mounted partitions or active swap found on {}.", disk));
    }
    ctx.run_all(ops)?;

    ctx.info("Deactivating all LVM volume groups (if any)...");
    ctx.run_tool(&VgChangeArgs { activate: false })?;

    ctx.info("Closing all cryptsetup mappings (if any)...");
    let mappings = ctx.run(crypt_mappings_query())?;
    for mapper_name in parse_crypt_mappings(&mappings.stdout) {
        ctx.run_tool(&LuksCloseArgs { mapper_name })?;
    }
    Ok(())
}

pub fn partition_disk(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.say("This will WIPE the selected disk!");
    let disk = ctx.ask_line("Enter target disk (e.g., /dev/nvme0n1 or /dev/sda)")?;
    if disk.is_empty() {
        return Ok(StageOutcome::skipped("no target disk given"));
    }

    release_disk(ctx, &disk)?;

    if !ctx.ask_yes_no(&format!(
        "Partition and wipe {}? THIS WILL ERASE ALL DATA!",
        disk
    ))? {
        return Ok(StageOutcome::skipped("wipe not confirmed"));
    }

    let (_, efi_mib) = ask_size(ctx, "EFI partition size? Enter 512M or 1G", "512M", false)?;
    let (_, swap_mib) = ask_size(ctx, "Swap partition size? (e.g., 4G, 0 for none)", "4G", true)?;

    let Some(plan) = plan_partitions(&disk, efi_mib, swap_mib) else {
        ctx.say("[ERROR] EFI and swap sizes together do not fit on any disk.");
        return Ok(StageOutcome::skipped("partition sizes out of range"));
    };
    for args in plan {
        ctx.run_tool(&args)?;
    }
    ctx.run_tool(&PartedArgs {
        disk: disk.clone(),
        command: PartedCommand::Print,
    })?;

    let root_number = if swap_mib > 0 { 3 } else { 2 };
    ctx.info(&format!(
        "Layout: EFI {}, {}root {}",
        partition_path(&disk, 1),
        if swap_mib > 0 {
            format!("swap {}, ", partition_path(&disk, 2))
        } else {
            String::new()
        },
        partition_path(&disk, root_number)
    ));
    Ok(StageOutcome::Completed)
}

pub fn assign_devices(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let efi = ctx.ask_line("Enter EFI partition device (e.g., /dev/vda1)")?;
    state.assign_device(DeviceRole::Efi, efi)?;

    let root = ctx.ask_line("Enter root partition device (e.g., /dev/vda2)")?;
    state.assign_device(DeviceRole::Root, root)?;

    let home = if ctx.ask_yes_no("Do you have a separate home partition?")? {
        ctx.ask_line("Enter home partition device (e.g., /dev/vda3)")?
    } else {
        String::new()
    };
    state.assign_device(DeviceRole::Home, home)?;

    let swap = if ctx.ask_yes_no("Do you have a swap partition?")? {
        ctx.ask_line("Enter swap partition device (e.g., /dev/vda4)")?
    } else {
        String::new()
    };
    state.assign_device(DeviceRole::Swap, swap)?;

    ctx.say(&format!("Assigned devices:\n{}", state));
    Ok(StageOutcome::Completed)
}

pub fn encryption_lvm(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let config = ctx.config();
    let current_root = state.device(DeviceRole::Root).to_string();
    let partition = if current_root.is_empty() {
        ctx.ask_line("Enter LVM partition (e.g., /dev/nvme0n1p2 or /dev/sda2)")?
    } else {
        ctx.ask_line_or("Enter LVM partition", &current_root)?
    };
    if partition.is_empty() {
        return Ok(StageOutcome::skipped("no partition given for the encrypted container"));
    }

    ctx.run_tool(&LuksFormatArgs {
        device: partition.clone(),
        cipher: LuksCipher::default(),
    })?;
    let open = LuksOpenArgs {
        device: partition,
        mapper_name: config.luks_mapper.clone(),
    };
    ctx.run_tool(&open)?;

    let container = open.mapped_device();
    let vg = config.volume_group.as_str();
    ctx.run_tool(&PvCreateArgs {
        device: container.clone(),
    })?;
    ctx.run_tool(&VgCreateArgs {
        name: vg.to_string(),
        device: container,
    })?;

    let (swap_size, swap_mib) =
        ask_size(ctx, "Swap logical volume size? (e.g., 4G, 0 for none)", "4G", true)?;
    let with_swap = swap_mib > 0;

    let volume = |name: &str, size: LvSize| LvCreateArgs {
        volume_group: vg.to_string(),
        name: name.to_string(),
        size,
    };
    ctx.run_tool(&volume("root", LvSize::Fixed(config.root_lv_size.clone())))?;
    // Fixed-size volumes first: home takes whatever is left
    if with_swap {
        ctx.run_tool(&volume("swap", LvSize::Fixed(swap_size)))?;
    }
    ctx.run_tool(&volume("home", LvSize::RemainingSpace))?;
    ctx.run(Operation::new("lvdisplay"))?;

    let layout = VolumeLayout::in_group(vg, with_swap).on_container(open.device.as_str());
    state.enable_volume_manager(layout);
    ctx.say(&format!("Devices now backed by LVM:\n{}", state));
    Ok(StageOutcome::Completed)
}

pub fn create_filesystems(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    if let Some(reason) = missing_roles_reason(state) {
        ctx.say(&format!("[ERROR] {}. Skipping filesystem creation.", reason));
        return Ok(StageOutcome::Skipped(reason));
    }

    let mut jobs = vec![
        (DeviceRole::Efi, Filesystem::Vfat32),
        (DeviceRole::Root, Filesystem::Ext4),
    ];
    if state.has_device(DeviceRole::Home) {
        jobs.push((DeviceRole::Home, Filesystem::Ext4));
    }
    if state.is_swap_configured() {
        jobs.push((DeviceRole::Swap, Filesystem::Swap));
    }

    for (role, filesystem) in jobs {
        ctx.run_tool(&MkfsArgs {
            device: state.device(role).to_string(),
            filesystem,
        })?;
    }
    Ok(StageOutcome::Completed)
}

pub fn mount_filesystems(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    if let Some(reason) = missing_roles_reason(state) {
        ctx.say(&format!("[ERROR] {}. Skipping mounts.", reason));
        return Ok(StageOutcome::Skipped(reason));
    }

    let root = ctx.config().mount_root.to_string_lossy().into_owned();
    let mkdir = |path: &str| Operation::new("mkdir").args(["-p", path]);
    let boot = format!("{}/boot", root);
    let home = format!("{}/home", root);

    ctx.run(mkdir(&root))?;
    ctx.run_tool(&MountArgs::new(state.effective_root_device(), &root, MountKind::Device))?;
    ctx.run(mkdir(&boot))?;
    ctx.run_tool(&MountArgs::new(state.device(DeviceRole::Efi), &boot, MountKind::Device))?;

    if state.has_device(DeviceRole::Home) {
        ctx.run(mkdir(&home))?;
        ctx.run_tool(&MountArgs::new(state.device(DeviceRole::Home), &home, MountKind::Device))?;
    }
    if state.is_swap_configured() {
        ctx.run_tool(&SwapOnArgs {
            device: state.device(DeviceRole::Swap).to_string(),
        })?;
    }
    Ok(StageOutcome::Completed)
}
