//! The stage catalogue.
//!
//! `default_registry` lists every installation stage in execution order with
//! its enablement rule, declared state reads/writes, execution scope and
//! whether the Disk-Readiness Guard wraps it. The procedures live in the
//! submodules, grouped by installation phase.

pub mod bootstrap;
pub mod portage;
pub mod storage;
pub mod system;

use crate::error::Result;
use crate::install_state::InstallationState;
use crate::pipeline::{Enablement, RegistryError, StageContext, StageDescriptor, StageId, StageRegistry};
use crate::tools::disk::{MAX_SIZE_MIB, parse_size_mib};
use std::path::PathBuf;

use crate::install_state::StateField::{DeviceRoles, InitSystem, VolumeManager};

/// Skip reason for init-aware stages when no stage3 was installed.
pub(crate) const INIT_UNKNOWN: &str = "init system unknown (stage3 not installed)";

fn opt_in(question: &'static str) -> Enablement {
    Enablement::OptIn { question }
}

fn lvm_enabled(state: &InstallationState) -> bool {
    state.volume_manager_enabled()
}

fn when_lvm(question: &'static str) -> Enablement {
    Enablement::Derived {
        condition: lvm_enabled,
        unmet: "volume manager not enabled",
        question: Some(question),
    }
}

/// Every stage, in installation order.
pub fn catalogue() -> Vec<StageDescriptor> {
    use StageId::*;

    vec![
        // Live system
        StageDescriptor::new(PartitionDisk, opt_in("Partition disk?"), storage::partition_disk),
        StageDescriptor::new(AssignDevices, Enablement::Always, storage::assign_devices)
            .writes(&[DeviceRoles]),
        StageDescriptor::new(EncryptionLvm, opt_in("Setup LUKS and LVM?"), storage::encryption_lvm)
            .reads(&[DeviceRoles])
            .writes(&[DeviceRoles, VolumeManager]),
        StageDescriptor::new(CreateFilesystems, opt_in("Create filesystems?"), storage::create_filesystems)
            .reads(&[DeviceRoles]),
        StageDescriptor::new(MountFilesystems, opt_in("Mount filesystems?"), storage::mount_filesystems)
            .reads(&[DeviceRoles]),
        StageDescriptor::new(SetClock, opt_in("Set date/time?"), bootstrap::set_clock),
        StageDescriptor::new(Stage3, opt_in("Install stage3?"), bootstrap::stage3)
            .writes(&[InitSystem]),
        StageDescriptor::new(
            Binpkg,
            opt_in("Do you want to enable binary package support (binpkg)?"),
            bootstrap::binpkg,
        ),
        StageDescriptor::new(MakeConf, opt_in("Configure make.conf?"), bootstrap::make_conf),
        StageDescriptor::new(SelectMirrors, opt_in("Select mirrors?"), bootstrap::select_mirrors),
        StageDescriptor::new(ConfigureRepos, opt_in("Configure repos?"), bootstrap::configure_repos),
        StageDescriptor::new(CopyDns, opt_in("Copy DNS info?"), bootstrap::copy_dns),
        StageDescriptor::new(MountPseudo, opt_in("Mount pseudo filesystems?"), bootstrap::mount_pseudo),
        // Inside the target
        StageDescriptor::new(EnterChroot, opt_in("Chroot into environment?"), portage::enter_chroot)
            .in_target(),
        StageDescriptor::new(SyncPortage, opt_in("Sync portage tree?"), portage::sync_portage)
            .in_target(),
        StageDescriptor::new(SelectProfile, opt_in("Select portage profile?"), portage::select_profile)
            .reads(&[InitSystem])
            .in_target(),
        StageDescriptor::new(UseFlags, opt_in("Configure USE flags?"), portage::use_flags).in_target(),
        StageDescriptor::new(CpuFlags, opt_in("Configure CPU flags?"), portage::cpu_flags).in_target(),
        StageDescriptor::new(UpdateWorld, opt_in("Update @world?"), portage::update_world)
            .in_target()
            .heavy(),
        StageDescriptor::new(BaseSystem, opt_in("Configure base system?"), portage::base_system)
            .reads(&[InitSystem])
            .in_target(),
        StageDescriptor::new(Kernel, opt_in("Install kernel?"), portage::kernel)
            .reads(&[VolumeManager])
            .in_target()
            .heavy(),
        StageDescriptor::new(ConfigureLvm, when_lvm("Configure LVM?"), portage::configure_lvm)
            .reads(&[VolumeManager])
            .in_target(),
        StageDescriptor::new(Fstab, opt_in("Configure fstab?"), system::fstab)
            .reads(&[DeviceRoles])
            .in_target(),
        StageDescriptor::new(Mtab, opt_in("Configure mtab?"), system::mtab).in_target(),
        StageDescriptor::new(Bootloader, opt_in("Install bootloader?"), system::bootloader)
            .reads(&[DeviceRoles, VolumeManager, InitSystem])
            .in_target(),
        StageDescriptor::new(EnableLvm2, when_lvm("Enable lvm2?"), system::enable_lvm2)
            .reads(&[VolumeManager, InitSystem])
            .in_target(),
        StageDescriptor::new(RootPassword, opt_in("Set root password?"), system::root_password)
            .in_target(),
        StageDescriptor::new(AddUser, opt_in("Add user?"), system::add_user).in_target(),
        StageDescriptor::new(Network, opt_in("Configure network?"), system::network)
            .reads(&[InitSystem])
            .in_target(),
        StageDescriptor::new(Locale, opt_in("Configure locale?"), system::locale)
            .reads(&[InitSystem])
            .in_target(),
        StageDescriptor::new(TimeSync, opt_in("Configure time?"), system::time_sync)
            .reads(&[InitSystem])
            .in_target(),
        StageDescriptor::new(PostInstall, opt_in("Post-install steps?"), system::post_install)
            .reads(&[InitSystem])
            .in_target(),
    ]
}

/// The audited installation registry.
pub fn default_registry() -> std::result::Result<StageRegistry, RegistryError> {
    StageRegistry::new(catalogue())
}

/// Ask for a size until it parses and is at most `MAX_SIZE_MIB`; returns
/// the answer as typed and its MiB value.
pub(crate) fn ask_size(
    ctx: &mut StageContext<'_>,
    question: &str,
    default: &str,
    allow_zero: bool,
) -> Result<(String, u64)> {
    loop {
        let answer = ctx.ask_line_or(question, default)?;
        match parse_size_mib(&answer) {
            Some(mib) if mib > MAX_SIZE_MIB => ctx.say(&format!(
                "[ERROR] '{}' is larger than any disk. The limit is {}M.",
                answer, MAX_SIZE_MIB
            )),
            Some(mib) if mib > 0 || allow_zero => return Ok((answer, mib)),
            _ => ctx.say(&format!(
                "[ERROR] '{}' is not a size. Use a number with M, G or T (e.g., 512M, 4G).",
                answer
            )),
        }
    }
}

/// Why a stage needing EFI and root cannot run, if it cannot.
pub(crate) fn missing_roles_reason(state: &InstallationState) -> Option<String> {
    let missing = state.missing_boot_devices();
    if missing.is_empty() {
        return None;
    }
    let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
    Some(format!("missing device role(s): {}", names.join(", ")))
}

/// Ask for a listing number. `None` when the operator leaves it blank.
pub(crate) fn ask_number(ctx: &mut StageContext<'_>, question: &str) -> Result<Option<String>> {
    loop {
        let answer = ctx.ask_line(question)?;
        if answer.is_empty() {
            return Ok(None);
        }
        if answer.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Some(answer));
        }
        ctx.say("Please enter a number from the list.");
    }
}

/// `<root><dir>/<file>` when the target already has `dir`, else the live
/// system's `<dir>/<file>`.
pub(crate) fn target_or_host(ctx: &StageContext<'_>, dir: &str, file: &str) -> PathBuf {
    if ctx.target_exists(dir) {
        ctx.target_path(dir).join(file)
    } else {
        PathBuf::from(dir).join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ExecScope;
    use strum::IntoEnumIterator;

    #[test]
    fn test_default_registry_audits() {
        let registry = default_registry().expect("catalogue order is valid");
        let ids: Vec<StageId> = registry.stages().iter().map(|s| s.id).collect();
        let expected: Vec<StageId> = StageId::iter().collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_scopes_switch_at_chroot() {
        let registry = default_registry().expect("valid");
        let first_target = registry
            .stages()
            .iter()
            .position(|s| s.scope == ExecScope::Target);
        assert_eq!(
            first_target.map(|i| registry.stages()[i].id),
            Some(StageId::EnterChroot)
        );
        assert!(registry.stages()[first_target.unwrap_or(0)..]
            .iter()
            .all(|s| s.scope == ExecScope::Target));
    }

    #[test]
    fn test_heavy_stages() {
        let registry = default_registry().expect("valid");
        let heavy: Vec<StageId> = registry
            .stages()
            .iter()
            .filter(|s| s.heavy)
            .map(|s| s.id)
            .collect();
        assert_eq!(heavy, vec![StageId::UpdateWorld, StageId::Kernel]);
    }

    #[test]
    fn test_lvm_stages_are_derived() {
        let registry = default_registry().expect("valid");
        let state = InstallationState::new();
        for id in [StageId::ConfigureLvm, StageId::EnableLvm2] {
            let stage = registry.get(id).expect("registered");
            match stage.enablement {
                Enablement::Derived { condition, .. } => assert!(!condition(&state)),
                other => panic!("{} should be derived, got {:?}", id, other),
            }
        }
    }

    #[test]
    fn test_missing_roles_reason() {
        let mut state = InstallationState::new();
        assert_eq!(
            missing_roles_reason(&state).as_deref(),
            Some("missing device role(s): efi, root")
        );
        state
            .assign_device(crate::types::DeviceRole::Efi, "/dev/sda1")
            .expect("assign");
        state
            .assign_device(crate::types::DeviceRole::Root, "/dev/sda2")
            .expect("assign");
        assert_eq!(missing_roles_reason(&state), None);
    }
}
