//! In-chroot stages that bring Portage and the base system up to date:
//! sync, profile, USE/CPU flags, @world, locale and timezone, kernel, LVM.

use crate::error::Result;
use crate::install_state::InstallationState;
use crate::operation::Operation;
use crate::pipeline::{StageContext, StageOutcome};
use crate::stages::ask_number;
use crate::templates::cpu_flags_line;
use crate::tools::portage::{EmergeArgs, EselectArgs, parse_eselect_list};
use crate::types::InitSystem;

const MAKE_CONF: &str = "/etc/portage/make.conf";

/// Show an `eselect` listing and set the entry the operator picks.
///
/// Returns false when the operator leaves the number blank.
fn pick_eselect(
    ctx: &mut StageContext<'_>,
    module: &'static str,
    keep: impl Fn(&str) -> bool,
    question: &str,
) -> Result<bool> {
    let listing = ctx.run_tool(&EselectArgs::list(module))?;
    let entries: Vec<(String, String)> = parse_eselect_list(&listing.stdout)
        .into_iter()
        .filter(|(_, text)| keep(text))
        .collect();

    if entries.is_empty() {
        ctx.say(listing.stdout.trim_end());
    } else {
        for (number, text) in &entries {
            ctx.say(&format!("  [{}] {}", number, text));
        }
    }

    match ask_number(ctx, question)? {
        Some(number) => {
            ctx.run_tool(&EselectArgs::set(module, number))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn enter_chroot(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.info(&format!(
        "Commands from here on run inside chroot {}",
        ctx.config().mount_root.display()
    ));
    ctx.run(Operation::new("env-update"))?;
    Ok(StageOutcome::Completed)
}

pub fn sync_portage(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&EmergeArgs::sync())?;
    Ok(StageOutcome::Completed)
}

pub fn select_profile(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let init = state.init_system();
    let question = match init {
        Some(init) => {
            ctx.info(&format!("Showing {} profiles only", init));
            format!("Enter the number of the desired {} profile", init)
        }
        None => "Enter the number of the desired profile".to_string(),
    };

    let keep = |text: &str| init.map_or(true, |init| init.matches_profile(text));
    if pick_eselect(ctx, "profile", keep, &question)? {
        Ok(StageOutcome::Completed)
    } else {
        Ok(StageOutcome::skipped("no profile selected"))
    }
}

pub fn use_flags(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&EmergeArgs::install(["app-portage/eix", "app-portage/ufed"]))?;
    ctx.run(Operation::new("ufed"))?;
    Ok(StageOutcome::Completed)
}

pub fn cpu_flags(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&EmergeArgs::install(["app-portage/cpuid2cpuflags"]).ask())?;
    let detected = ctx.run(Operation::new("cpuid2cpuflags").captured())?;
    let flags = detected.stdout.trim();
    if detected.success && !flags.is_empty() {
        ctx.write_target("/etc/portage/package.use/00cpu-flags", &cpu_flags_line(flags))?;
        ctx.info(&format!("Wrote {}", flags));
    } else {
        ctx.say("[ERROR] cpuid2cpuflags reported nothing; CPU flags not written.");
    }
    ctx.edit(MAKE_CONF)?;
    Ok(StageOutcome::Completed)
}

pub fn update_world(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&EmergeArgs::update_world().ask())?;
    Ok(StageOutcome::Completed)
}

pub fn base_system(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.edit(MAKE_CONF)?;

    let timezone = ctx.ask_line_or("Enter your timezone (Region/City)", "UTC")?;
    match state.init_system() {
        Some(InitSystem::Openrc) => {
            ctx.write_target("/etc/timezone", &format!("{}\n", timezone))?;
            ctx.run_tool(&EmergeArgs::config("sys-libs/timezone-data"))?;
        }
        Some(InitSystem::Systemd) | None => {
            let zone = format!("/usr/share/zoneinfo/{}", timezone);
            ctx.run(Operation::new("ln").args(["-sf", zone.as_str(), "/etc/localtime"]))?;
        }
    }

    ctx.edit("/etc/locale.gen")?;
    ctx.run(Operation::new("locale-gen"))?;
    pick_eselect(ctx, "locale", |_| true, "Enter the number of the locale to use")?;
    ctx.run(Operation::new("env-update"))?;
    Ok(StageOutcome::Completed)
}

pub fn kernel(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let lvm = state.volume_manager_enabled();

    ctx.run_tool(&EmergeArgs::install(["sys-kernel/gentoo-sources"]).ask())?;
    pick_eselect(ctx, "kernel", |_| true, "Enter the number of the kernel sources to use")?;
    ctx.run_tool(&EmergeArgs::install(["sys-kernel/linux-firmware"]).ask())?;

    if ctx.ask_yes_no("Use genkernel for kernel build?")? {
        ctx.run_tool(&EmergeArgs::install(["sys-kernel/genkernel"]).ask())?;
        ctx.edit("/etc/genkernel.conf")?;
        let mut build = Operation::new("genkernel");
        if lvm {
            build = build.args(["--lvm", "--luks"]);
        }
        ctx.run(build.arg("all"))?;
    } else {
        ctx.run_tool(&EmergeArgs::install(["sys-apps/pciutils"]).ask())?;
        ctx.run(Operation::new("make").arg("menuconfig").in_dir("/usr/src/linux"))?;
        ctx.run(Operation::shell("make && make modules_install && make install").in_dir("/usr/src/linux"))?;
        ctx.run_tool(&EmergeArgs::install(["sys-kernel/dracut"]).ask())?;
        let modules = if lvm { " --add 'crypt lvm'" } else { "" };
        ctx.run(Operation::shell(format!(
            "dracut{} --kver=\"$(ls /lib/modules | tail -n1)\"",
            modules
        )))?;
    }
    Ok(StageOutcome::Completed)
}

pub fn configure_lvm(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run_tool(&EmergeArgs::install(["sys-fs/lvm2"]).ask())?;
    ctx.edit("/etc/lvm/lvm.conf")?;
    Ok(StageOutcome::Completed)
}
