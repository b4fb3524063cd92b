//! Live-system stages that put a bootable userland under the mount root:
//! clock, stage3 tarball, portage configuration, DNS and pseudo filesystems.

use crate::error::Result;
use crate::fetch::{latest_artifact, matching_artifacts};
use crate::install_state::InstallationState;
use crate::operation::Operation;
use crate::pipeline::{StageContext, StageOutcome};
use crate::stages::target_or_host;
use crate::templates::{binpkg_block, stage3_package_use};
use crate::tools::disk::{MountArgs, MountKind};
use crate::types::{STAGE3_VARIANTS, Stage3Variant};

const MAKE_CONF: &str = "/etc/portage/make.conf";
const STAGE3_SUFFIX: &str = ".tar.xz";

fn root_string(ctx: &StageContext<'_>) -> String {
    ctx.config().mount_root.to_string_lossy().into_owned()
}

fn is_manual_date(value: &str) -> bool {
    value.len() == 12 && value.chars().all(|c| c.is_ascii_digit())
}

pub fn set_clock(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.run(Operation::new("date"))?;

    ctx.say("Please enter your timezone in the format Region/City (e.g., Europe/Bucharest, America/New_York).");
    let timezone = ctx.ask_line("Enter your timezone")?;
    if timezone.is_empty() {
        ctx.info("No timezone given; leaving it unset.");
    } else {
        let path = target_or_host(ctx, "/etc", "timezone");
        ctx.write_host(&path, &format!("{}\n", timezone))?;
        ctx.info(&format!("Timezone set to {} in {}", timezone, path.display()));
    }

    let synced = ctx.run(Operation::new("ntpdate").arg("pool.ntp.org").tolerated())?;
    if synced.success {
        return Ok(StageOutcome::Completed);
    }

    ctx.say("ntpdate is not available or failed; you can set the date manually.");
    if ctx.ask_yes_no("Would you like to set the date/time now?")? {
        let value = ctx.ask_line("Enter date/time as MMDDhhmmYYYY (e.g., 101712002026)")?;
        if is_manual_date(&value) {
            ctx.run(Operation::new("date").arg(value).tolerated())?;
        } else {
            ctx.say(&format!("[ERROR] '{}' is not in MMDDhhmmYYYY form; date left unchanged.", value));
        }
    }
    Ok(StageOutcome::Completed)
}

pub fn stage3(ctx: &mut StageContext<'_>, state: &mut InstallationState) -> Result<StageOutcome> {
    let config = ctx.config();

    ctx.say("Which Gentoo stage3 do you want to install?");
    for row in STAGE3_VARIANTS {
        ctx.say(&format!("  {}) {}", row.choice, row.label));
    }
    let answer = ctx.ask_line("Enter your choice [1]")?;
    let variant = Stage3Variant::from_choice(&answer);

    state.set_init_system(variant.init)?;
    ctx.info(&format!(
        "Selected {} stage3 (init system: {})",
        variant.label, variant.init
    ));

    let listing_url = variant.listing_url(&config.mirror, &config.arch);
    ctx.info(&format!("Fetching stage3 listing from {}", listing_url));
    let listing = match ctx.fetch_listing(&listing_url) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(url = %listing_url, error = %e, "stage3 listing unavailable");
            ctx.say(&format!("[ERROR] Failed to fetch stage3 listing: {}", e));
            return Ok(StageOutcome::skipped("stage3 listing unavailable"));
        }
    };

    let names = matching_artifacts(&listing, &variant.file_prefix(&config.arch), STAGE3_SUFFIX)?;
    let Some(tarball) = latest_artifact(&names).map(str::to_string) else {
        ctx.say("[ERROR] No stage3 tarballs found!");
        return Ok(StageOutcome::skipped("no stage3 tarball in listing"));
    };
    ctx.info(&format!("Latest stage3: {}", tarball));

    let root = root_string(ctx);
    let url = format!("{}{}", listing_url, tarball);
    ctx.run(Operation::new("mkdir").args(["-p", root.as_str()]))?;
    let downloaded = ctx.run(
        Operation::new("curl")
            .args(["-O", "-L", url.as_str()])
            .in_dir(&root),
    )?;
    let extracted = ctx.run(
        Operation::new("tar")
            .args(["xpvf", tarball.as_str(), "--xattrs-include=*.*", "--numeric-owner"])
            .in_dir(&root),
    )?;

    if downloaded.success && extracted.success {
        ctx.write_target(
            "/etc/portage/package.use/00init-system",
            &stage3_package_use(variant.init, variant.desktop),
        )?;
    } else {
        ctx.say("[WARN] stage3 was not fully unpacked; init USE flags not written.");
    }
    Ok(StageOutcome::Completed)
}

pub fn binpkg(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let path = target_or_host(ctx, "/etc/portage", "make.conf");
    let block = binpkg_block(&ctx.config().binhost);
    ctx.info(&format!("Appending binpkg configuration to {}", path.display()));
    ctx.append_host(&path, &block)?;
    Ok(StageOutcome::Completed)
}

pub fn make_conf(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    ctx.edit(MAKE_CONF)?;
    Ok(StageOutcome::Completed)
}

pub fn select_mirrors(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let selected = ctx.run(
        Operation::new("mirrorselect")
            .args(["-D", "-s4", "-o"])
            .captured(),
    )?;
    let mirrors = selected.stdout.trim();
    if !selected.success || mirrors.is_empty() {
        return Ok(StageOutcome::skipped("mirrorselect produced no mirrors"));
    }
    ctx.append_target(MAKE_CONF, &format!("\n{}\n", mirrors))?;
    Ok(StageOutcome::Completed)
}

pub fn configure_repos(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let repos_dir = ctx.target_path("/etc/portage/repos.conf");
    let shipped = ctx.target_path("/usr/share/portage/config/repos.conf");
    let gentoo_conf = repos_dir.join("gentoo.conf");

    ctx.run(Operation::new("mkdir").arg("-p").arg(repos_dir.to_string_lossy()))?;
    ctx.run(
        Operation::new("cp")
            .arg(shipped.to_string_lossy())
            .arg(gentoo_conf.to_string_lossy()),
    )?;
    Ok(StageOutcome::Completed)
}

pub fn copy_dns(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let etc = format!("{}/etc/", root_string(ctx));
    ctx.run(Operation::new("cp").args(["--dereference", "/etc/resolv.conf", etc.as_str()]))?;
    Ok(StageOutcome::Completed)
}

pub fn mount_pseudo(ctx: &mut StageContext<'_>, _state: &mut InstallationState) -> Result<StageOutcome> {
    let root = root_string(ctx);
    let at = |dir: &str| format!("{}/{}", root, dir);

    let mounts = [
        MountArgs::new("/proc", at("proc"), MountKind::Proc),
        MountArgs::new("/sys", at("sys"), MountKind::RecursiveBind),
        MountArgs::new("", at("sys"), MountKind::MakeRslave),
        MountArgs::new("/dev", at("dev"), MountKind::RecursiveBind),
        MountArgs::new("", at("dev"), MountKind::MakeRslave),
        MountArgs::new("/run", at("run"), MountKind::Bind),
        MountArgs::new("", at("run"), MountKind::MakeSlave),
    ];
    for mount in &mounts {
        ctx.run_tool(mount)?;
    }
    Ok(StageOutcome::Completed)
}
