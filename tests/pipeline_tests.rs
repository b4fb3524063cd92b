//! End-to-end pipeline runs against the fake collaborators.
//!
//! Every scenario drives the real stage catalogue with a scripted operator;
//! no process is spawned and nothing touches the network.

use gentinstall::config_file::InstallerConfig;
use gentinstall::disk_guard::DiskGuard;
use gentinstall::error::InstallerError;
use gentinstall::pipeline::{Pipeline, PipelineReport, StageContext, StageId, StageStatus};
use gentinstall::stages::default_registry;
use gentinstall::test_support::{FakeProbe, RecordingRunner, StageHarness, StaticFetcher};
use gentinstall::types::{DeviceRole, InitSystem};
use gentinstall::writer::FsWriter;
use strum::IntoEnumIterator;

const GIB: u64 = 1024 * 1024 * 1024;

const OPENRC_LISTING_URL: &str =
    "https://distfiles.gentoo.org/releases/amd64/autobuilds/current-stage3-amd64-openrc/";

const OPENRC_LISTING: &str = r#"<html><body>
<a href="stage3-amd64-openrc-20260920T164959Z.tar.xz">stage3-amd64-openrc-20260920T164959Z.tar.xz</a>
<a href="stage3-amd64-openrc-20261011T170357Z.tar.xz">stage3-amd64-openrc-20261011T170357Z.tar.xz</a>
<a href="stage3-amd64-openrc-20261011T170357Z.tar.xz.DIGESTS">stage3-amd64-openrc-20261011T170357Z.tar.xz.DIGESTS</a>
</body></html>"#;

const PROFILE_LIST: &str = "\
Available profile symlink targets:
  [1]   default/linux/amd64/23.0 (stable) *
  [2]   default/linux/amd64/23.0/desktop (stable)
  [3]   default/linux/amd64/23.0/systemd (stable)
  [4]   default/linux/amd64/23.0/desktop/systemd (stable)
";

/// One "n" per opt-in stage in `stages`; the LVM-derived stages ask nothing
/// while no volume manager is enabled.
fn decline(stages: &[StageId]) -> Vec<&'static str> {
    stages
        .iter()
        .filter(|id| !matches!(id, StageId::ConfigureLvm | StageId::EnableLvm2))
        .map(|_| "n")
        .collect()
}

fn stages_between(after: StageId, upto: StageId) -> Vec<StageId> {
    StageId::iter()
        .skip_while(|id| *id != after)
        .skip(1)
        .take_while(|id| *id <= upto)
        .collect()
}

fn run_pipeline(h: &mut StageHarness, probe: &mut FakeProbe) -> Result<PipelineReport, InstallerError> {
    let pipeline = Pipeline::new(default_registry().expect("catalogue audits"), DiskGuard::new(10 * GIB));
    let mut ctx = StageContext::new(
        &h.config,
        &mut h.runner,
        &mut h.console,
        &mut h.writer,
        &mut h.fetcher,
    );
    pipeline.run(&mut ctx, probe, &mut h.state)
}

/// Same run, but files land on the real filesystem under `h.config.mount_root`.
fn run_pipeline_on_disk(h: &mut StageHarness, probe: &mut FakeProbe) -> Result<PipelineReport, InstallerError> {
    let pipeline = Pipeline::new(default_registry().expect("catalogue audits"), DiskGuard::new(10 * GIB));
    let mut writer = FsWriter::new();
    let mut ctx = StageContext::new(
        &h.config,
        &mut h.runner,
        &mut h.console,
        &mut writer,
        &mut h.fetcher,
    );
    pipeline.run(&mut ctx, probe, &mut h.state)
}

/// Mount root whose `etc` is a regular file, so every write below it fails.
fn unwritable_target() -> tempfile::TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    std::fs::write(root.path().join("etc"), "not a directory").expect("write etc");
    root
}

/// Answers up to the stage3 menu (openrc), then `after_failure` for the
/// write that fails.
fn stage3_write_failure_answers(after_failure: &'static str) -> Vec<&'static str> {
    let mut answers = vec!["n", "/dev/vda1", "/dev/vda2", "n", "n"];
    answers.extend(decline(&stages_between(StageId::AssignDevices, StageId::SetClock)));
    answers.extend(["y", "2", after_failure]);
    answers
}

/// Partitions assigned by hand, openrc stage3, profile picked, everything
/// else declined.
#[test]
fn openrc_without_lvm_skips_volume_stages() {
    let mut answers = vec![
        "n", // partition-disk
        "/dev/vda1",
        "/dev/vda2",
        "n", // home
        "n", // swap
    ];
    answers.extend(decline(&stages_between(StageId::AssignDevices, StageId::SetClock)));
    answers.extend(["y", "2"]); // stage3, openrc
    answers.extend(decline(&stages_between(StageId::Stage3, StageId::SyncPortage)));
    answers.extend(["y", "2"]); // select-profile
    answers.extend(decline(&stages_between(StageId::SelectProfile, StageId::PostInstall)));

    let mut h = StageHarness::new(answers);
    h.fetcher = StaticFetcher::new().with_listing(OPENRC_LISTING_URL, OPENRC_LISTING);
    h.runner = RecordingRunner::new().with_output("eselect profile list", PROFILE_LIST);
    let mut probe = FakeProbe::disk_backed(50 * GIB);

    let report = run_pipeline(&mut h, &mut probe).expect("pipeline completes");

    assert_eq!(h.console.remaining(), 0, "every answer consumed");
    assert_eq!(report.records().len(), StageId::iter().count());
    assert_eq!(
        report.completed(),
        vec![StageId::AssignDevices, StageId::Stage3, StageId::SelectProfile]
    );
    for id in [StageId::ConfigureLvm, StageId::EnableLvm2] {
        assert_eq!(
            report.status_of(id),
            Some(&StageStatus::Skipped("volume manager not enabled".to_string()))
        );
    }
    assert_eq!(report.status_of(StageId::Kernel), Some(&StageStatus::Disabled));
    assert!(!h.console.questions().iter().any(|q| q == "Configure LVM?" || q == "Enable lvm2?"));

    assert_eq!(h.state.init_system(), Some(InitSystem::Openrc));
    assert_eq!(h.state.device(DeviceRole::Root), "/dev/vda2");
    assert!(!h.state.volume_manager_enabled());

    assert!(h.runner.ran("curl -O -L https://distfiles.gentoo.org/releases/amd64/autobuilds/current-stage3-amd64-openrc/stage3-amd64-openrc-20261011T170357Z.tar.xz"));
    assert!(h.runner.ran("chroot /mnt/gentoo /bin/bash -c 'source /etc/profile && eselect profile set 2'"));
    let summary = h.console.transcript().join("\n");
    assert!(summary.contains("Installation Summary"));
    assert!(summary.contains("[2] default/linux/amd64/23.0/desktop (stable)"));
    assert!(!summary.contains("[3] default/linux/amd64/23.0/systemd"));
}

/// LUKS/LVM with no swap volume: LVM stages become eligible and ask.
#[test]
fn encrypted_layout_enables_lvm_stages() {
    let mut answers = vec!["n", "/dev/sda1", "/dev/sda2", "n", "y", "/dev/sda3"];
    answers.extend(["y", "", "0"]); // encryption-lvm: default partition, no swap LV
    answers.extend(decline(&stages_between(StageId::EncryptionLvm, StageId::Kernel)));
    answers.push("y"); // configure-lvm
    answers.extend(decline(&stages_between(StageId::ConfigureLvm, StageId::Bootloader)));
    answers.push("n"); // enable-lvm2 declined by operator
    answers.extend(decline(&stages_between(StageId::EnableLvm2, StageId::PostInstall)));

    let mut h = StageHarness::new(answers);
    let mut probe = FakeProbe::disk_backed(50 * GIB);

    let report = run_pipeline(&mut h, &mut probe).expect("pipeline completes");

    assert_eq!(h.console.remaining(), 0);
    assert_eq!(report.status_of(StageId::ConfigureLvm), Some(&StageStatus::Completed));
    assert_eq!(report.status_of(StageId::EnableLvm2), Some(&StageStatus::Disabled));
    assert!(h.state.volume_manager_enabled());
    assert_eq!(h.state.effective_root_device(), "/dev/vg0/root");
    assert!(!h.state.is_swap_configured(), "swap size 0 clears the swap role");
    assert!(h.runner.ran("luksFormat /dev/sda2"));
    assert!(h.runner.ran("emerge --ask sys-fs/lvm2"));
}

/// A failed fatal command: "y" continues, "n" aborts the run.
#[test]
fn failed_command_continue_then_abort() {
    // Continue past a failed partitioning step
    let mut answers = vec!["y", "/dev/sda", "y", "", "0"];
    answers.extend(["y"; 3]); // mklabel and both mkpart calls fail
    answers.extend(["/dev/sda1", "/dev/sda2", "n", "n"]);
    answers.extend(decline(&stages_between(StageId::AssignDevices, StageId::PostInstall)));

    let mut h = StageHarness::new(answers);
    h.runner = RecordingRunner::new().fail_on("parted --script /dev/sda m");
    let mut probe = FakeProbe::disk_backed(50 * GIB);
    let report = run_pipeline(&mut h, &mut probe).expect("operator continued");
    assert_eq!(report.status_of(StageId::PartitionDisk), Some(&StageStatus::Completed));
    assert_eq!(h.console.remaining(), 0);

    // Abort on the first failure
    let mut h = StageHarness::new(["y", "/dev/sda", "y", "", "0", "n"]);
    h.runner = RecordingRunner::new().fail_on("mklabel");
    let mut probe = FakeProbe::disk_backed(50 * GIB);
    let err = run_pipeline(&mut h, &mut probe).unwrap_err();
    assert!(matches!(err, InstallerError::Aborted { ref operation } if operation.contains("mklabel")));
    assert_eq!(err.exit_code(), 1);
    assert!(!h.runner.ran("mkpart"), "nothing runs after an abort");
    assert!(!h.state.has_device(DeviceRole::Efi));
}

/// Input ending mid-run surfaces as ConsoleClosed.
#[test]
fn closed_console_stops_pipeline() {
    let mut h = StageHarness::new(["n", "/dev/vda1"]);
    let mut probe = FakeProbe::disk_backed(50 * GIB);
    let err = run_pipeline(&mut h, &mut probe).unwrap_err();
    assert!(matches!(err, InstallerError::ConsoleClosed));
}

/// Entry paths are checked before the first question.
#[test]
fn entry_guard_runs_before_any_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let scratch = std::fs::canonicalize(dir.path()).expect("canonical");

    let mut h = StageHarness::new(["n"]);
    h.config.guard.entry_paths = vec![scratch.clone()];
    let mut probe = FakeProbe::disk_backed(50 * GIB).with_mount(&scratch, "tmpfs");

    let err = run_pipeline(&mut h, &mut probe).unwrap_err();
    assert!(matches!(err, InstallerError::DiskNotReady { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(h.console.questions().is_empty());
}

/// Without any config file the live system's scratch area is still checked.
#[test]
fn default_config_guards_entry_on_volatile_host() {
    let mut h = StageHarness::new(["n"]);
    h.config = InstallerConfig::default();
    h.config.pause_between_stages = false;
    let mut probe = FakeProbe::disk_backed(0).with_mount("/", "tmpfs");

    let err = run_pipeline(&mut h, &mut probe).unwrap_err();
    assert!(matches!(err, InstallerError::DiskNotReady { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(h.console.questions().is_empty());
    assert!(h.runner.commands().is_empty());
}

/// A failed file write is announced and asked about like a failed command.
#[test]
fn failed_write_continue_keeps_running() {
    let root = unwritable_target();
    let mut answers = stage3_write_failure_answers("y");
    answers.extend(decline(&stages_between(StageId::Stage3, StageId::PostInstall)));

    let mut h = StageHarness::new(answers);
    h.config.mount_root = root.path().to_path_buf();
    h.fetcher = StaticFetcher::new().with_listing(OPENRC_LISTING_URL, OPENRC_LISTING);
    let mut probe = FakeProbe::disk_backed(50 * GIB);

    let report = run_pipeline_on_disk(&mut h, &mut probe).expect("operator continued");

    assert_eq!(h.console.remaining(), 0, "later stages still asked");
    assert_eq!(report.records().len(), StageId::iter().count());
    assert_eq!(report.status_of(StageId::Stage3), Some(&StageStatus::Completed));
    assert_eq!(h.console.questions().iter().filter(|q| *q == "Continue anyway?").count(), 1);
    let transcript = h.console.transcript().join("\n");
    assert!(transcript.contains("[ERROR] Could not write"));
    assert!(transcript.contains("00init-system"));
}

/// Declining after a failed write aborts the run with exit code 1.
#[test]
fn failed_write_abort_stops_pipeline() {
    let root = unwritable_target();
    let mut h = StageHarness::new(stage3_write_failure_answers("n"));
    h.config.mount_root = root.path().to_path_buf();
    h.fetcher = StaticFetcher::new().with_listing(OPENRC_LISTING_URL, OPENRC_LISTING);
    let mut probe = FakeProbe::disk_backed(50 * GIB);

    let err = run_pipeline_on_disk(&mut h, &mut probe).unwrap_err();
    assert!(
        matches!(err, InstallerError::Aborted { ref operation } if operation.contains("00init-system"))
    );
    assert_eq!(err.exit_code(), 1);
    assert_eq!(h.console.remaining(), 0);
    assert!(!h.console.questions().iter().any(|q| q == "Do you want to enable binary package support (binpkg)?"));
}
