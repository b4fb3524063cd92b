//! Stage Pipeline
//!
//! Walks the registry in order. For each stage: resolve enablement, run the
//! Disk-Readiness Guard if the stage is heavy, invoke the procedure, run the
//! guard again, advance. There is no rollback; an operator abort or a guard
//! failure ends the run and leaves the system as it is for inspection.

use crate::config_file::InstallerConfig;
use crate::console::Console;
use crate::disk_guard::{DiskGuard, DiskProbe};
use crate::error::{InstallerError, Result};
use crate::executor::{CommandOutcome, CommandRunner, execute};
use crate::fetch::ArtifactFetcher;
use crate::install_state::InstallationState;
use crate::operation::{Operation, ToolArgs};
use crate::pipeline::registry::{Enablement, ExecScope, StageDescriptor, StageId, StageRegistry};
use crate::tools::system::edit_file;
use crate::writer::ConfigWriter;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// How a stage procedure ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// A precondition was missing; nothing was changed
    Skipped(String),
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

/// Final status of a stage in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// Not run by the pipeline's decision (condition unmet, precondition
    /// missing)
    Skipped(String),
    /// Declined by the operator
    Disabled,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub id: StageId,
    pub status: StageStatus,
    pub timestamp: SystemTime,
}

/// Ordered record of what happened to every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    records: Vec<StageRecord>,
}

impl PipelineReport {
    fn push(&mut self, id: StageId, status: StageStatus) {
        self.records.push(StageRecord {
            id,
            status,
            timestamp: SystemTime::now(),
        });
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn status_of(&self, id: StageId) -> Option<&StageStatus> {
        self.records.iter().find(|r| r.id == id).map(|r| &r.status)
    }

    /// Ids of completed stages, in order.
    pub fn completed(&self) -> Vec<StageId> {
        self.records
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .map(|r| r.id)
            .collect()
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, record) in self.records.iter().enumerate() {
            writeln!(
                f,
                "{:>3}. {:<20} {}",
                index + 1,
                record.id.to_string(),
                record.status
            )?;
        }
        Ok(())
    }
}

/// Everything a stage procedure may touch besides the state.
///
/// Operations issued through `run` are wrapped in `chroot <mount_root>` when
/// the current stage runs in target scope. File writes always go through the
/// host path under the mount root; a failed write is announced and the
/// operator chooses to continue or abort, as with a failed command.
pub struct StageContext<'a> {
    config: &'a InstallerConfig,
    runner: &'a mut dyn CommandRunner,
    console: &'a mut dyn Console,
    writer: &'a mut dyn ConfigWriter,
    fetcher: &'a mut dyn ArtifactFetcher,
    scope: ExecScope,
}

impl<'a> StageContext<'a> {
    pub fn new(
        config: &'a InstallerConfig,
        runner: &'a mut dyn CommandRunner,
        console: &'a mut dyn Console,
        writer: &'a mut dyn ConfigWriter,
        fetcher: &'a mut dyn ArtifactFetcher,
    ) -> Self {
        Self {
            config,
            runner,
            console,
            writer,
            fetcher,
            scope: ExecScope::Host,
        }
    }

    pub fn config(&self) -> &'a InstallerConfig {
        self.config
    }

    pub fn scope(&self) -> ExecScope {
        self.scope
    }

    pub fn set_scope(&mut self, scope: ExecScope) {
        self.scope = scope;
    }

    /// Execute `op` in the current scope.
    pub fn run(&mut self, op: Operation) -> Result<CommandOutcome> {
        let op = match self.scope {
            ExecScope::Host => op,
            ExecScope::Target => op.in_chroot(&self.config.mount_root),
        };
        execute(&mut *self.runner, &mut *self.console, &op)
    }

    pub fn run_tool(&mut self, args: &impl ToolArgs) -> Result<CommandOutcome> {
        self.run(args.to_operation())
    }

    /// Execute each operation in order, stopping only on abort.
    pub fn run_all(&mut self, ops: impl IntoIterator<Item = Operation>) -> Result<()> {
        for op in ops {
            self.run(op)?;
        }
        Ok(())
    }

    /// Open a target file in the configured editor. `path` is absolute
    /// within the installed system (`/etc/fstab`).
    pub fn edit(&mut self, path: &str) -> Result<CommandOutcome> {
        let shown = match self.scope {
            ExecScope::Target => path.to_string(),
            ExecScope::Host => self.target_path(path).to_string_lossy().into_owned(),
        };
        let op = edit_file(&self.config.editor, &shown);
        self.run(op)
    }

    pub fn ask_line(&mut self, question: &str) -> Result<String> {
        self.console.ask_line(question)
    }

    pub fn ask_line_or(&mut self, question: &str, default: &str) -> Result<String> {
        self.console.ask_line_or(question, default)
    }

    pub fn ask_yes_no(&mut self, question: &str) -> Result<bool> {
        self.console.ask_yes_no(question)
    }

    pub fn say(&mut self, message: &str) {
        self.console.say(message);
    }

    pub fn info(&mut self, message: &str) {
        self.console.say(&format!("[INFO] {}", message));
    }

    pub fn section(&mut self, title: &str) {
        self.console.section(title);
    }

    /// Wait for Enter unless pausing is switched off.
    pub fn pause(&mut self) -> Result<()> {
        if self.config.pause_between_stages {
            self.console.pause()
        } else {
            Ok(())
        }
    }

    /// Host path of `path` inside the target root.
    pub fn target_path(&self, path: &str) -> PathBuf {
        self.config.mount_root.join(path.trim_start_matches('/'))
    }

    pub fn target_exists(&self, path: &str) -> bool {
        self.writer.exists(&self.target_path(path))
    }

    /// Replace a file in the target.
    pub fn write_target(&mut self, path: &str, content: &str) -> Result<()> {
        let host = self.target_path(path);
        self.write_host(&host, content)
    }

    /// Append to a file in the target.
    pub fn append_target(&mut self, path: &str, content: &str) -> Result<()> {
        let host = self.target_path(path);
        self.append_host(&host, content)
    }

    /// Write to an arbitrary host path.
    pub fn write_host(&mut self, path: &Path, content: &str) -> Result<()> {
        let written = self.writer.write(path, content);
        self.settle_write(path, written)
    }

    /// Append to an arbitrary host path.
    pub fn append_host(&mut self, path: &Path, content: &str) -> Result<()> {
        let written = self.writer.append(path, content);
        self.settle_write(path, written)
    }

    /// `Ok` when the write went through or the operator chose to go on.
    fn settle_write(&mut self, path: &Path, written: Result<()>) -> Result<()> {
        let error = match written {
            Ok(()) => return Ok(()),
            Err(InstallerError::ConsoleClosed) => return Err(InstallerError::ConsoleClosed),
            Err(error) => error,
        };

        tracing::warn!(path = %path.display(), %error, "write failed");
        self.console
            .say(&format!("[ERROR] Could not write {}: {}", path.display(), error));
        if !self.console.ask_yes_no("Continue anyway?")? {
            tracing::error!(path = %path.display(), "operator aborted");
            return Err(InstallerError::aborted(format!("write {}", path.display())));
        }
        Ok(())
    }

    pub fn fetch_listing(&mut self, url: &str) -> Result<String> {
        self.fetcher.fetch_listing(url)
    }
}

/// The linear stage runner.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: StageRegistry,
    guard: DiskGuard,
}

impl Pipeline {
    pub fn new(registry: StageRegistry, guard: DiskGuard) -> Self {
        Self { registry, guard }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// - `DiskNotReady` when an entry path or a heavy stage's build area fails
    ///   the guard
    /// - `Aborted` when the operator declines to continue after a failure
    /// - `ConsoleClosed` when operator input ends
    pub fn run(
        &self,
        ctx: &mut StageContext<'_>,
        probe: &mut dyn DiskProbe,
        state: &mut InstallationState,
    ) -> Result<PipelineReport> {
        let config = ctx.config();
        for path in &config.guard.entry_paths {
            self.guard.require(&*probe, path)?;
        }

        let mut report = PipelineReport::default();
        for stage in self.registry.stages() {
            let span = tracing::info_span!("stage", id = %stage.id);
            let _entered = span.enter();

            let status = match self.resolve(stage, ctx, state)? {
                Some(status) => status,
                None => self.invoke(stage, ctx, probe, state)?,
            };

            tracing::info!(status = %status, "stage finished");
            report.push(stage.id, status);
        }

        ctx.section("Installation Summary");
        ctx.say(&report.to_string());
        ctx.say(&format!("Final state:\n{}", state));
        Ok(report)
    }

    /// `None` means the stage runs.
    fn resolve(
        &self,
        stage: &StageDescriptor,
        ctx: &mut StageContext<'_>,
        state: &InstallationState,
    ) -> Result<Option<StageStatus>> {
        match stage.enablement {
            Enablement::Always => Ok(None),
            Enablement::OptIn { question } => {
                if ctx.ask_yes_no(question)? {
                    Ok(None)
                } else {
                    Ok(Some(StageStatus::Disabled))
                }
            }
            Enablement::Derived {
                condition,
                unmet,
                question,
            } => {
                if !condition(state) {
                    tracing::debug!(reason = unmet, "condition not met");
                    return Ok(Some(StageStatus::Skipped(unmet.to_string())));
                }
                match question {
                    Some(question) if !ctx.ask_yes_no(question)? => Ok(Some(StageStatus::Disabled)),
                    _ => Ok(None),
                }
            }
        }
    }

    fn invoke(
        &self,
        stage: &StageDescriptor,
        ctx: &mut StageContext<'_>,
        probe: &mut dyn DiskProbe,
        state: &mut InstallationState,
    ) -> Result<StageStatus> {
        ctx.set_scope(stage.scope);
        ctx.section(stage.id.description());

        if stage.heavy {
            self.prepare_build_area(ctx.config(), probe)?;
        }

        let outcome = (stage.procedure)(ctx, state);
        ctx.set_scope(ExecScope::Host);
        let outcome = outcome?;

        if stage.heavy {
            self.restore_build_area(ctx.config(), probe)?;
        }

        match outcome {
            StageOutcome::Completed => {
                ctx.pause()?;
                Ok(StageStatus::Completed)
            }
            StageOutcome::Skipped(reason) => {
                ctx.say(&format!("[SKIP] {}: {}", stage.id, reason));
                tracing::warn!(reason = %reason, "stage skipped");
                Ok(StageStatus::Skipped(reason))
            }
        }
    }

    fn temp_dirs(root: &Path) -> [PathBuf; 2] {
        [root.join("tmp"), root.join("var/tmp")]
    }

    fn prepare_build_area(&self, config: &InstallerConfig, probe: &mut dyn DiskProbe) -> Result<()> {
        for dir in Self::temp_dirs(&config.mount_root) {
            self.guard.ensure_disk_backed(probe, &dir)?;
        }
        let portage_tmp = config.mount_root.join("var/tmp/portage");
        if !self.guard.dry_run {
            std::fs::create_dir_all(&portage_tmp)?;
        }
        self.guard.require(&*probe, &portage_tmp)?;
        Ok(())
    }

    fn restore_build_area(&self, config: &InstallerConfig, probe: &mut dyn DiskProbe) -> Result<()> {
        for dir in Self::temp_dirs(&config.mount_root) {
            self.guard.ensure_disk_backed(probe, &dir)?;
        }
        Ok(())
    }
}
