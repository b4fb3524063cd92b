//! Fakes for the collaborator seams, shared by unit and integration tests.
//!
//! Everything here is deterministic: no process is spawned, no terminal is
//! read, nothing is written to disk and no network is touched.

use crate::config_file::InstallerConfig;
use crate::console::{Console, parse_yes_no};
use crate::disk_guard::{DiskProbe, MountEntry};
use crate::error::{InstallerError, Result};
use crate::executor::{CommandRunner, RunStatus};
use crate::fetch::ArtifactFetcher;
use crate::install_state::InstallationState;
use crate::operation::Operation;
use crate::pipeline::{ExecScope, StageContext, StageFn, StageOutcome};
use crate::writer::ConfigWriter;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

/// Runner that records every operation and succeeds unless told otherwise.
///
/// Failure and canned output are keyed by substring of the rendered command
/// line, so `fail_on("swapoff")` also matches `chroot … swapoff …`.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    operations: Vec<Operation>,
    failing: Vec<String>,
    outputs: Vec<(String, String)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `pattern` exit with status 1.
    pub fn fail_on(mut self, pattern: impl Into<String>) -> Self {
        self.failing.push(pattern.into());
        self
    }

    /// Commands containing `pattern` print `stdout`.
    pub fn with_output(mut self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.outputs.push((pattern.into(), stdout.into()));
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Rendered command lines, in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.operations.iter().map(ToString::to_string).collect()
    }

    /// Whether any executed command line contains `pattern`.
    pub fn ran(&self, pattern: &str) -> bool {
        self.operations.iter().any(|op| op.to_string().contains(pattern))
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, op: &Operation) -> io::Result<RunStatus> {
        let line = op.to_string();
        self.operations.push(op.clone());

        if self.failing.iter().any(|p| line.contains(p.as_str())) {
            return Ok(RunStatus::failed(1, format!("{} failed", op.program())));
        }
        let stdout = self
            .outputs
            .iter()
            .find(|(p, _)| line.contains(p.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        Ok(RunStatus::succeeded(stdout))
    }
}

/// Console answering from a fixed script.
///
/// Every question and message is recorded. Running out of answers behaves
/// like closed input.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    answers: VecDeque<String>,
    questions: Vec<String>,
    transcript: Vec<String>,
}

impl ScriptedConsole {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next_answer(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        self.transcript.push(format!("? {}", question));
        let answer = self.answers.pop_front().ok_or(InstallerError::ConsoleClosed)?;
        Ok(answer.trim().to_string())
    }
}

impl Console for ScriptedConsole {
    fn ask_line(&mut self, question: &str) -> Result<String> {
        self.next_answer(question)
    }

    fn ask_yes_no(&mut self, question: &str) -> Result<bool> {
        loop {
            let answer = self.next_answer(question)?;
            match parse_yes_no(&answer) {
                Some(value) => return Ok(value),
                None => self.say("Please answer y or n."),
            }
        }
    }

    fn say(&mut self, message: &str) {
        self.transcript.push(message.to_string());
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writer keeping files in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    files: BTreeMap<PathBuf, String>,
    existing: BTreeSet<PathBuf>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend `path` already exists on disk.
    pub fn with_existing(mut self, path: impl Into<PathBuf>) -> Self {
        self.existing.insert(path.into());
        self
    }

    pub fn content(&self, path: impl AsRef<Path>) -> Option<&str> {
        self.files.get(path.as_ref()).map(String::as_str)
    }

    pub fn files(&self) -> &BTreeMap<PathBuf, String> {
        &self.files
    }
}

impl ConfigWriter for MemoryWriter {
    fn write(&mut self, path: &Path, content: &str) -> Result<()> {
        self.files.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    fn append(&mut self, path: &Path, content: &str) -> Result<()> {
        self.files
            .entry(path.to_path_buf())
            .or_default()
            .push_str(content);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.existing.contains(path) || self.files.contains_key(path)
    }
}

/// Fetcher serving canned listing bodies; unknown URLs fail.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    listings: HashMap<String, String>,
    requested: Vec<String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.listings.insert(url.into(), body.into());
        self
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }
}

impl ArtifactFetcher for StaticFetcher {
    fn fetch_listing(&mut self, listing_url: &str) -> Result<String> {
        self.requested.push(listing_url.to_string());
        self.listings
            .get(listing_url)
            .cloned()
            .ok_or_else(|| InstallerError::fetch(format!("{}: 404 Not Found", listing_url)))
    }
}

/// Probe with a scripted mount table and free-space figures.
#[derive(Debug, Default)]
pub struct FakeProbe {
    pub mounts: Vec<MountEntry>,
    free: Vec<(PathBuf, u64)>,
    pub default_free: u64,
    pub unmounted: Vec<PathBuf>,
}

impl FakeProbe {
    /// Root on ext4 with `default_free` bytes everywhere.
    pub fn disk_backed(default_free: u64) -> Self {
        Self {
            mounts: vec![MountEntry::new("/", "ext4")],
            default_free,
            ..Self::default()
        }
    }

    pub fn with_mount(mut self, mount_point: impl Into<PathBuf>, fs_type: &str) -> Self {
        self.mounts.push(MountEntry::new(mount_point, fs_type));
        self
    }

    /// Free bytes for paths under `prefix` (longest prefix wins).
    pub fn with_free(mut self, prefix: impl Into<PathBuf>, bytes: u64) -> Self {
        self.free.push((prefix.into(), bytes));
        self
    }
}

impl DiskProbe for FakeProbe {
    fn mounts(&self) -> io::Result<Vec<MountEntry>> {
        Ok(self.mounts.clone())
    }

    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        Ok(self
            .free
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.components().count())
            .map(|(_, bytes)| *bytes)
            .unwrap_or(self.default_free))
    }

    fn unmount(&mut self, path: &Path) -> io::Result<()> {
        let before = self.mounts.len();
        if let Some(pos) = self.mounts.iter().rposition(|m| m.mount_point == path) {
            self.mounts.remove(pos);
        }
        if self.mounts.len() == before {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "not mounted"));
        }
        self.unmounted.push(path.to_path_buf());
        Ok(())
    }
}

/// All fakes plus a state, for driving one stage procedure at a time.
#[derive(Debug)]
pub struct StageHarness {
    pub config: InstallerConfig,
    pub runner: RecordingRunner,
    pub console: ScriptedConsole,
    pub writer: MemoryWriter,
    pub fetcher: StaticFetcher,
    pub state: InstallationState,
}

impl StageHarness {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = InstallerConfig::default();
        config.pause_between_stages = false;
        config.guard.entry_paths.clear();
        Self {
            config,
            runner: RecordingRunner::new(),
            console: ScriptedConsole::new(answers),
            writer: MemoryWriter::new(),
            fetcher: StaticFetcher::new(),
            state: InstallationState::new(),
        }
    }

    /// Run `stage` on the live system.
    pub fn run(&mut self, stage: StageFn) -> Result<StageOutcome> {
        self.run_scoped(stage, ExecScope::Host)
    }

    /// Run `stage` with its operations chrooted into the mount root.
    pub fn run_in_target(&mut self, stage: StageFn) -> Result<StageOutcome> {
        self.run_scoped(stage, ExecScope::Target)
    }

    fn run_scoped(&mut self, stage: StageFn, scope: ExecScope) -> Result<StageOutcome> {
        let mut ctx = StageContext::new(
            &self.config,
            &mut self.runner,
            &mut self.console,
            &mut self.writer,
            &mut self.fetcher,
        );
        ctx.set_scope(scope);
        stage(&mut ctx, &mut self.state)
    }

    /// Host path of a target file under the mount root.
    pub fn target(&self, path: &str) -> PathBuf {
        self.config.mount_root.join(path.trim_start_matches('/'))
    }

    /// Content written to a target file, if any.
    pub fn written(&self, path: &str) -> Option<&str> {
        self.writer.content(self.target(path))
    }
}
