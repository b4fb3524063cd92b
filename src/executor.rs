//! Command Executor
//!
//! `execute` is the only path from a stage to the privileged OS toolset.
//! It echoes the command, runs it through a `CommandRunner`, and applies the
//! operation's failure policy:
//!
//! | Result  | Policy      | Behavior                                       |
//! |---------|-------------|------------------------------------------------|
//! | success | any         | `success = true`                               |
//! | failure | `Fatal`     | announce, ask "Continue anyway?"; no aborts    |
//! | failure | `Tolerated` | `success = false`, nothing asked               |
//!
//! There are no automatic retries: continuing is always the operator's call.

use crate::console::Console;
use crate::error::{InstallerError, Result};
use crate::operation::{CommandLine, IoMode, Operation};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use std::process::{Command, Stdio};

/// Raw status of one finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub success: bool,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Captured stdout; empty for interactive operations
    pub stdout: String,
    /// Captured stderr; empty for interactive operations
    pub stderr: String,
}

impl RunStatus {
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn failure_detail(&self) -> String {
        let code = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            code
        } else {
            format!("{}: {}", code, stderr)
        }
    }
}

/// Runs an operation to completion and reports how it ended.
///
/// `Err` means the process could not be spawned at all.
pub trait CommandRunner {
    fn run(&mut self, op: &Operation) -> std::io::Result<RunStatus>;
}

/// What the operator decided after a fatal-by-default failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorDecision {
    Continue,
}

/// Result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    /// Failure detail (exit code and stderr) when `success` is false
    pub detail: Option<String>,
    /// Set only when a fatal-by-default failure was continued past
    pub decision: Option<OperatorDecision>,
    /// Captured stdout (empty for interactive operations)
    pub stdout: String,
}

/// Run `op`, applying its failure policy.
///
/// # Errors
///
/// - `Aborted` if the operator declines to continue after a fatal failure
/// - `ConsoleClosed` if the operator's input ends while being asked
pub fn execute(
    runner: &mut dyn CommandRunner,
    console: &mut dyn Console,
    op: &Operation,
) -> Result<CommandOutcome> {
    console.say(&format!("\n[RUN] {}", op));
    tracing::info!(command = %op, policy = ?op.policy, "executing");

    let status = match runner.run(op) {
        Ok(status) => status,
        Err(e) => RunStatus::failed(127, format!("failed to start {}: {}", op.program(), e)),
    };

    if status.success {
        return Ok(CommandOutcome {
            success: true,
            detail: None,
            decision: None,
            stdout: status.stdout,
        });
    }

    let detail = status.failure_detail();

    if !op.is_fatal() {
        tracing::debug!(command = %op, %detail, "tolerated failure");
        return Ok(CommandOutcome {
            success: false,
            detail: Some(detail),
            decision: None,
            stdout: status.stdout,
        });
    }

    tracing::warn!(command = %op, %detail, "command failed");
    console.say(&format!("[ERROR] Command failed: {} ({})", op, detail));
    if !console.ask_yes_no("Continue anyway?")? {
        tracing::error!(command = %op, "operator aborted");
        return Err(InstallerError::aborted(op.to_string()));
    }

    Ok(CommandOutcome {
        success: false,
        detail: Some(detail),
        decision: Some(OperatorDecision::Continue),
        stdout: status.stdout,
    })
}

/// Runner that spawns real processes.
///
/// Captured operations run in their own process group; interactive ones stay
/// in the terminal's foreground group so editors and password prompts can
/// read the tty. Both are tracked in the `ChildRegistry`.
#[derive(Debug, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo-only runner: every operation reports success without spawning.
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    fn build(op: &Operation) -> Command {
        let mut cmd = match &op.command {
            CommandLine::Program { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            CommandLine::Shell(line) => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(line);
                cmd
            }
        };
        if let Some(dir) = &op.workdir {
            cmd.current_dir(dir);
        }
        match op.io {
            IoMode::Interactive => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            IoMode::Captured => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .in_new_process_group();
            }
        }
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, op: &Operation) -> std::io::Result<RunStatus> {
        if self.dry_run {
            tracing::info!(command = %op, "[DRY RUN] skipped");
            return Ok(RunStatus::succeeded(""));
        }

        let child = Self::build(op).spawn()?;
        let pid = child.id();
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid, op.to_string(), op.io == IoMode::Captured);
        }

        let output = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        let output = output?;
        Ok(RunStatus {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
