//! Structured operation descriptors.
//!
//! Stages never build shell strings by interpolation. They describe *what* to
//! run as an `Operation` (program plus argument list, or an explicit opaque
//! command line), and the executor decides *how* to run it. This keeps the
//! echo, the failure policy and the chroot wrapping in one place and lets
//! tests substitute a recording runner.

use std::fmt;
use std::path::{Path, PathBuf};

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// A program and its argument vector, spawned directly.
    Program { program: String, args: Vec<String> },
    /// An opaque command line handed to `/bin/sh -c`.
    Shell(String),
}

/// What a non-zero exit means for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Failure is announced and the operator chooses continue or abort.
    #[default]
    Fatal,
    /// Failure is expected sometimes (unmount, swapoff, deactivate) and is
    /// reported silently.
    Tolerated,
}

/// How the child's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Inherit the terminal: editors, password prompts, `emerge --ask`.
    #[default]
    Interactive,
    /// Capture stdout/stderr so the stage can consume the output.
    Captured,
}

/// A single external invocation.
///
/// # Example
///
/// ```
/// use gentinstall::operation::{FailurePolicy, Operation};
///
/// let op = Operation::new("umount").args(["-lf", "/dev/sda1"]).tolerated();
/// assert_eq!(op.to_string(), "umount -lf /dev/sda1");
/// assert_eq!(op.policy, FailurePolicy::Tolerated);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub command: CommandLine,
    pub policy: FailurePolicy,
    pub io: IoMode,
    /// Working directory for the child
    pub workdir: Option<PathBuf>,
}

impl Operation {
    /// A fatal-by-default, interactive invocation of `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: CommandLine::Program {
                program: program.into(),
                args: Vec::new(),
            },
            policy: FailurePolicy::Fatal,
            io: IoMode::Interactive,
            workdir: None,
        }
    }

    /// An opaque command line run through `/bin/sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            command: CommandLine::Shell(line.into()),
            policy: FailurePolicy::Fatal,
            io: IoMode::Interactive,
            workdir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let CommandLine::Program { args, .. } = &mut self.command {
            args.push(arg.into());
        }
        self
    }

    pub fn args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let CommandLine::Program { args, .. } = &mut self.command {
            args.extend(new_args.into_iter().map(Into::into));
        }
        self
    }

    /// Mark as a cleanup operation whose failure is not surfaced.
    pub fn tolerated(mut self) -> Self {
        self.policy = FailurePolicy::Tolerated;
        self
    }

    /// Capture output instead of inheriting the terminal.
    pub fn captured(mut self) -> Self {
        self.io = IoMode::Captured;
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.policy == FailurePolicy::Fatal
    }

    /// Program name (or `sh` for opaque command lines).
    pub fn program(&self) -> &str {
        match &self.command {
            CommandLine::Program { program, .. } => program,
            CommandLine::Shell(_) => "sh",
        }
    }

    /// Re-target this operation into the installed system at `root`.
    ///
    /// The result runs `chroot <root> /bin/bash -c "source /etc/profile && …"`
    /// so the target's environment (PATH, portage variables) applies. A
    /// working directory is carried over as a `cd` inside the chroot.
    pub fn in_chroot(self, root: &Path) -> Self {
        let mut inner = self.command_text();
        if let Some(dir) = &self.workdir {
            inner = format!("cd {} && {}", quote(&dir.to_string_lossy()), inner);
        }
        Self {
            command: CommandLine::Program {
                program: "chroot".to_string(),
                args: vec![
                    root.to_string_lossy().into_owned(),
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    format!("source /etc/profile && {}", inner),
                ],
            },
            policy: self.policy,
            io: self.io,
            workdir: None,
        }
    }

    fn command_text(&self) -> String {
        match &self.command {
            CommandLine::Program { program, args } => {
                let mut parts = Vec::with_capacity(args.len() + 1);
                parts.push(quote(program));
                parts.extend(args.iter().map(|a| quote(a)));
                parts.join(" ")
            }
            CommandLine::Shell(line) => line.clone(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dir) = &self.workdir {
            write!(f, "(cd {}) ", dir.display())?;
        }
        write!(f, "{}", self.command_text())
    }
}

/// Quote an argument for display and for chroot command lines.
fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '=' | ':' | ',' | '@' | '%' | '+')
        });
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Typed arguments for one tool of the privileged OS toolset.
///
/// Implementors map struct fields to the exact flags the tool expects, so a
/// flag mismatch is a compile error instead of a runtime failure.
pub trait ToolArgs {
    /// Build the operation that runs this tool.
    fn to_operation(&self) -> Operation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_fatal_and_interactive() {
        let op = Operation::new("mkfs.ext4").arg("/dev/sda2");
        assert!(op.is_fatal());
        assert_eq!(op.io, IoMode::Interactive);
        assert_eq!(op.program(), "mkfs.ext4");
    }

    #[test]
    fn test_display_quotes_when_needed() {
        let op = Operation::new("efibootmgr").args(["-L", "Gentoo Linux", "-l", r"\efi\boot\bootx64.efi"]);
        assert_eq!(
            op.to_string(),
            r"efibootmgr -L 'Gentoo Linux' -l '\efi\boot\bootx64.efi'"
        );
    }

    #[test]
    fn test_shell_ignores_args() {
        let op = Operation::shell("env-update").arg("ignored");
        assert_eq!(op.to_string(), "env-update");
        assert_eq!(op.program(), "sh");
    }

    #[test]
    fn test_in_chroot_wraps_command() {
        let op = Operation::new("emerge")
            .arg("--sync")
            .tolerated()
            .in_chroot(Path::new("/mnt/gentoo"));
        assert_eq!(op.program(), "chroot");
        assert_eq!(op.policy, FailurePolicy::Tolerated);
        assert_eq!(
            op.to_string(),
            "chroot /mnt/gentoo /bin/bash -c 'source /etc/profile && emerge --sync'"
        );
    }

    #[test]
    fn test_in_chroot_carries_workdir() {
        let op = Operation::new("make")
            .in_dir("/usr/src/linux")
            .in_chroot(Path::new("/mnt/gentoo"));
        assert!(op.workdir.is_none());
        assert!(op.to_string().contains("cd /usr/src/linux && make"));
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }
}
