//! Type-safe arguments for boot, account and service tools.

use crate::operation::{Operation, ToolArgs};
use crate::types::InitSystem;
use thiserror::Error;

/// Loader path handed to the firmware, relative to the EFI partition.
pub const DEFAULT_EFI_LOADER: &str = r"\efi\boot\bootx64.efi";

/// Type-safe arguments for `efibootmgr --create`.
///
/// # Field to Flag Mapping
///
/// | Rust Field  | CLI Flag | Notes |
/// |-------------|----------|-------|
/// | `disk`      | `-d`     | whole disk holding the EFI partition |
/// | `partition` | `-p`     | EFI partition number on that disk |
/// | `label`     | `-L`     | boot menu label |
/// | `loader`    | `-l`     | backslash-separated path on the ESP |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiBootEntryArgs {
    pub disk: String,
    pub partition: u32,
    pub label: String,
    pub loader: String,
}

impl ToolArgs for EfiBootEntryArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("efibootmgr").args([
            "-c".to_string(),
            "-d".to_string(),
            self.disk.clone(),
            "-p".to_string(),
            self.partition.to_string(),
            "-L".to_string(),
            self.label.clone(),
            "-l".to_string(),
            self.loader.clone(),
        ])
    }
}

/// `efibootmgr -b <id> -B`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiBootDeleteArgs {
    pub entry: String,
}

impl ToolArgs for EfiBootDeleteArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("efibootmgr").args(["-b", self.entry.as_str(), "-B"])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username must not be empty")]
    Empty,
    #[error("username must be at most 32 characters")]
    TooLong,
    #[error("username must start with a lowercase letter or underscore")]
    BadFirstChar,
    #[error("username may only contain lowercase letters, digits, '_' and '-'")]
    BadChar,
}

/// Check a login name against the portable `useradd` rules.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    let mut chars = name.chars();
    let first = chars.next().ok_or(UsernameError::Empty)?;
    if name.len() > 32 {
        return Err(UsernameError::TooLong);
    }
    if !(first.is_ascii_lowercase() || first == '_') {
        return Err(UsernameError::BadFirstChar);
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
        return Err(UsernameError::BadChar);
    }
    Ok(())
}

/// Supplementary groups for the first regular user.
pub const DEFAULT_USER_GROUPS: &[&str] = &["users", "wheel", "audio", "video", "usb"];

/// Type-safe arguments for `useradd -m`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAddArgs {
    pub username: String,
    pub groups: Vec<String>,
    pub shell: String,
}

impl UserAddArgs {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            groups: DEFAULT_USER_GROUPS.iter().map(|g| g.to_string()).collect(),
            shell: "/bin/bash".to_string(),
        }
    }
}

impl ToolArgs for UserAddArgs {
    fn to_operation(&self) -> Operation {
        Operation::new("useradd").args([
            "-m".to_string(),
            "-G".to_string(),
            self.groups.join(","),
            "-s".to_string(),
            self.shell.clone(),
            self.username.clone(),
        ])
    }
}

/// `passwd [user]`; interactive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PasswdArgs {
    /// `None` changes root's password
    pub username: Option<String>,
}

impl ToolArgs for PasswdArgs {
    fn to_operation(&self) -> Operation {
        let op = Operation::new("passwd");
        match &self.username {
            Some(user) => op.arg(user.as_str()),
            None => op,
        }
    }
}

/// Enable a service for boot under either init system.
///
/// | Init    | Command                              |
/// |---------|--------------------------------------|
/// | systemd | `systemctl enable <unit>`            |
/// | openrc  | `rc-update add <service> <runlevel>` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableServiceArgs {
    pub init: InitSystem,
    pub service: String,
    /// OpenRC runlevel (`default`, `boot`)
    pub runlevel: &'static str,
}

impl EnableServiceArgs {
    pub fn new(init: InitSystem, service: impl Into<String>) -> Self {
        Self {
            init,
            service: service.into(),
            runlevel: "default",
        }
    }

    pub fn at_boot(mut self) -> Self {
        self.runlevel = "boot";
        self
    }
}

impl ToolArgs for EnableServiceArgs {
    fn to_operation(&self) -> Operation {
        match self.init {
            InitSystem::Systemd => {
                Operation::new("systemctl").args(["enable", self.service.as_str()])
            }
            InitSystem::Openrc => {
                Operation::new("rc-update").args(["add", self.service.as_str(), self.runlevel])
            }
        }
    }
}

/// Open `path` in the configured editor. `editor` may carry flags
/// (`nano -w`).
pub fn edit_file(editor: &str, path: &str) -> Operation {
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or("nano");
    Operation::new(program).args(words).arg(path)
}
