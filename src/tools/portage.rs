//! Type-safe arguments for Portage and eselect.

use crate::operation::{Operation, ToolArgs};

/// What `emerge` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmergeAction {
    /// Install the listed atoms
    Install(Vec<String>),
    /// `--verbose --update --deep --newuse @world`
    UpdateWorld,
    /// `--sync`
    Sync,
    /// `--config <atom>`
    Config(String),
}

/// Type-safe arguments for `emerge`.
///
/// `ask` adds `--ask` so the operator confirms the merge list in the
/// terminal; such operations are interactive.
///
/// # Example
///
/// ```
/// use gentinstall::operation::ToolArgs;
/// use gentinstall::tools::portage::EmergeArgs;
///
/// let op = EmergeArgs::install(["sys-kernel/gentoo-sources"]).ask().to_operation();
/// assert_eq!(op.to_string(), "emerge --ask sys-kernel/gentoo-sources");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergeArgs {
    pub action: EmergeAction,
    pub ask: bool,
}

impl EmergeArgs {
    pub fn install<I, S>(atoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: EmergeAction::Install(atoms.into_iter().map(Into::into).collect()),
            ask: false,
        }
    }

    pub fn update_world() -> Self {
        Self {
            action: EmergeAction::UpdateWorld,
            ask: false,
        }
    }

    pub fn sync() -> Self {
        Self {
            action: EmergeAction::Sync,
            ask: false,
        }
    }

    pub fn config(atom: impl Into<String>) -> Self {
        Self {
            action: EmergeAction::Config(atom.into()),
            ask: false,
        }
    }

    pub fn ask(mut self) -> Self {
        self.ask = true;
        self
    }
}

impl ToolArgs for EmergeArgs {
    fn to_operation(&self) -> Operation {
        let mut op = Operation::new("emerge");
        if self.ask {
            op = op.arg("--ask");
        }
        match &self.action {
            EmergeAction::Install(atoms) => op.args(atoms.iter().map(String::as_str)),
            EmergeAction::UpdateWorld => op.args(["--verbose", "--update", "--deep", "--newuse", "@world"]),
            EmergeAction::Sync => op.arg("--sync"),
            EmergeAction::Config(atom) => op.args(["--config", atom.as_str()]),
        }
    }
}

/// `eselect <module> list|set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EselectArgs {
    pub module: &'static str,
    pub action: EselectAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EselectAction {
    /// Listing, captured so the stage can filter and show it
    List,
    Set(String),
}

impl EselectArgs {
    pub fn list(module: &'static str) -> Self {
        Self {
            module,
            action: EselectAction::List,
        }
    }

    pub fn set(module: &'static str, value: impl Into<String>) -> Self {
        Self {
            module,
            action: EselectAction::Set(value.into()),
        }
    }
}

impl ToolArgs for EselectArgs {
    fn to_operation(&self) -> Operation {
        let op = Operation::new("eselect").arg(self.module);
        match &self.action {
            EselectAction::List => op.arg("list").captured(),
            EselectAction::Set(value) => op.args(["set", value.as_str()]),
        }
    }
}

/// Entries of an `eselect … list` listing: `(number, text)` for every line
/// shaped like `  [3]   default/linux/amd64/23.0/systemd (stable) *`.
pub fn parse_eselect_list(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix('[')?;
            let (number, text) = rest.split_once(']')?;
            if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some((number.to_string(), text.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_world() {
        assert_eq!(
            EmergeArgs::update_world().ask().to_operation().to_string(),
            "emerge --ask --verbose --update --deep --newuse @world"
        );
    }

    #[test]
    fn test_sync_and_config() {
        assert_eq!(EmergeArgs::sync().to_operation().to_string(), "emerge --sync");
        assert_eq!(
            EmergeArgs::config("sys-libs/timezone-data").to_operation().to_string(),
            "emerge --config sys-libs/timezone-data"
        );
    }

    #[test]
    fn test_eselect_list_is_captured() {
        let op = EselectArgs::list("profile").to_operation();
        assert_eq!(op.to_string(), "eselect profile list");
        assert_eq!(op.io, crate::operation::IoMode::Captured);

        let op = EselectArgs::set("kernel", "1").to_operation();
        assert_eq!(op.to_string(), "eselect kernel set 1");
    }

    #[test]
    fn test_parse_eselect_list() {
        let output = "\
Available profile symlink targets:
  [1]   default/linux/amd64/23.0 (stable) *
  [2]   default/linux/amd64/23.0/systemd (stable)
  [3]   default/linux/amd64/23.0/desktop/plasma/systemd (stable)
";
        let entries = parse_eselect_list(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], ("1".to_string(), "default/linux/amd64/23.0 (stable) *".to_string()));
        assert_eq!(entries[2].0, "3");
    }
}
