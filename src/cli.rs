use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gentinstall - a guided, stage-by-stage Gentoo Linux installer
#[derive(Parser, Debug)]
#[command(name = "gentinstall")]
#[command(about = "A guided, stage-by-stage Gentoo Linux installer")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: print every command instead of running it.
    ///
    /// Questions are still asked and the stage3 listing is still fetched,
    /// so the walk-through matches a real run. Nothing is written to disk
    /// and the Disk-Readiness Guard only warns.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Configuration file (JSON); defaults apply to anything it omits
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Skip the root privilege check (development only)
    #[arg(long, global = true)]
    pub skip_root_check: bool,

    /// Log at info level instead of warn (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the installation stages in order (default)
    Install {
        /// Extra directory that must be disk-backed before the first stage;
        /// may be repeated
        #[arg(long = "scratch-dir", value_name = "DIR")]
        scratch_dirs: Vec<PathBuf>,

        /// Do not wait for Enter after each stage
        #[arg(long)]
        no_pause: bool,
    },
    /// List the stages with their enablement and scope
    Stages,
    /// Run the Disk-Readiness Guard on a directory
    CheckDisk {
        /// Directory to check
        path: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Write the default configuration to a file
    DefaultConfig {
        /// Where to write it
        output: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The subcommand, `install` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Install {
            scratch_dirs: Vec::new(),
            no_pause: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_install() {
        let cli = Cli::try_parse_from(["gentinstall", "--dry-run"]).expect("parse");
        assert!(cli.dry_run);
        assert_eq!(
            cli.command(),
            Commands::Install {
                scratch_dirs: Vec::new(),
                no_pause: false
            }
        );
    }

    #[test]
    fn test_scratch_dirs_repeat() {
        let cli = Cli::try_parse_from([
            "gentinstall",
            "install",
            "--scratch-dir",
            "/var/tmp",
            "--scratch-dir",
            "/mnt/gentoo/var/tmp",
            "--config",
            "/etc/gentinstall.json",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("/etc/gentinstall.json")));
        match cli.command() {
            Commands::Install { scratch_dirs, .. } => assert_eq!(scratch_dirs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_check_disk_requires_path() {
        assert!(Cli::try_parse_from(["gentinstall", "check-disk"]).is_err());
        let cli = Cli::try_parse_from(["gentinstall", "check-disk", "/var/tmp"]).expect("parse");
        assert_eq!(
            cli.command,
            Some(Commands::CheckDisk {
                path: PathBuf::from("/var/tmp")
            })
        );
    }
}
