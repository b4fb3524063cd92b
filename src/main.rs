//! gentinstall - Main entry point
//!
//! Parses the command line, runs the pre-flight checks and drives the stage
//! pipeline on the real terminal, process runner and filesystem.

use std::path::Path;
use std::process::ExitCode;

use gentinstall::cli::{Cli, Commands};
use gentinstall::config_file::InstallerConfig;
use gentinstall::console::TerminalConsole;
use gentinstall::disk_guard::{DiskGuard, HostProbe};
use gentinstall::error::{InstallerError, Result};
use gentinstall::executor::SystemRunner;
use gentinstall::fetch::HttpFetcher;
use gentinstall::install_state::InstallationState;
use gentinstall::pipeline::{Pipeline, StageContext};
use gentinstall::process_guard::{self, ProcessGuard};
use gentinstall::writer::FsWriter;
use gentinstall::{logging, sanity, stages};

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);
    tracing::info!("gentinstall starting up");

    // Children are still cleaned up by ProcessGuard's Drop if this fails
    if let Err(e) = process_guard::init_signal_handlers() {
        tracing::warn!(error = %e, "failed to initialize signal handlers");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "installer stopped");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match cli.command() {
        Commands::Validate { config } => {
            load_config(Some(&config))?;
            println!("Configuration file is valid: {}", config.display());
            Ok(())
        }
        Commands::DefaultConfig { output } => {
            InstallerConfig::default()
                .save_to_file(&output)
                .map_err(|e| InstallerError::config(format!("{:#}", e)))?;
            println!("Default configuration written to {}", output.display());
            Ok(())
        }
        Commands::Stages => list_stages(),
        Commands::CheckDisk { path } => {
            let config = load_config(cli.config.as_deref())?;
            let guard = DiskGuard::new(config.guard.min_free_bytes()).with_dry_run(cli.dry_run);
            let report = guard.require(&HostProbe, &path)?;
            println!("{}", report);
            Ok(())
        }
        Commands::Install {
            scratch_dirs,
            no_pause,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            config.guard.entry_paths.extend(scratch_dirs);
            if no_pause {
                config.pause_between_stages = false;
            }
            sanity::run_preflight_checks(cli.skip_root_check, cli.dry_run)?;
            install(&config, cli.dry_run)
        }
    }
}

/// Load and validate the configuration; defaults when no file is given.
fn load_config(path: Option<&Path>) -> Result<InstallerConfig> {
    let config = match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            InstallerConfig::load_from_file(path)
                .map_err(|e| InstallerError::config(format!("{:#}", e)))?
        }
        None => InstallerConfig::default(),
    };
    config
        .validate()
        .map_err(|e| InstallerError::config(format!("{:#}", e)))?;
    Ok(config)
}

fn list_stages() -> Result<()> {
    let registry = stages::default_registry()?;
    for (index, stage) in registry.stages().iter().enumerate() {
        println!(
            "{:>3}. {:<20} {:<16} {:<6} {:<5} {}",
            index + 1,
            stage.id.to_string(),
            stage.enablement.to_string(),
            stage.scope.to_string(),
            if stage.heavy { "heavy" } else { "" },
            stage.id.description()
        );
    }
    Ok(())
}

fn install(config: &InstallerConfig, dry_run: bool) -> Result<()> {
    let _guard = ProcessGuard::new();

    let (mut runner, mut writer) = if dry_run {
        tracing::info!("dry run: commands are printed, not executed");
        (SystemRunner::dry_run(), FsWriter::dry_run())
    } else {
        (SystemRunner::new(), FsWriter::new())
    };
    let mut fetcher = HttpFetcher::new()?;
    let mut console = TerminalConsole::stdio();
    let mut probe = HostProbe;

    let pipeline = Pipeline::new(
        stages::default_registry()?,
        DiskGuard::new(config.guard.min_free_bytes()).with_dry_run(dry_run),
    );
    let mut state = InstallationState::new();
    let mut ctx = StageContext::new(config, &mut runner, &mut console, &mut writer, &mut fetcher);

    let report = pipeline.run(&mut ctx, &mut probe, &mut state)?;
    tracing::info!(completed = report.completed().len(), "installation finished");
    println!(
        "\nInstallation finished. Review the summary above, then reboot and pick \"{}\".",
        config.boot_label
    );
    Ok(())
}
