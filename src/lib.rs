//! gentinstall Library
//!
//! Guided Gentoo installation as an ordered pipeline of stages. Each stage
//! asks the operator a few questions, issues typed tool operations through a
//! failure-policy executor and updates a shared installation state. Heavy
//! compile stages are wrapped by a disk-readiness guard so large builds never
//! land on a RAM-backed filesystem.

pub mod cli;
pub mod config_file;
pub mod console;
pub mod disk_guard;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod install_state;
pub mod logging;
pub mod operation;
pub mod pipeline;
pub mod process_guard;
pub mod sanity;
pub mod stages;
pub mod templates;
pub mod tools;
pub mod types;
pub mod writer;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

// Re-export main types for convenience
pub use config_file::{GuardConfig, InstallerConfig};
pub use console::{Console, TerminalConsole};
pub use disk_guard::{DiskGuard, DiskProbe, GuardReport, HostProbe, MountEntry};
pub use error::{InstallerError, Result};
pub use executor::{CommandOutcome, CommandRunner, OperatorDecision, SystemRunner, execute};
pub use fetch::{ArtifactFetcher, HttpFetcher, latest_artifact, matching_artifacts};
pub use install_state::{InstallationState, StateError, StateField, VolumeLayout};
pub use operation::{FailurePolicy, IoMode, Operation, ToolArgs};
pub use pipeline::{
    Enablement, ExecScope, Pipeline, PipelineReport, StageContext, StageDescriptor, StageId,
    StageOutcome, StageRegistry, StageStatus,
};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use stages::default_registry;
pub use types::{DeviceRole, InitSystem, Stage3Variant};
pub use writer::{ConfigWriter, FsWriter};
