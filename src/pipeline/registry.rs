//! Stage descriptors and the registry's dependency audit.

use crate::error::Result;
use crate::install_state::{InstallationState, StateField};
use crate::pipeline::runner::{StageContext, StageOutcome};
use std::collections::HashSet;
use std::fmt;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Stable identifier of every stage, in installation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum StageId {
    PartitionDisk,
    AssignDevices,
    EncryptionLvm,
    CreateFilesystems,
    MountFilesystems,
    SetClock,
    Stage3,
    Binpkg,
    MakeConf,
    SelectMirrors,
    ConfigureRepos,
    CopyDns,
    MountPseudo,
    EnterChroot,
    SyncPortage,
    SelectProfile,
    UseFlags,
    CpuFlags,
    UpdateWorld,
    BaseSystem,
    Kernel,
    ConfigureLvm,
    Fstab,
    Mtab,
    Bootloader,
    EnableLvm2,
    RootPassword,
    AddUser,
    Network,
    Locale,
    TimeSync,
    PostInstall,
}

impl StageId {
    /// Section title shown when the stage starts.
    pub fn description(self) -> &'static str {
        match self {
            Self::PartitionDisk => "Disk Partitioning (UEFI, GPT)",
            Self::AssignDevices => "Assign Partition Devices",
            Self::EncryptionLvm => "LUKS Encryption and LVM Setup",
            Self::CreateFilesystems => "Creating Filesystems",
            Self::MountFilesystems => "Mounting Filesystems",
            Self::SetClock => "Setting Date and Time",
            Self::Stage3 => "Downloading and Extracting Stage3",
            Self::Binpkg => "Binary Package (binpkg) Support",
            Self::MakeConf => "Configuring make.conf",
            Self::SelectMirrors => "Selecting Gentoo Mirrors",
            Self::ConfigureRepos => "Configuring Gentoo Repos",
            Self::CopyDns => "Copying DNS Info",
            Self::MountPseudo => "Mounting Pseudo Filesystems",
            Self::EnterChroot => "Entering Chroot Environment",
            Self::SyncPortage => "Syncing Portage Tree",
            Self::SelectProfile => "Selecting Portage Profile",
            Self::UseFlags => "Configuring USE Flags",
            Self::CpuFlags => "Configuring CPU Flags",
            Self::UpdateWorld => "Updating @world",
            Self::BaseSystem => "Configuring Base System",
            Self::Kernel => "Installing Kernel and Firmware",
            Self::ConfigureLvm => "Configuring LVM",
            Self::Fstab => "Configuring fstab",
            Self::Mtab => "Configuring mtab",
            Self::Bootloader => "Installing systemd-boot Bootloader",
            Self::EnableLvm2 => "Enabling lvm2",
            Self::RootPassword => "Set Root Password",
            Self::AddUser => "Adding a User",
            Self::Network => "Configuring Network",
            Self::Locale => "Configuring Locale",
            Self::TimeSync => "Configuring Time Synchronization",
            Self::PostInstall => "Post-Installation Steps",
        }
    }
}

/// Stage procedure: issues operations and mutates the state.
pub type StageFn = fn(&mut StageContext<'_>, &mut InstallationState) -> Result<StageOutcome>;

/// How the pipeline decides whether a stage runs.
#[derive(Clone, Copy)]
pub enum Enablement {
    /// Runs unconditionally
    Always,
    /// Runs if the operator answers yes
    OptIn { question: &'static str },
    /// Runs only if `condition` holds on the state; when it does and a
    /// question is given, the operator is also asked.
    Derived {
        condition: fn(&InstallationState) -> bool,
        /// Skip reason reported when the condition is false
        unmet: &'static str,
        question: Option<&'static str>,
    },
}

impl fmt::Debug for Enablement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::OptIn { question } => f.debug_struct("OptIn").field("question", question).finish(),
            Self::Derived {
                unmet, question, ..
            } => f
                .debug_struct("Derived")
                .field("unmet", unmet)
                .field("question", question)
                .finish(),
        }
    }
}

impl fmt::Display for Enablement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::OptIn { .. } => write!(f, "opt-in"),
            Self::Derived { question: None, .. } => write!(f, "derived"),
            Self::Derived { question: Some(_), .. } => write!(f, "derived + opt-in"),
        }
    }
}

/// Where a stage's operations execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExecScope {
    /// The live environment
    #[default]
    Host,
    /// Inside `chroot <mount_root>`
    Target,
}

/// One registered stage.
#[derive(Clone, Copy)]
pub struct StageDescriptor {
    pub id: StageId,
    pub enablement: Enablement,
    pub procedure: StageFn,
    /// State fields the procedure (or its enablement) depends on
    pub reads: &'static [StateField],
    pub writes: &'static [StateField],
    pub scope: ExecScope,
    /// Large builds: the Disk-Readiness Guard runs around it
    pub heavy: bool,
}

impl StageDescriptor {
    pub const fn new(id: StageId, enablement: Enablement, procedure: StageFn) -> Self {
        Self {
            id,
            enablement,
            procedure,
            reads: &[],
            writes: &[],
            scope: ExecScope::Host,
            heavy: false,
        }
    }

    pub const fn reads(mut self, fields: &'static [StateField]) -> Self {
        self.reads = fields;
        self
    }

    pub const fn writes(mut self, fields: &'static [StateField]) -> Self {
        self.writes = fields;
        self
    }

    pub const fn in_target(mut self) -> Self {
        self.scope = ExecScope::Target;
        self
    }

    pub const fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }
}

impl fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("id", &self.id)
            .field("enablement", &self.enablement)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("scope", &self.scope)
            .field("heavy", &self.heavy)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("stage {stage} reads {field} but no earlier stage writes it")]
    ConsumerBeforeProducer { stage: StageId, field: StateField },

    #[error("stage {0} is registered more than once")]
    DuplicateStage(StageId),
}

/// Ordered, audited list of stages.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDescriptor>,
}

impl StageRegistry {
    /// Build a registry, rejecting duplicate ids and any stage that reads a
    /// state field no strictly earlier stage writes.
    pub fn new(stages: Vec<StageDescriptor>) -> std::result::Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut produced: HashSet<StateField> = HashSet::new();

        for stage in &stages {
            if !seen.insert(stage.id) {
                return Err(RegistryError::DuplicateStage(stage.id));
            }
            if let Some(field) = stage.reads.iter().find(|f| !produced.contains(*f)) {
                return Err(RegistryError::ConsumerBeforeProducer {
                    stage: stage.id,
                    field: *field,
                });
            }
            produced.extend(stage.writes.iter().copied());
        }

        tracing::debug!(count = stages.len(), "stage registry audited");
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn get(&self, id: StageId) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
