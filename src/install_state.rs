//! Installation State
//!
//! The mutable record threaded through every stage: which device fills which
//! role, whether the volume manager owns the data roles, and which init
//! system the bootstrap tarball carries.
//!
//! # Design Principles
//!
//! - **No Global State**: one `InstallationState` is created per run and
//!   passed by `&mut` into each stage procedure.
//! - **Single Writer**: once LVM is enabled, root/home/swap can only be
//!   replaced through `enable_volume_manager`.
//! - **Write-Once Init System**: the bootstrap stage sets it; later stages
//!   only read it.

use crate::types::{DeviceRole, InitSystem};
use std::collections::BTreeMap;
use std::fmt;
use strum::IntoEnumIterator;
use thiserror::Error;

/// Fields of the state a stage can declare it reads or writes.
///
/// Used by the registry's dependency audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    DeviceRoles,
    VolumeManager,
    InitSystem,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceRoles => write!(f, "device roles"),
            Self::VolumeManager => write!(f, "volume manager"),
            Self::InitSystem => write!(f, "init system"),
        }
    }
}

/// Errors raised when a stage tries to break a state invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Raw partition written to a role the volume manager owns
    #[error("Role {role} is managed by LVM; refusing to assign {path}")]
    ManagedRole { role: DeviceRole, path: String },

    /// Init system already chosen by the bootstrap stage
    #[error("Init system already set to {current}; refusing to change it to {requested}")]
    InitSystemAlreadySet {
        current: InitSystem,
        requested: InitSystem,
    },
}

/// Logical-volume paths produced by the encryption/volume stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLayout {
    pub root: String,
    pub home: String,
    /// Empty when no swap volume was created
    pub swap: String,
    /// LUKS partition the volume group lives on; empty when unknown
    pub container: String,
}

impl VolumeLayout {
    /// Standard layout inside volume group `vg`.
    pub fn in_group(vg: &str, with_swap: bool) -> Self {
        Self {
            root: format!("/dev/{}/root", vg),
            home: format!("/dev/{}/home", vg),
            swap: if with_swap {
                format!("/dev/{}/swap", vg)
            } else {
                String::new()
            },
            container: String::new(),
        }
    }

    /// Record the encrypted partition under the volume group.
    pub fn on_container(mut self, device: impl Into<String>) -> Self {
        self.container = device.into().trim().to_string();
        self
    }
}

/// Installation state shared read/write across stages.
///
/// # Example
///
/// ```
/// use gentinstall::install_state::InstallationState;
/// use gentinstall::types::DeviceRole;
///
/// let mut state = InstallationState::new();
/// state.assign_device(DeviceRole::Root, "/dev/sda2").unwrap();
/// assert_eq!(state.effective_root_device(), "/dev/sda2");
/// assert!(!state.is_swap_configured());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationState {
    device_roles: BTreeMap<DeviceRole, String>,
    volume_manager_enabled: bool,
    encrypted_container: String,
    init_system: Option<InitSystem>,
}

impl Default for InstallationState {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallationState {
    /// Create an empty state: every role unset, LVM off, no init system.
    pub fn new() -> Self {
        Self {
            device_roles: DeviceRole::iter().map(|role| (role, String::new())).collect(),
            volume_manager_enabled: false,
            encrypted_container: String::new(),
            init_system: None,
        }
    }

    /// Device path for a role; empty when not provisioned.
    pub fn device(&self, role: DeviceRole) -> &str {
        self.device_roles.get(&role).map(String::as_str).unwrap_or("")
    }

    /// Whether a role has a device assigned.
    pub fn has_device(&self, role: DeviceRole) -> bool {
        !self.device(role).is_empty()
    }

    /// All roles with their (possibly empty) paths, in role order.
    pub fn device_roles(&self) -> &BTreeMap<DeviceRole, String> {
        &self.device_roles
    }

    /// Assign a raw device to a role. An empty path clears the role.
    ///
    /// # Errors
    ///
    /// `ManagedRole` if LVM is enabled and the role is root/home/swap.
    pub fn assign_device(
        &mut self,
        role: DeviceRole,
        path: impl Into<String>,
    ) -> Result<(), StateError> {
        let path = path.into();
        if self.volume_manager_enabled && role.is_volume_managed() {
            return Err(StateError::ManagedRole { role, path });
        }
        tracing::debug!(%role, path = %path, "device role assigned");
        self.device_roles.insert(role, path.trim().to_string());
        Ok(())
    }

    /// Hand root/home/swap over to the volume manager.
    ///
    /// Overwrites whatever was collected before: logical-volume paths
    /// supersede raw partitions.
    pub fn enable_volume_manager(&mut self, layout: VolumeLayout) {
        tracing::info!(
            root = %layout.root,
            home = %layout.home,
            swap = %layout.swap,
            container = %layout.container,
            "volume manager enabled"
        );
        self.encrypted_container = layout.container;
        self.device_roles.insert(DeviceRole::Root, layout.root);
        self.device_roles.insert(DeviceRole::Home, layout.home);
        self.device_roles.insert(DeviceRole::Swap, layout.swap);
        self.volume_manager_enabled = true;
    }

    #[inline]
    pub fn volume_manager_enabled(&self) -> bool {
        self.volume_manager_enabled
    }

    /// LUKS partition holding the volume group, when one was recorded.
    pub fn encrypted_container(&self) -> Option<&str> {
        Some(self.encrypted_container.as_str()).filter(|device| !device.is_empty())
    }

    #[inline]
    pub fn init_system(&self) -> Option<InitSystem> {
        self.init_system
    }

    /// Record the init system of the installed tarball.
    ///
    /// # Errors
    ///
    /// `InitSystemAlreadySet` if a different value was recorded earlier.
    pub fn set_init_system(&mut self, init: InitSystem) -> Result<(), StateError> {
        match self.init_system {
            Some(current) if current != init => Err(StateError::InitSystemAlreadySet {
                current,
                requested: init,
            }),
            _ => {
                self.init_system = Some(init);
                Ok(())
            }
        }
    }

    /// Root device to format, mount and reference in boot config.
    ///
    /// Already LVM-aware: `enable_volume_manager` rewrites the root role.
    pub fn effective_root_device(&self) -> &str {
        self.device(DeviceRole::Root)
    }

    pub fn is_swap_configured(&self) -> bool {
        self.has_device(DeviceRole::Swap)
    }

    /// Roles required before filesystems are created or mounted.
    ///
    /// Returns the missing ones; empty means the precondition holds.
    pub fn missing_boot_devices(&self) -> Vec<DeviceRole> {
        [DeviceRole::Efi, DeviceRole::Root]
            .into_iter()
            .filter(|role| !self.has_device(*role))
            .collect()
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (role, path) in &self.device_roles {
            let shown = if path.is_empty() { "-" } else { path.as_str() };
            writeln!(f, "  {:<5} {}", role.to_string(), shown)?;
        }
        writeln!(f, "  lvm   {}", self.volume_manager_enabled)?;
        match self.init_system {
            Some(init) => write!(f, "  init  {}", init),
            None => write!(f, "  init  -"),
        }
    }
}
