//! Type-safe domain types for the installer
//!
//! Replaces stringly-typed roles and menu choices with enums that provide
//! exhaustive matching. The stage3 variant menu is a lookup table rather
//! than a chain of conditionals: adding a variant is a one-row change.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Logical slot a block device fills in the installed system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceRole {
    Efi,
    Root,
    Home,
    Swap,
}

impl DeviceRole {
    /// Roles the encryption/volume stage owns once LVM is enabled.
    pub const fn is_volume_managed(self) -> bool {
        matches!(self, Self::Root | Self::Home | Self::Swap)
    }
}

/// Init system of the installed stage3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum InitSystem {
    Systemd,
    Openrc,
}

impl InitSystem {
    /// Whether an `eselect profile list` line belongs to this init system.
    ///
    /// Gentoo tags systemd profiles with `systemd`; every other profile is
    /// an OpenRC profile.
    pub fn matches_profile(self, profile_line: &str) -> bool {
        let is_systemd = profile_line.contains("systemd");
        match self {
            Self::Systemd => is_systemd,
            Self::Openrc => !is_systemd,
        }
    }
}

/// Stage3 tarball offered by the bootstrap stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage3Variant {
    #[default]
    Systemd,
    Openrc,
    DesktopSystemd,
    DesktopOpenrc,
}

/// One row of the stage3 menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    /// Menu key typed by the operator
    pub choice: &'static str,
    pub variant: Stage3Variant,
    /// Menu label
    pub label: &'static str,
    /// Autobuild flavor, used in both the listing directory and the filename
    pub flavor: &'static str,
    pub init: InitSystem,
    pub desktop: bool,
}

/// The stage3 menu, in display order. The first row is the default.
pub const STAGE3_VARIANTS: &[VariantSpec] = &[
    VariantSpec {
        choice: "1",
        variant: Stage3Variant::Systemd,
        label: "systemd",
        flavor: "systemd",
        init: InitSystem::Systemd,
        desktop: false,
    },
    VariantSpec {
        choice: "2",
        variant: Stage3Variant::Openrc,
        label: "openrc",
        flavor: "openrc",
        init: InitSystem::Openrc,
        desktop: false,
    },
    VariantSpec {
        choice: "3",
        variant: Stage3Variant::DesktopSystemd,
        label: "systemd (desktop)",
        flavor: "desktop-systemd",
        init: InitSystem::Systemd,
        desktop: true,
    },
    VariantSpec {
        choice: "4",
        variant: Stage3Variant::DesktopOpenrc,
        label: "openrc (desktop)",
        flavor: "desktop-openrc",
        init: InitSystem::Openrc,
        desktop: true,
    },
];

impl Stage3Variant {
    /// Resolve an operator's menu answer. Empty or unknown answers fall back
    /// to the first row.
    pub fn from_choice(choice: &str) -> &'static VariantSpec {
        let choice = choice.trim();
        STAGE3_VARIANTS
            .iter()
            .find(|spec| spec.choice == choice)
            .unwrap_or(&STAGE3_VARIANTS[0])
    }

    /// Table row for this variant.
    pub fn spec(self) -> &'static VariantSpec {
        STAGE3_VARIANTS
            .iter()
            .find(|spec| spec.variant == self)
            .unwrap_or(&STAGE3_VARIANTS[0])
    }

    pub fn init_system(self) -> InitSystem {
        self.spec().init
    }
}

impl VariantSpec {
    /// Directory listing URL, e.g.
    /// `https://distfiles.gentoo.org/releases/amd64/autobuilds/current-stage3-amd64-openrc/`.
    pub fn listing_url(&self, mirror: &str, arch: &str) -> String {
        format!(
            "{}/{}/autobuilds/current-stage3-{}-{}/",
            mirror.trim_end_matches('/'),
            arch,
            arch,
            self.flavor
        )
    }

    /// Tarball filename prefix, e.g. `stage3-amd64-openrc-`.
    pub fn file_prefix(&self, arch: &str) -> String {
        format!("stage3-{}-{}-", arch, self.flavor)
    }
}
