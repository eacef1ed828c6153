// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node states and the actions that move a node between them.
//!
//! These mirror the bare metal service's documented state machine. The state
//! machine itself lives in the service; these types only name its states so
//! that callers get exhaustiveness checking when they branch on them.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Implements `Serialize` and `Deserialize` in terms of the type's strum
/// string spellings, so the wire format and `Display` never drift apart.
macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_str(&s).map_err(|_| {
                    de::Error::custom(format!(
                        "unknown {} {:?}",
                        stringify!($ty),
                        s
                    ))
                })
            }
        }
    };
}

/// The provision state of a node.
///
/// States this crate does not name decode as [`ProvisionState::Other`] so a
/// newer service can still be observed; they never match a named state.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
pub enum ProvisionState {
    #[strum(serialize = "enroll")]
    Enroll,
    #[strum(serialize = "verifying")]
    Verifying,
    #[strum(serialize = "manageable")]
    Manageable,
    #[strum(serialize = "inspecting")]
    Inspecting,
    #[strum(serialize = "inspect wait")]
    InspectWait,
    #[strum(serialize = "inspect failed")]
    InspectFailed,
    #[strum(serialize = "cleaning")]
    Cleaning,
    #[strum(serialize = "clean wait")]
    CleanWait,
    #[strum(serialize = "clean failed")]
    CleanFailed,
    #[strum(serialize = "clean hold")]
    CleanHold,
    #[strum(serialize = "available")]
    Available,
    #[strum(serialize = "deploying")]
    Deploying,
    #[strum(serialize = "wait call-back")]
    WaitCallBack,
    #[strum(serialize = "deploy failed")]
    DeployFailed,
    #[strum(serialize = "deploy hold")]
    DeployHold,
    #[strum(serialize = "active")]
    Active,
    #[strum(serialize = "deleting")]
    Deleting,
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "adopting")]
    Adopting,
    #[strum(serialize = "adopt failed")]
    AdoptFailed,
    #[strum(serialize = "rescuing")]
    Rescuing,
    #[strum(serialize = "rescue wait")]
    RescueWait,
    #[strum(serialize = "rescue")]
    Rescue,
    #[strum(serialize = "rescue failed")]
    RescueFailed,
    #[strum(serialize = "unrescuing")]
    Unrescuing,
    #[strum(serialize = "unrescue failed")]
    UnrescueFailed,
    #[strum(serialize = "servicing")]
    Servicing,
    #[strum(serialize = "service wait")]
    ServiceWait,
    #[strum(serialize = "service failed")]
    ServiceFailed,
    #[strum(serialize = "service hold")]
    ServiceHold,
    #[strum(default)]
    Other(String),
}

serde_via_str!(ProvisionState);

impl ProvisionState {
    /// States from which a node can be deleted without first being
    /// undeployed.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            Self::Available
                | Self::Manageable
                | Self::Enroll
                | Self::AdoptFailed
        )
    }
}

/// A provisioning verb sent to the service to request a state transition.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
pub enum ProvisionAction {
    #[strum(serialize = "manage")]
    Manage,
    #[strum(serialize = "provide")]
    Provide,
    #[strum(serialize = "inspect")]
    Inspect,
    #[strum(serialize = "clean")]
    Clean,
    #[strum(serialize = "active")]
    Active,
    #[strum(serialize = "deleted")]
    Deleted,
    #[strum(serialize = "rebuild")]
    Rebuild,
    #[strum(serialize = "abort")]
    Abort,
    #[strum(serialize = "adopt")]
    Adopt,
    #[strum(serialize = "rescue")]
    Rescue,
    #[strum(serialize = "unrescue")]
    Unrescue,
}

serde_via_str!(ProvisionAction);

impl ProvisionAction {
    /// The state a node settles in once this action completes successfully,
    /// or `None` if the end state depends on what was aborted.
    pub fn expected_state(&self) -> Option<ProvisionState> {
        match self {
            Self::Manage | Self::Inspect | Self::Clean => {
                Some(ProvisionState::Manageable)
            }
            Self::Provide | Self::Deleted => Some(ProvisionState::Available),
            Self::Active | Self::Rebuild | Self::Adopt | Self::Unrescue => {
                Some(ProvisionState::Active)
            }
            Self::Rescue => Some(ProvisionState::Rescue),
            Self::Abort => None,
        }
    }
}

/// The power state reported for a node.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
pub enum PowerState {
    #[strum(serialize = "power on")]
    On,
    #[strum(serialize = "power off")]
    Off,
    #[strum(serialize = "error")]
    Error,
}

serde_via_str!(PowerState);

/// A power verb. `Display` and `FromStr` use the short verb ("off"); on the
/// wire the service expects its target spelling ("power off").
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
)]
pub enum PowerAction {
    #[strum(serialize = "on")]
    On,
    #[strum(serialize = "off")]
    Off,
    #[strum(serialize = "reboot")]
    Reboot,
    #[strum(serialize = "soft off")]
    SoftOff,
    #[strum(serialize = "soft reboot")]
    SoftReboot,
}

impl PowerAction {
    /// The `target` value the service expects for this action.
    pub fn target(&self) -> &'static str {
        match self {
            Self::On => "power on",
            Self::Off => "power off",
            Self::Reboot => "rebooting",
            Self::SoftOff => "soft power off",
            Self::SoftReboot => "soft rebooting",
        }
    }

    pub fn expected_state(&self) -> PowerState {
        match self {
            Self::Off | Self::SoftOff => PowerState::Off,
            Self::On | Self::Reboot | Self::SoftReboot => PowerState::On,
        }
    }

    /// Whether the node needs time to settle before its reported power
    /// state is meaningful. A hard power-off or a reboot can briefly report
    /// the old state after the request is accepted.
    pub fn needs_settle_delay(&self) -> bool {
        matches!(self, Self::Off | Self::Reboot | Self::SoftReboot)
    }
}

impl Serialize for PowerAction {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.target())
    }
}
