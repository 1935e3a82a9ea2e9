//! Core volume types: identity, declared configuration, lifecycle state and
//! the tri-state action parameters.
//!
//! These types form the data model shared by the manager, the driver trait
//! and the wire envelopes in [`crate::message`].  They are all
//! [`Serialize`]/[`Deserialize`] and keep the field names of the volume
//! JSON protocol.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Process-wide unique identifier for a volume.
///
/// Minted by the manager at creation time and immutable afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// User-facing identity of a volume: a name plus lookup labels.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeLocator {
    /// Volume name, unique under the active uniqueness policy.
    #[serde(default)]
    pub name: String,
    /// Labels used for lookup and filtering.
    #[serde(default, alias = "labels")]
    pub volume_labels: HashMap<String, String>,
}

impl VolumeLocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.volume_labels.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Declared configuration
// ---------------------------------------------------------------------------

/// Declared configuration for a volume.
///
/// The core only looks at `config_labels` (for `ConfigLabel` queries); the
/// rest is handed to the driver untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Requested capacity in bytes.
    #[serde(default)]
    pub size: u64,
    /// Filesystem format, e.g. `"ext4"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Labels attached to the configuration rather than the locator.
    #[serde(default)]
    pub config_labels: HashMap<String, String>,
    /// Driver-specific options.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl VolumeSpec {
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }
}

/// Where a volume's data originates.  Only set at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    /// Volume (or snapshot) this volume was cloned from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<VolumeId>,
    /// External seed URI, interpreted by the driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
}

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

/// Lifecycle state of a volume.
///
/// Legal transitions live in [`crate::state`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Provisioned, no attach or mount artifacts.
    #[default]
    Created,
    /// Bound to a host device path.
    Attached,
    /// Attached and bound to a filesystem path.
    Mounted,
    /// Terminal; the volume has been removed.
    Deleted,
}

impl VolumeState {
    pub fn is_attached(self) -> bool {
        matches!(self, Self::Attached | Self::Mounted)
    }

    pub fn is_mounted(self) -> bool {
        self == Self::Mounted
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Attached => "attached",
            Self::Mounted => "mounted",
            Self::Deleted => "deleted",
        })
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Desired change along one dimension of volume state.
///
/// Encoded on the wire as the integers `0`, `1` and `2`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum VolumeActionParam {
    /// Leave this dimension unchanged.
    #[default]
    Ignore,
    /// Turn the dimension off (detach / unmount).
    Off,
    /// Turn the dimension on (attach / mount).
    On,
}

impl From<VolumeActionParam> for u8 {
    fn from(p: VolumeActionParam) -> Self {
        match p {
            VolumeActionParam::Ignore => 0,
            VolumeActionParam::Off => 1,
            VolumeActionParam::On => 2,
        }
    }
}

impl TryFrom<u8> for VolumeActionParam {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Ignore),
            1 => Ok(Self::Off),
            2 => Ok(Self::On),
            other => Err(format!("invalid volume action parameter {other}")),
        }
    }
}

impl fmt::Display for VolumeActionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ignore => "ignore",
            Self::Off => "off",
            Self::On => "on",
        })
    }
}

/// Desired-state delta for a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStateAction {
    /// Attach or detach the volume.
    #[serde(default)]
    pub attach: VolumeActionParam,
    /// Mount or unmount the volume.
    #[serde(default)]
    pub mount: VolumeActionParam,
    /// Target path for `mount = On`.
    #[serde(default)]
    pub mount_path: String,
    /// Device path, filled in by the system on attach.
    #[serde(default)]
    pub device_path: String,
}

impl VolumeStateAction {
    pub fn attach(param: VolumeActionParam) -> Self {
        Self {
            attach: param,
            ..Default::default()
        }
    }

    pub fn mount(param: VolumeActionParam, mount_path: impl Into<String>) -> Self {
        Self {
            mount: param,
            mount_path: mount_path.into(),
            ..Default::default()
        }
    }

    pub fn with_attach(mut self, param: VolumeActionParam) -> Self {
        self.attach = param;
        self
    }
}

// ---------------------------------------------------------------------------
// Volume aggregate
// ---------------------------------------------------------------------------

/// A volume: identity, declared configuration and current lifecycle state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: VolumeId,
    pub locator: VolumeLocator,
    pub spec: VolumeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Set for read-only snapshots.
    #[serde(default)]
    pub readonly: bool,
    pub state: VolumeState,
    /// Host device path, non-empty while attached.
    #[serde(default)]
    pub device_path: String,
    /// Filesystem path, non-empty while mounted.
    #[serde(default)]
    pub mount_path: String,
}

impl Volume {
    pub fn new(
        id: VolumeId,
        locator: VolumeLocator,
        spec: VolumeSpec,
        source: Option<Source>,
    ) -> Self {
        Self {
            id,
            locator,
            spec,
            source,
            readonly: false,
            state: VolumeState::Created,
            device_path: String::new(),
            mount_path: String::new(),
        }
    }

    /// Whether the recorded paths agree with the lifecycle state.
    ///
    /// A mounted volume always has a device path; a volume that is not
    /// attached carries neither path.
    pub fn is_consistent(&self) -> bool {
        match self.state {
            VolumeState::Created | VolumeState::Deleted => {
                self.device_path.is_empty() && self.mount_path.is_empty()
            }
            VolumeState::Attached => !self.device_path.is_empty() && self.mount_path.is_empty(),
            VolumeState::Mounted => !self.device_path.is_empty() && !self.mount_path.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("v-1".into());
        assert_eq!(id.to_string(), "v-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"v-1\"");
    }

    #[test]
    fn action_param_wire_encoding() {
        let action = VolumeStateAction::mount(VolumeActionParam::On, "/mnt/a")
            .with_attach(VolumeActionParam::Off);
        let json = serde_json::to_value(&action).expect("serialize");
        assert_eq!(json["attach"], 1);
        assert_eq!(json["mount"], 2);
        assert_eq!(json["mount_path"], "/mnt/a");

        let de: VolumeStateAction = serde_json::from_str(r#"{"mount":2}"#).expect("deserialize");
        assert_eq!(de.attach, VolumeActionParam::Ignore);
        assert_eq!(de.mount, VolumeActionParam::On);
        assert!(de.mount_path.is_empty());

        assert!(serde_json::from_str::<VolumeStateAction>(r#"{"attach":3}"#).is_err());
    }

    #[test]
    fn locator_accepts_labels_alias() {
        let loc: VolumeLocator =
            serde_json::from_str(r#"{"name":"vol1","labels":{"app":"db"}}"#).expect("deserialize");
        assert_eq!(loc, VolumeLocator::new("vol1").with_label("app", "db"));
    }

    #[test]
    fn state_helpers() {
        assert!(!VolumeState::Created.is_attached());
        assert!(VolumeState::Attached.is_attached());
        assert!(VolumeState::Mounted.is_attached());
        assert!(VolumeState::Mounted.is_mounted());
        assert_eq!(VolumeState::Attached.to_string(), "attached");
    }

    #[test]
    fn new_volume_is_consistent() {
        let mut vol = Volume::new(
            "v-1".into(),
            VolumeLocator::new("vol1"),
            VolumeSpec::with_size(1024),
            None,
        );
        assert_eq!(vol.state, VolumeState::Created);
        assert!(vol.is_consistent());

        vol.state = VolumeState::Mounted;
        vol.mount_path = "/mnt/v1".into();
        assert!(!vol.is_consistent());
    }
}
