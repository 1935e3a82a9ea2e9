//! Volume manager configuration.
//!
//! Controls how volume IDs are minted and how locator names are checked for
//! uniqueness.  A [`VolumeConfig`] can be built from defaults, parsed from
//! YAML, or read from the environment.
//!
//! Environment variables:
//! - `LIBVOLUME_ID_SCHEME`: `sequential` (default) or `uuid`.
//! - `LIBVOLUME_ID_PREFIX`: prefix for minted IDs. Defaults to `v-`.
//! - `LIBVOLUME_UNIQUENESS`: `global` (default), `namespace`, `labels` or `none`.
//! - `LIBVOLUME_NAMESPACE_LABEL`: label key that scopes names when
//!   `LIBVOLUME_UNIQUENESS=namespace`. Defaults to `namespace`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::VolumeError;
use crate::types::VolumeLocator;

const DEFAULT_ID_PREFIX: &str = "v-";
const DEFAULT_NAMESPACE_LABEL: &str = "namespace";

/// Scope within which a locator name must be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UniquenessPolicy {
    /// No uniqueness check at all.
    None,
    /// Names are unique across every volume.
    #[default]
    Global,
    /// Names are unique among volumes sharing the same value for `label`.
    /// Volumes without the label share the default namespace.
    Namespace { label: String },
    /// Two locators collide only if both name and label set are identical.
    Labels,
}

impl UniquenessPolicy {
    /// Whether `candidate` would collide with the already registered `existing`.
    pub fn collides(&self, existing: &VolumeLocator, candidate: &VolumeLocator) -> bool {
        if existing.name != candidate.name {
            return false;
        }
        match self {
            Self::None => false,
            Self::Global => true,
            Self::Namespace { label } => {
                existing.volume_labels.get(label) == candidate.volume_labels.get(label)
            }
            Self::Labels => existing.volume_labels == candidate.volume_labels,
        }
    }
}

/// How new volume IDs are generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    /// `<prefix>1`, `<prefix>2`, ...
    #[default]
    Sequential,
    /// `<prefix><uuid-v4>`
    Uuid,
}

/// Configuration for a [`crate::VolumeManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    #[serde(default)]
    pub id_scheme: IdScheme,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default)]
    pub uniqueness: UniquenessPolicy,
}

fn default_id_prefix() -> String {
    DEFAULT_ID_PREFIX.to_owned()
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            id_scheme: IdScheme::default(),
            id_prefix: default_id_prefix(),
            uniqueness: UniquenessPolicy::default(),
        }
    }
}

impl VolumeConfig {
    /// Parse a YAML document.  Missing fields take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self, VolumeError> {
        serde_yaml::from_str(text)
            .map_err(|e| VolumeError::Validation(format!("invalid volume config: {e}")))
    }

    /// Read the configuration from `LIBVOLUME_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Unrecognised values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(scheme) = lookup("LIBVOLUME_ID_SCHEME") {
            match scheme.as_str() {
                "sequential" => config.id_scheme = IdScheme::Sequential,
                "uuid" => config.id_scheme = IdScheme::Uuid,
                other => warn!(value = other, "unknown LIBVOLUME_ID_SCHEME, using default"),
            }
        }

        if let Some(prefix) = lookup("LIBVOLUME_ID_PREFIX") {
            config.id_prefix = prefix;
        }

        if let Some(policy) = lookup("LIBVOLUME_UNIQUENESS") {
            match policy.as_str() {
                "none" => config.uniqueness = UniquenessPolicy::None,
                "global" => config.uniqueness = UniquenessPolicy::Global,
                "labels" => config.uniqueness = UniquenessPolicy::Labels,
                "namespace" => {
                    let label = lookup("LIBVOLUME_NAMESPACE_LABEL")
                        .unwrap_or_else(|| DEFAULT_NAMESPACE_LABEL.to_owned());
                    config.uniqueness = UniquenessPolicy::Namespace { label };
                }
                other => warn!(value = other, "unknown LIBVOLUME_UNIQUENESS, using default"),
            }
        }

        config
    }
}
