//! Request and response bodies of the volume protocol.
//!
//! Field names match the JSON protocol: every response embeds a
//! [`VolumeResponse`] whose `error` is `""` on success.  Conversions from
//! typed results into these envelopes live in [`crate::codec`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Source, Volume, VolumeId, VolumeLocator, VolumeSpec, VolumeStateAction};

// ----- Requests ------------------------------------------------------------

/// Body of a create request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCreateRequest {
    /// User specified volume name and labels.
    #[serde(default)]
    pub locator: VolumeLocator,
    /// Source to create the volume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Storage spec for the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<VolumeSpec>,
}

/// Body of a set request.  Every part is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<VolumeLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<VolumeSpec>,
    /// State modification on this volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<VolumeStateAction>,
}

impl VolumeSetRequest {
    pub fn action(action: VolumeStateAction) -> Self {
        Self {
            action: Some(action),
            ..Default::default()
        }
    }
}

/// Body of a snapshot request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapCreateRequest {
    /// Volume to snapshot.
    pub id: VolumeId,
    /// Identity of the new snapshot volume.
    #[serde(default)]
    pub locator: VolumeLocator,
    #[serde(default)]
    pub readonly: bool,
}

// ----- Responses -----------------------------------------------------------

/// Error status embedded in every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeResponse {
    /// `""` on success, otherwise the error message.
    #[serde(default)]
    pub error: String,
}

/// Body of a create response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCreateResponse {
    /// ID of the newly created volume; empty on failure.
    #[serde(default)]
    pub id: VolumeId,
    #[serde(flatten)]
    pub response: VolumeResponse,
}

/// Body of a set response: the updated volume's fields plus the error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSetResponse {
    #[serde(flatten)]
    pub volume: Option<Volume>,
    #[serde(flatten)]
    pub response: VolumeResponse,
}

/// Body of a snapshot response; same shape as a create response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapCreateResponse {
    #[serde(flatten)]
    pub create: VolumeCreateResponse,
}

// ----- Log summaries -------------------------------------------------------

impl fmt::Display for VolumeCreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeCreate(name={})", self.locator.name)?;
        if let Some(parent) = self.source.as_ref().and_then(|s| s.parent.as_ref()) {
            write!(f, " from {parent}")?;
        }
        Ok(())
    }
}

impl fmt::Display for VolumeSetRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VolumeSet(")?;
        let mut parts = Vec::new();
        if let Some(locator) = &self.locator {
            parts.push(format!("name={}", locator.name));
        }
        if self.spec.is_some() {
            parts.push("spec".to_owned());
        }
        if let Some(action) = &self.action {
            parts.push(format!("attach={} mount={}", action.attach, action.mount));
        }
        write!(f, "{})", parts.join(" "))
    }
}

impl fmt::Display for SnapCreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SnapCreate({} -> name={}, readonly={})",
            self.id, self.locator.name, self.readonly
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{VolumeActionParam, VolumeState};

    #[test]
    fn create_request_from_wire() {
        let req: VolumeCreateRequest =
            serde_json::from_str(r#"{"locator":{"name":"vol1"},"spec":{"size":10737418240}}"#)
                .expect("deserialize");
        assert_eq!(req.locator.name, "vol1");
        assert_eq!(req.spec.as_ref().map(|s| s.size), Some(10 * 1024 * 1024 * 1024));
        assert!(req.source.is_none());
        assert_eq!(req.to_string(), "VolumeCreate(name=vol1)");
    }

    #[test]
    fn create_response_shape() {
        let resp = VolumeCreateResponse {
            id: "v-1".into(),
            response: VolumeResponse::default(),
        };
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json, serde_json::json!({"id": "v-1", "error": ""}));
    }

    #[test]
    fn set_response_flattens_volume() {
        let mut vol = Volume::new(
            "v-1".into(),
            VolumeLocator::new("vol1"),
            VolumeSpec::with_size(1),
            None,
        );
        vol.state = VolumeState::Attached;
        vol.device_path = "/dev/mem/v-1".into();

        let resp = VolumeSetResponse {
            volume: Some(vol),
            response: VolumeResponse::default(),
        };
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json["id"], "v-1");
        assert_eq!(json["state"], "attached");
        assert_eq!(json["device_path"], "/dev/mem/v-1");
        assert_eq!(json["error"], "");
    }

    #[test]
    fn snap_response_matches_create_shape() {
        let resp = SnapCreateResponse {
            create: VolumeCreateResponse {
                id: "v-9".into(),
                response: VolumeResponse {
                    error: "volume v-3 not found".into(),
                },
            },
        };
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"id": "v-9", "error": "volume v-3 not found"})
        );
    }

    #[test]
    fn set_request_display() {
        let req = VolumeSetRequest::action(VolumeStateAction::attach(VolumeActionParam::On));
        assert_eq!(req.to_string(), "VolumeSet(attach=on mount=ignore)");
    }
}
