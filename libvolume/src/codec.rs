//! Response codec.
//!
//! Maps typed outcomes onto the uniform response envelopes of
//! [`crate::message`].  Internally every failure is a tagged [`VolumeError`];
//! on the wire only its rendered string survives, in the `error` field.
//!
//! The `handle_*` methods are the protocol entry points an embedding
//! transport calls: they never fail, every outcome becomes an envelope.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::manager::VolumeManager;
use crate::message::*;
use crate::query::VolumeQuery;
use crate::types::{Volume, VolumeId};

impl VolumeResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_error(err: &VolumeError) -> Self {
        Self {
            error: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// Back to a result, for callers that only have the wire form.
    pub fn into_result(self) -> Result<(), String> {
        if self.error.is_empty() {
            Ok(())
        } else {
            Err(self.error)
        }
    }
}

impl<T> From<&Result<T, VolumeError>> for VolumeResponse {
    fn from(result: &Result<T, VolumeError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::from_error(e),
        }
    }
}

impl From<Result<(), VolumeError>> for VolumeResponse {
    fn from(result: Result<(), VolumeError>) -> Self {
        Self::from(&result)
    }
}

impl From<Result<VolumeId, VolumeError>> for VolumeCreateResponse {
    fn from(result: Result<VolumeId, VolumeError>) -> Self {
        let response = VolumeResponse::from(&result);
        Self {
            id: result.unwrap_or_default(),
            response,
        }
    }
}

impl From<Result<VolumeId, VolumeError>> for SnapCreateResponse {
    fn from(result: Result<VolumeId, VolumeError>) -> Self {
        Self {
            create: result.into(),
        }
    }
}

impl From<Result<Volume, VolumeError>> for VolumeSetResponse {
    fn from(result: Result<Volume, VolumeError>) -> Self {
        let response = VolumeResponse::from(&result);
        Self {
            volume: result.ok(),
            response,
        }
    }
}

/// Serialize a request or response body to JSON.
pub fn encode<T: Serialize>(body: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(body)
}

/// Parse a JSON request or response body.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, VolumeError> {
    serde_json::from_slice(bytes)
        .map_err(|e| VolumeError::Validation(format!("malformed request: {e}")))
}

// ---------------------------------------------------------------------------
// Protocol entry points
// ---------------------------------------------------------------------------

impl<D: VolumeDriver> VolumeManager<D> {
    pub async fn handle_create(&self, req: VolumeCreateRequest) -> VolumeCreateResponse {
        debug!(%req, "request received");
        self.create(req).await.into()
    }

    /// On failure the response still carries the volume's current committed
    /// state when the volume exists, so callers can see how far a composite
    /// action got.
    pub async fn handle_set(&self, id: &VolumeId, req: VolumeSetRequest) -> VolumeSetResponse {
        debug!(%id, %req, "request received");
        match self.set(id, req).await {
            Ok(volume) => VolumeSetResponse {
                volume: Some(volume),
                response: VolumeResponse::ok(),
            },
            Err(e) => VolumeSetResponse {
                volume: self.get(id).ok(),
                response: VolumeResponse::from_error(&e),
            },
        }
    }

    pub async fn handle_snap_create(&self, req: SnapCreateRequest) -> SnapCreateResponse {
        debug!(%req, "request received");
        self.snapshot(req).await.into()
    }

    pub async fn handle_delete(&self, id: &VolumeId) -> VolumeResponse {
        debug!(%id, "delete request received");
        self.delete(id).await.into()
    }

    /// Enumerate volumes from raw query parameters.
    pub fn handle_enumerate<I, K, V>(&self, params: I) -> Result<Vec<Volume>, VolumeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = VolumeQuery::from_params(params)?;
        Ok(self.enumerate(&query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverOp;

    #[test]
    fn create_response_from_result() {
        let ok = VolumeCreateResponse::from(Ok::<_, VolumeError>(VolumeId::from("v-1")));
        assert_eq!(ok.id, VolumeId::from("v-1"));
        assert!(ok.response.is_ok());

        let err = VolumeCreateResponse::from(Err::<VolumeId, _>(VolumeError::validation(
            "locator name must not be empty",
        )));
        assert!(err.id.is_empty());
        assert_eq!(
            err.response.error,
            "invalid argument: locator name must not be empty"
        );
    }

    #[test]
    fn set_response_from_driver_error() {
        let resp = VolumeSetResponse::from(Err::<Volume, _>(VolumeError::driver(
            DriverOp::Mount,
            "no such device",
        )));
        assert!(resp.volume.is_none());
        assert_eq!(
            resp.response.into_result(),
            Err("driver mount failed: no such device".to_owned())
        );
    }

    #[test]
    fn delete_response() {
        assert!(VolumeResponse::from(Ok::<(), VolumeError>(())).is_ok());
        let resp = VolumeResponse::from(Err::<(), _>(VolumeError::NotFound("v-4".into())));
        assert_eq!(resp.error, "volume v-4 not found");
    }

    #[test]
    fn encode_decode() {
        let resp = SnapCreateResponse::from(Ok::<_, VolumeError>(VolumeId::from("v-2")));
        let bytes = encode(&resp).expect("encode");
        assert_eq!(bytes, br#"{"id":"v-2","error":""}"#.to_vec());

        let back: VolumeCreateResponse = decode(&bytes).expect("decode");
        assert_eq!(back.id, VolumeId::from("v-2"));

        let err = decode::<VolumeCreateRequest>(b"{not json").unwrap_err();
        assert!(err.to_string().starts_with("invalid argument: malformed request"));
    }
}
