//! Storage driver capability.
//!
//! The manager never touches storage itself; every side effect goes through a
//! [`VolumeDriver`].  Drivers are treated as opaque, bounded calls with a
//! single pass/fail outcome.  Retries are the driver's business.

use async_trait::async_trait;

use crate::config::UniquenessPolicy;
use crate::error::VolumeError;
use crate::types::{Source, VolumeId, VolumeLocator, VolumeSpec};

/// Storage backend used by [`crate::VolumeManager`].
///
/// Failures should be reported as [`VolumeError::Driver`] (see
/// [`VolumeError::driver`]) so the failing step is named in the response;
/// `validate_spec` reports [`VolumeError::Validation`].
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Driver name, used in logs.
    fn name(&self) -> &str;

    /// Uniqueness policy imposed by the driver.
    ///
    /// `None` defers to the manager's configuration.
    fn uniqueness(&self) -> Option<UniquenessPolicy> {
        None
    }

    /// Check that `spec` is acceptable before anything is provisioned.
    async fn validate_spec(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        let _ = spec;
        Ok(())
    }

    /// Provision storage for a new volume under the already minted `id`.
    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
        source: Option<&Source>,
    ) -> Result<(), VolumeError>;

    /// Record an updated locator and spec for an existing volume.
    async fn set(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
    ) -> Result<(), VolumeError>;

    /// Bind the volume to a host device and return the device path.
    async fn attach(&self, id: &VolumeId) -> Result<String, VolumeError>;

    /// Release the host device binding.
    async fn detach(&self, id: &VolumeId) -> Result<(), VolumeError>;

    /// Bind the attached volume's device to `mount_path`.
    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError>;

    /// Remove the filesystem binding at `mount_path`.
    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError>;

    /// Destroy the volume's storage.
    async fn delete(&self, id: &VolumeId) -> Result<(), VolumeError>;

    /// Cut a snapshot of `source` as the new volume `id`.
    async fn snapshot(
        &self,
        source: &VolumeId,
        id: &VolumeId,
        readonly: bool,
    ) -> Result<(), VolumeError>;
}
