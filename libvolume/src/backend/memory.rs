//! In-memory storage driver.
//!
//! [`MemoryDriver`] keeps per-volume attach/mount bookkeeping in a
//! [`DashMap`] and records every driver call in order.  Failures and delays
//! can be injected per [`DriverOp`], which makes it the driver of choice for
//! exercising the manager's sequencing, partial-failure and concurrency
//! behaviour.
//!
//! The driver is strict: it rejects out-of-order calls (mounting a detached
//! volume, deleting an attached one) instead of papering over them.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::config::UniquenessPolicy;
use crate::driver::VolumeDriver;
use crate::error::{DriverOp, VolumeError};
use crate::types::{Source, VolumeId, VolumeLocator, VolumeSpec};

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub op: DriverOp,
    pub volume_id: VolumeId,
}

#[derive(Debug, Clone, Default)]
struct MemVolume {
    locator: VolumeLocator,
    spec: VolumeSpec,
    device_path: Option<String>,
    mount_path: Option<String>,
}

/// Driver that keeps all state in memory.
pub struct MemoryDriver {
    name: String,
    uniqueness: Option<UniquenessPolicy>,
    volumes: DashMap<VolumeId, MemVolume>,
    failures: DashMap<DriverOp, String>,
    delays: DashMap<DriverOp, Duration>,
    calls: Mutex<Vec<DriverCall>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            name: "memory".to_owned(),
            uniqueness: None,
            volumes: DashMap::new(),
            failures: DashMap::new(),
            delays: DashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Impose a driver-level uniqueness policy.
    pub fn with_uniqueness(mut self, policy: UniquenessPolicy) -> Self {
        self.uniqueness = Some(policy);
        self
    }

    /// Make every subsequent call of `op` fail with `reason`.
    pub fn fail_on(&self, op: DriverOp, reason: impl Into<String>) {
        self.failures.insert(op, reason.into());
    }

    pub fn clear_failure(&self, op: DriverOp) {
        self.failures.remove(&op);
    }

    /// Make every subsequent call of `op` sleep for `delay` before it runs.
    pub fn delay_on(&self, op: DriverOp, delay: Duration) {
        self.delays.insert(op, delay);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Operations issued against `id`, in order.
    pub fn ops_for(&self, id: &VolumeId) -> Vec<DriverOp> {
        self.calls()
            .into_iter()
            .filter(|c| &c.volume_id == id)
            .map(|c| c.op)
            .collect()
    }

    pub fn contains(&self, id: &VolumeId) -> bool {
        self.volumes.contains_key(id)
    }

    pub fn mount_path(&self, id: &VolumeId) -> Option<String> {
        self.volumes.get(id).and_then(|v| v.mount_path.clone())
    }

    /// Locator and spec the driver last recorded for `id`.
    pub fn stored(&self, id: &VolumeId) -> Option<(VolumeLocator, VolumeSpec)> {
        self.volumes
            .get(id)
            .map(|v| (v.locator.clone(), v.spec.clone()))
    }

    fn device_path(id: &VolumeId) -> String {
        format!("/dev/mem/{id}")
    }

    /// Record the call, apply any injected delay, then fail it if a failure
    /// is injected for `op`.
    async fn record(&self, op: DriverOp, id: &VolumeId) -> Result<(), VolumeError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DriverCall {
                op,
                volume_id: id.clone(),
            });
        let delay = self.delays.get(&op).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.get(&op) {
            Some(reason) => Err(VolumeError::driver(op, reason.value())),
            None => Ok(()),
        }
    }

    fn missing(op: DriverOp, id: &VolumeId) -> VolumeError {
        VolumeError::driver(op, format!("no such volume {id}"))
    }
}

#[async_trait]
impl VolumeDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn uniqueness(&self) -> Option<UniquenessPolicy> {
        self.uniqueness.clone()
    }

    async fn validate_spec(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        if let Some(reason) = self.failures.get(&DriverOp::ValidateSpec) {
            return Err(VolumeError::driver(DriverOp::ValidateSpec, reason.value()));
        }
        if spec.size == 0 {
            return Err(VolumeError::validation("spec size must be greater than zero"));
        }
        Ok(())
    }

    #[instrument(skip(self, locator, spec, source), fields(name = %locator.name))]
    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
        source: Option<&Source>,
    ) -> Result<(), VolumeError> {
        self.record(DriverOp::Create, id).await?;
        if let Some(parent) = source.and_then(|s| s.parent.as_ref())
            && !self.volumes.contains_key(parent)
        {
            return Err(Self::missing(DriverOp::Create, parent));
        }
        if self.volumes.contains_key(id) {
            return Err(VolumeError::driver(
                DriverOp::Create,
                format!("volume {id} already exists"),
            ));
        }
        self.volumes.insert(
            id.clone(),
            MemVolume {
                locator: locator.clone(),
                spec: spec.clone(),
                ..Default::default()
            },
        );
        debug!(size = spec.size, "volume provisioned in memory");
        Ok(())
    }

    async fn set(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
    ) -> Result<(), VolumeError> {
        self.record(DriverOp::Set, id).await?;
        let mut vol = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| Self::missing(DriverOp::Set, id))?;
        vol.locator = locator.clone();
        vol.spec = spec.clone();
        Ok(())
    }

    async fn attach(&self, id: &VolumeId) -> Result<String, VolumeError> {
        self.record(DriverOp::Attach, id).await?;
        let mut vol = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| Self::missing(DriverOp::Attach, id))?;
        let device = vol
            .device_path
            .get_or_insert_with(|| Self::device_path(id))
            .clone();
        Ok(device)
    }

    async fn detach(&self, id: &VolumeId) -> Result<(), VolumeError> {
        self.record(DriverOp::Detach, id).await?;
        let mut vol = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| Self::missing(DriverOp::Detach, id))?;
        if let Some(path) = &vol.mount_path {
            return Err(VolumeError::driver(
                DriverOp::Detach,
                format!("volume {id} is still mounted at {path}"),
            ));
        }
        vol.device_path = None;
        Ok(())
    }

    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError> {
        self.record(DriverOp::Mount, id).await?;
        let mut vol = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| Self::missing(DriverOp::Mount, id))?;
        if vol.device_path.is_none() {
            return Err(VolumeError::driver(
                DriverOp::Mount,
                format!("volume {id} is not attached"),
            ));
        }
        match &vol.mount_path {
            Some(existing) if existing != mount_path => Err(VolumeError::driver(
                DriverOp::Mount,
                format!("volume {id} is already mounted at {existing}"),
            )),
            _ => {
                vol.mount_path = Some(mount_path.to_owned());
                Ok(())
            }
        }
    }

    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError> {
        self.record(DriverOp::Unmount, id).await?;
        let mut vol = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| Self::missing(DriverOp::Unmount, id))?;
        match vol.mount_path.as_deref() {
            Some(existing) if existing != mount_path => Err(VolumeError::driver(
                DriverOp::Unmount,
                format!("volume {id} is mounted at {existing}, not {mount_path}"),
            )),
            _ => {
                vol.mount_path = None;
                Ok(())
            }
        }
    }

    async fn delete(&self, id: &VolumeId) -> Result<(), VolumeError> {
        self.record(DriverOp::Delete, id).await?;
        let vol = self
            .volumes
            .get(id)
            .map(|v| v.clone())
            .ok_or_else(|| Self::missing(DriverOp::Delete, id))?;
        if vol.device_path.is_some() {
            return Err(VolumeError::driver(
                DriverOp::Delete,
                format!("volume {id} is still attached"),
            ));
        }
        self.volumes.remove(id);
        Ok(())
    }

    async fn snapshot(
        &self,
        source: &VolumeId,
        id: &VolumeId,
        readonly: bool,
    ) -> Result<(), VolumeError> {
        self.record(DriverOp::Snapshot, source).await?;
        let spec = self
            .volumes
            .get(source)
            .map(|v| v.spec.clone())
            .ok_or_else(|| Self::missing(DriverOp::Snapshot, source))?;
        self.volumes.insert(
            id.clone(),
            MemVolume {
                spec,
                ..Default::default()
            },
        );
        debug!(%source, %id, readonly, "snapshot cut in memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provisioned(driver: &MemoryDriver, id: &str) -> VolumeId {
        let id = VolumeId::from(id);
        driver
            .create(&id, &VolumeLocator::new("vol"), &VolumeSpec::with_size(1), None)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn attach_returns_stable_device_path() {
        let driver = MemoryDriver::new();
        let id = provisioned(&driver, "v-1").await;

        let first = driver.attach(&id).await.unwrap();
        let second = driver.attach(&id).await.unwrap();
        assert_eq!(first, "/dev/mem/v-1");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rejects_out_of_order_calls() {
        let driver = MemoryDriver::new();
        let id = provisioned(&driver, "v-1").await;

        assert!(driver.mount(&id, "/mnt/a").await.is_err());
        driver.attach(&id).await.unwrap();
        driver.mount(&id, "/mnt/a").await.unwrap();
        assert!(driver.detach(&id).await.is_err());
        assert!(driver.delete(&id).await.is_err());
        assert_eq!(driver.mount_path(&id).as_deref(), Some("/mnt/a"));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let driver = MemoryDriver::new();
        let id = provisioned(&driver, "v-1").await;

        driver.fail_on(DriverOp::Attach, "bus reset");
        let err = driver.attach(&id).await.unwrap_err();
        assert_eq!(err, VolumeError::driver(DriverOp::Attach, "bus reset"));

        driver.clear_failure(DriverOp::Attach);
        driver.attach(&id).await.unwrap();
        assert_eq!(
            driver.ops_for(&id),
            vec![DriverOp::Create, DriverOp::Attach, DriverOp::Attach]
        );
    }

    #[tokio::test]
    async fn set_replaces_locator_and_spec() {
        let driver = MemoryDriver::new();
        let id = provisioned(&driver, "v-1").await;

        driver
            .set(&id, &VolumeLocator::new("renamed"), &VolumeSpec::with_size(9))
            .await
            .unwrap();
        let (locator, spec) = driver.stored(&id).unwrap();
        assert_eq!(locator.name, "renamed");
        assert_eq!(spec.size, 9);
        assert_eq!(driver.ops_for(&id), vec![DriverOp::Create, DriverOp::Set]);

        let err = driver
            .set(&VolumeId::from("v-9"), &locator, &spec)
            .await
            .unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Set));
    }

    #[tokio::test]
    async fn delay_applies_to_one_op() {
        let driver = MemoryDriver::new();
        let id = provisioned(&driver, "v-1").await;
        driver.delay_on(DriverOp::Attach, Duration::from_millis(50));

        let started = std::time::Instant::now();
        driver.attach(&id).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(driver.ops_for(&id), vec![DriverOp::Create, DriverOp::Attach]);
    }

    #[tokio::test]
    async fn validate_spec_requires_size() {
        let driver = MemoryDriver::new();
        assert!(driver.validate_spec(&VolumeSpec::default()).await.is_err());
        assert!(driver.validate_spec(&VolumeSpec::with_size(1)).await.is_ok());
    }

    #[tokio::test]
    async fn snapshot_needs_existing_source() {
        let driver = MemoryDriver::new();
        let src = provisioned(&driver, "v-1").await;
        let snap = VolumeId::from("v-2");

        driver.snapshot(&src, &snap, true).await.unwrap();
        assert!(driver.contains(&snap));
        assert!(driver
            .snapshot(&VolumeId::from("v-9"), &VolumeId::from("v-3"), false)
            .await
            .is_err());
    }
}
