//! Volume manager.
//!
//! [`VolumeManager`] owns the volume registry and the ID allocator and drives
//! every request through validation, the action resolver and the lifecycle
//! state machine before delegating side effects to its [`VolumeDriver`].
//!
//! # Locking
//!
//! Mutations of one volume hold that volume's transition lock for their whole
//! duration; different volumes proceed in parallel.  Names are reserved with
//! a [`NameClaim`] before the driver is called: checking and claiming take a
//! short lock, the claim itself is held across the driver call until the
//! volume is committed.  Reads take no lock.

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use crate::action::{Transition, resolve};
use crate::config::{UniquenessPolicy, VolumeConfig};
use crate::driver::VolumeDriver;
use crate::error::VolumeError;
use crate::message::{SnapCreateRequest, VolumeCreateRequest, VolumeSetRequest};
use crate::query::VolumeQuery;
use crate::state::{IdAllocator, NameClaim, NameClaims, VolumeTable, execute};
use crate::types::{Source, Volume, VolumeId, VolumeLocator};

/// Volume lifecycle controller backed by a storage driver.
pub struct VolumeManager<D> {
    driver: D,
    config: VolumeConfig,
    ids: IdAllocator,
    table: VolumeTable,
    claims: NameClaims,
}

impl<D: VolumeDriver> VolumeManager<D> {
    pub fn new(driver: D, config: VolumeConfig) -> Self {
        let ids = IdAllocator::new(config.id_scheme, config.id_prefix.clone());
        info!(driver = driver.name(), ?config, "volume manager initialised");
        Self {
            driver,
            config,
            ids,
            table: VolumeTable::default(),
            claims: NameClaims::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Number of volume IDs minted so far, including those whose driver
    /// create later failed.
    pub fn minted(&self) -> u64 {
        self.ids.minted()
    }

    /// The driver's uniqueness policy if it has one, else the configured one.
    pub fn uniqueness(&self) -> UniquenessPolicy {
        self.driver
            .uniqueness()
            .unwrap_or_else(|| self.config.uniqueness.clone())
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Validate and provision a new volume, returning its freshly minted ID.
    #[instrument(skip(self, req), fields(name = %req.locator.name))]
    pub async fn create(&self, req: VolumeCreateRequest) -> Result<VolumeId, VolumeError> {
        let VolumeCreateRequest {
            locator,
            source,
            spec,
        } = req;

        validate_name(&locator)?;
        let spec = spec.ok_or_else(|| VolumeError::validation("volume spec is required"))?;
        self.driver.validate_spec(&spec).await?;

        if let Some(parent) = source.as_ref().and_then(|s| s.parent.as_ref())
            && !self.table.contains(parent)
        {
            return Err(VolumeError::NotFound(parent.to_string()));
        }

        let _claim = self.claim_name(&locator, None)?;

        let id = self.ids.mint();
        if let Err(e) = self
            .driver
            .create(&id, &locator, &spec, source.as_ref())
            .await
        {
            warn!(%id, error = %e, "driver create failed");
            return Err(e);
        }

        self.table.commit(Volume::new(id.clone(), locator, spec, source));
        info!(%id, "volume created");
        Ok(id)
    }

    /// Apply a set request: locator and spec updates first, then the action.
    ///
    /// Everything is validated before the first change is committed.  Locator
    /// and spec changes reach the driver through [`VolumeDriver::set`] before
    /// they are committed.  If a driver step of the action fails, earlier
    /// steps stay committed and the error names the failing step.
    #[instrument(skip(self, req), fields(volume_id = %id))]
    pub async fn set(&self, id: &VolumeId, req: VolumeSetRequest) -> Result<Volume, VolumeError> {
        let VolumeSetRequest {
            locator,
            spec,
            action,
        } = req;

        let (_guard, mut volume) = self.lock_volume(id).await?;

        if let Some(locator) = &locator {
            validate_name(locator)?;
        }
        if let Some(spec) = &spec {
            self.driver.validate_spec(spec).await?;
        }
        let transition = match &action {
            Some(action) => resolve(action, &volume)?,
            None => Transition::default(),
        };

        if locator.is_some() || spec.is_some() {
            let _claim = match &locator {
                Some(locator) => Some(self.claim_name(locator, Some(id))?),
                None => None,
            };
            let locator = locator.unwrap_or_else(|| volume.locator.clone());
            let spec = spec.unwrap_or_else(|| volume.spec.clone());
            if let Err(e) = self.driver.set(id, &locator, &spec).await {
                warn!(error = %e, "driver set failed");
                return Err(e);
            }
            volume.locator = locator;
            volume.spec = spec;
            self.table.commit(volume.clone());
            debug!(name = %volume.locator.name, "locator and spec updated");
        }

        if transition.is_noop() {
            debug!(state = %volume.state, "volume already in requested state");
            return Ok(volume);
        }
        execute(&self.driver, &self.table, volume, &transition).await
    }

    /// Snapshot an existing volume into a new volume.
    #[instrument(skip(self, req), fields(source = %req.id, name = %req.locator.name))]
    pub async fn snapshot(&self, req: SnapCreateRequest) -> Result<VolumeId, VolumeError> {
        let SnapCreateRequest {
            id: source_id,
            locator,
            readonly,
        } = req;

        if source_id.is_empty() {
            return Err(VolumeError::validation("snapshot source volume id is required"));
        }
        validate_name(&locator)?;

        let (_guard, source) = self.lock_volume(&source_id).await?;
        let _claim = self.claim_name(&locator, None)?;

        let id = self.ids.mint();
        if let Err(e) = self.driver.snapshot(&source_id, &id, readonly).await {
            warn!(%id, error = %e, "driver snapshot failed");
            return Err(e);
        }

        let mut snap = Volume::new(
            id.clone(),
            locator,
            source.spec,
            Some(Source {
                parent: Some(source_id),
                seed: None,
            }),
        );
        snap.readonly = readonly;
        self.table.commit(snap);
        info!(%id, readonly, "snapshot created");
        Ok(id)
    }

    /// Delete a volume.  Only volumes in state `Created` may be deleted.
    #[instrument(skip(self), fields(volume_id = %id))]
    pub async fn delete(&self, id: &VolumeId) -> Result<(), VolumeError> {
        let (_guard, volume) = self.lock_volume(id).await?;
        if !volume.state.can_delete() {
            return Err(VolumeError::Conflict(format!(
                "volume {id} is {}; unmount and detach it before deleting",
                volume.state
            )));
        }

        if let Err(e) = self.driver.delete(id).await {
            warn!(error = %e, "driver delete failed");
            return Err(e);
        }
        self.table.remove(id);
        info!("volume deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &VolumeId) -> Result<Volume, VolumeError> {
        self.table
            .get(id)
            .ok_or_else(|| VolumeError::NotFound(id.to_string()))
    }

    /// Volumes for the given IDs, in request order.  Unknown IDs are skipped.
    pub fn inspect(&self, ids: &[VolumeId]) -> Vec<Volume> {
        ids.iter().filter_map(|id| self.table.get(id)).collect()
    }

    /// Every volume matching `query`, in creation order.
    pub fn enumerate(&self, query: &VolumeQuery) -> Vec<Volume> {
        self.table
            .all()
            .into_iter()
            .filter(|v| query.matches(v))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Take the transition lock of an existing volume and read its committed
    /// state under the lock.
    async fn lock_volume(
        &self,
        id: &VolumeId,
    ) -> Result<(OwnedMutexGuard<()>, Volume), VolumeError> {
        if !self.table.contains(id) {
            return Err(VolumeError::NotFound(id.to_string()));
        }
        self.table
            .lock(id)
            .await
            .ok_or_else(|| VolumeError::NotFound(id.to_string()))
    }

    /// Reserve `locator`'s name under the active uniqueness policy until the
    /// returned claim is dropped.
    fn claim_name(
        &self,
        locator: &VolumeLocator,
        owner: Option<&VolumeId>,
    ) -> Result<NameClaim<'_>, VolumeError> {
        self.claims
            .claim(&self.table, &self.uniqueness(), locator, owner)
    }
}

fn validate_name(locator: &VolumeLocator) -> Result<(), VolumeError> {
    if locator.name.trim().is_empty() {
        return Err(VolumeError::validation("locator name must not be empty"));
    }
    Ok(())
}
