//! Lifecycle state machine.
//!
//! Holds the legal transition table for [`VolumeState`], the [`IdAllocator`]
//! that mints volume IDs, the [`VolumeTable`] registry with its per-volume
//! transition locks, and the [`NameClaims`] that keep locator names unique
//! while a create, snapshot or rename is in flight.
//!
//! ```text
//!            attach              mount
//!  Created ----------> Attached ---------> Mounted
//!          <----------          <---------
//!            detach              unmount
//!     |
//!     | delete (only from Created)
//!     v
//!  Deleted
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::action::{Step, Transition};
use crate::config::{IdScheme, UniquenessPolicy};
use crate::driver::VolumeDriver;
use crate::error::{DriverOp, VolumeError};
use crate::types::{Volume, VolumeId, VolumeLocator, VolumeState};

// ---------------------------------------------------------------------------
// Transition table
// ---------------------------------------------------------------------------

impl VolumeState {
    /// State reached by applying `step`, or a conflict if the step is not
    /// legal from this state.
    pub fn next(self, step: &Step) -> Result<VolumeState, VolumeError> {
        match (self, step) {
            (Self::Created, Step::Attach) => Ok(Self::Attached),
            (Self::Attached, Step::Detach) => Ok(Self::Created),
            (Self::Attached, Step::Mount(path)) if !path.is_empty() => Ok(Self::Mounted),
            (Self::Mounted, Step::Unmount) => Ok(Self::Attached),
            (state, step) => Err(VolumeError::conflict(format!(
                "illegal transition {step} from state {state}"
            ))),
        }
    }

    /// Only a volume without attach or mount artifacts may be deleted.
    pub fn can_delete(self) -> bool {
        self == Self::Created
    }
}

// ---------------------------------------------------------------------------
// ID allocation
// ---------------------------------------------------------------------------

/// Mints process-wide unique [`VolumeId`]s.
#[derive(Debug)]
pub struct IdAllocator {
    scheme: IdScheme,
    prefix: String,
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new(scheme: IdScheme, prefix: impl Into<String>) -> Self {
        Self {
            scheme,
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn mint(&self) -> VolumeId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        match self.scheme {
            IdScheme::Sequential => VolumeId(format!("{}{n}", self.prefix)),
            IdScheme::Uuid => VolumeId(format!("{}{}", self.prefix, uuid::Uuid::new_v4())),
        }
    }

    /// Number of IDs handed out so far.
    pub fn minted(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Slot {
    /// Insertion order, used to list volumes in creation order.
    seq: u64,
    volume: Volume,
}

/// Committed volumes plus one transition lock per volume.
///
/// Readers clone the committed aggregate and never wait on a transition;
/// writers hold the volume's lock for the whole transition and replace the
/// aggregate once per committed step.
#[derive(Debug, Default)]
pub struct VolumeTable {
    volumes: DashMap<VolumeId, Slot>,
    locks: DashMap<VolumeId, Arc<Mutex<()>>>,
    seq: AtomicU64,
}

impl VolumeTable {
    pub fn get(&self, id: &VolumeId) -> Option<Volume> {
        self.volumes.get(id).map(|r| r.volume.clone())
    }

    pub fn contains(&self, id: &VolumeId) -> bool {
        self.volumes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Commit `volume`, replacing any previous value for its ID.
    ///
    /// A replaced volume keeps its original position in [`Self::all`].
    pub fn commit(&self, volume: Volume) {
        match self.volumes.entry(volume.id.clone()) {
            Entry::Occupied(mut e) => e.get_mut().volume = volume,
            Entry::Vacant(e) => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                e.insert(Slot { seq, volume });
            }
        }
    }

    pub fn remove(&self, id: &VolumeId) -> Option<Volume> {
        self.locks.remove(id);
        self.volumes.remove(id).map(|(_, slot)| slot.volume)
    }

    /// Point-in-time copy of every committed volume, in creation order.
    pub fn all(&self) -> Vec<Volume> {
        let mut entries: Vec<(u64, Volume)> = self
            .volumes
            .iter()
            .map(|e| (e.seq, e.volume.clone()))
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, v)| v).collect()
    }

    /// ID of a committed volume other than `except` whose locator collides
    /// with `locator` under `policy`.
    pub fn find_collision(
        &self,
        policy: &UniquenessPolicy,
        locator: &VolumeLocator,
        except: Option<&VolumeId>,
    ) -> Option<VolumeId> {
        self.volumes
            .iter()
            .find(|e| Some(e.key()) != except && policy.collides(&e.volume.locator, locator))
            .map(|e| e.key().clone())
    }

    /// Acquire the transition lock for `id` and read the volume under it.
    ///
    /// Returns `None` if the volume does not exist once the lock is granted;
    /// it may have been deleted while this caller was waiting.
    pub async fn lock(&self, id: &VolumeId) -> Option<(OwnedMutexGuard<()>, Volume)> {
        let lock = Arc::clone(&self.locks.entry(id.clone()).or_default());
        let guard = Arc::clone(&lock).lock_owned().await;
        match self.get(id) {
            Some(volume) => Some((guard, volume)),
            None => {
                self.locks.remove_if(id, |_, l| Arc::ptr_eq(l, &lock));
                None
            }
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

// ---------------------------------------------------------------------------
// Name claims
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Claim {
    owner: Option<VolumeId>,
    locator: VolumeLocator,
}

/// Locator names claimed by in-flight creates, snapshots and renames.
///
/// Checking a name and claiming it happen under one short lock that is never
/// held across a driver call.  The returned [`NameClaim`] keeps the name
/// reserved until it is dropped, which the caller does after committing the
/// volume (or on failure).
#[derive(Debug, Default)]
pub struct NameClaims {
    next: AtomicU64,
    pending: StdMutex<HashMap<u64, Claim>>,
}

impl NameClaims {
    /// Claim `locator` for `owner` (`None` for a volume not minted yet).
    ///
    /// Fails with a conflict if a committed volume in `table` or another
    /// in-flight claim collides under `policy`.
    pub fn claim(
        &self,
        table: &VolumeTable,
        policy: &UniquenessPolicy,
        locator: &VolumeLocator,
        owner: Option<&VolumeId>,
    ) -> Result<NameClaim<'_>, VolumeError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = table.find_collision(policy, locator, owner) {
            return Err(VolumeError::conflict(format!(
                "volume name {} is already used by {existing}",
                locator.name
            )));
        }
        let in_flight = pending.values().any(|c| {
            (owner.is_none() || c.owner.as_ref() != owner) && policy.collides(&c.locator, locator)
        });
        if in_flight {
            return Err(VolumeError::conflict(format!(
                "volume name {} is being claimed by another request",
                locator.name
            )));
        }

        let token = self.next.fetch_add(1, Ordering::Relaxed);
        pending.insert(
            token,
            Claim {
                owner: owner.cloned(),
                locator: locator.clone(),
            },
        );
        Ok(NameClaim {
            claims: self,
            token,
        })
    }

    /// Number of claims currently held.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A held name reservation; released on drop.
#[derive(Debug)]
pub struct NameClaim<'a> {
    claims: &'a NameClaims,
    token: u64,
}

impl Drop for NameClaim<'_> {
    fn drop(&mut self) {
        self.claims
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Apply `transition` to `volume` through `driver`, committing after each
/// successful step.
///
/// The caller must hold the volume's transition lock.  On failure the table
/// keeps the last committed state and the error names the failing step.
pub async fn execute<D>(
    driver: &D,
    table: &VolumeTable,
    mut volume: Volume,
    transition: &Transition,
) -> Result<Volume, VolumeError>
where
    D: VolumeDriver + ?Sized,
{
    for step in &transition.steps {
        match apply_step(driver, &volume, step).await {
            Ok(next) => {
                volume = next;
                table.commit(volume.clone());
                info!(volume_id = %volume.id, %step, state = %volume.state, "transition step committed");
            }
            Err(e) => {
                warn!(volume_id = %volume.id, %step, state = %volume.state, error = %e, "transition step failed");
                return Err(e);
            }
        }
    }
    Ok(volume)
}

async fn apply_step<D>(driver: &D, current: &Volume, step: &Step) -> Result<Volume, VolumeError>
where
    D: VolumeDriver + ?Sized,
{
    let mut next = current.clone();
    next.state = current.state.next(step)?;

    match step {
        Step::Attach => {
            let device = driver.attach(&current.id).await?;
            if device.is_empty() {
                return Err(VolumeError::driver(
                    DriverOp::Attach,
                    "driver returned an empty device path",
                ));
            }
            next.device_path = device;
        }
        Step::Mount(path) => {
            driver.mount(&current.id, path).await?;
            next.mount_path = path.clone();
        }
        Step::Unmount => {
            driver.unmount(&current.id, &current.mount_path).await?;
            next.mount_path.clear();
        }
        Step::Detach => {
            driver.detach(&current.id).await?;
            next.device_path.clear();
        }
    }

    Ok(next)
}
