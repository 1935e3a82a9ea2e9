//! Directory-backed storage driver.
//!
//! [`LocalDriver`] stores each volume as a sub-directory under a configurable
//! `root`.  Attaching a volume hands out that directory as its device path;
//! mounting publishes it at the requested mount path as a symlink.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//!   <volume-id>/            # volume data
//!   <volume-id>.meta.json   # persisted volume metadata
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::driver::VolumeDriver;
use crate::error::{DriverOp, VolumeError};
use crate::types::{Source, VolumeId, VolumeLocator, VolumeSpec};

/// Only filesystem format this driver provisions.
const FORMAT_DIR: &str = "dir";

/// Metadata sidecar written next to every volume directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalMeta {
    id: VolumeId,
    name: String,
    spec: VolumeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<Source>,
    #[serde(default)]
    readonly: bool,
}

/// Driver that keeps volumes as plain directories on the local filesystem.
pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the data directory for a given volume.
    pub fn volume_root(&self, id: &VolumeId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Resolve the path to the persisted metadata sidecar for a volume.
    pub fn meta_path(&self, id: &VolumeId) -> PathBuf {
        self.root.join(format!("{id}.meta.json"))
    }

    async fn write_meta(&self, op: DriverOp, meta: &LocalMeta) -> Result<(), VolumeError> {
        let json = serde_json::to_string_pretty(meta).map_err(|e| VolumeError::driver(op, e))?;
        tokio::fs::write(self.meta_path(&meta.id), json)
            .await
            .map_err(|e| VolumeError::driver(op, format!("write meta {}: {e}", meta.id)))
    }

    async fn read_meta(&self, op: DriverOp, id: &VolumeId) -> Result<LocalMeta, VolumeError> {
        let path = self.meta_path(id);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| VolumeError::driver(op, format!("read meta {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| VolumeError::driver(op, format!("parse meta {}: {e}", path.display())))
    }

    /// Return the data directory of `id`, failing if it does not exist.
    async fn existing_root(&self, op: DriverOp, id: &VolumeId) -> Result<PathBuf, VolumeError> {
        let root = self.volume_root(id);
        match tokio::fs::metadata(&root).await {
            Ok(m) if m.is_dir() => Ok(root),
            Ok(_) => Err(VolumeError::driver(
                op,
                format!("{} is not a directory", root.display()),
            )),
            Err(e) => Err(VolumeError::driver(
                op,
                format!("volume {id} at {}: {e}", root.display()),
            )),
        }
    }

    async fn copy_volume(
        &self,
        op: DriverOp,
        from: &VolumeId,
        to: &VolumeId,
    ) -> Result<(), VolumeError> {
        let src = self.existing_root(op, from).await?;
        let dst = self.volume_root(to);
        tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| VolumeError::driver(op, e))?
            .map_err(|e| VolumeError::driver(op, format!("copy {from} to {to}: {e}")))
    }
}

/// Recursively copy the directory tree at `src` into `dst`.
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[async_trait]
impl VolumeDriver for LocalDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn validate_spec(&self, spec: &VolumeSpec) -> Result<(), VolumeError> {
        match spec.format.as_deref() {
            None | Some(FORMAT_DIR) => Ok(()),
            Some(other) => Err(VolumeError::Validation(format!(
                "unsupported format {other:?}, only {FORMAT_DIR:?} is available"
            ))),
        }
    }

    #[instrument(skip(self, locator, spec, source), fields(name = %locator.name))]
    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
        source: Option<&Source>,
    ) -> Result<(), VolumeError> {
        if source.is_some_and(|s| s.seed.is_some()) {
            return Err(VolumeError::driver(
                DriverOp::Create,
                "seeding from an external source is not supported",
            ));
        }

        let vol_root = self.volume_root(id);
        match source.and_then(|s| s.parent.as_ref()) {
            Some(parent) => self.copy_volume(DriverOp::Create, parent, id).await?,
            None => tokio::fs::create_dir_all(&vol_root).await.map_err(|e| {
                VolumeError::driver(
                    DriverOp::Create,
                    format!("create dir {}: {e}", vol_root.display()),
                )
            })?,
        }

        self.write_meta(
            DriverOp::Create,
            &LocalMeta {
                id: id.clone(),
                name: locator.name.clone(),
                spec: spec.clone(),
                source: source.cloned(),
                readonly: false,
            },
        )
        .await?;

        info!(path = %vol_root.display(), "volume directory created");
        Ok(())
    }

    #[instrument(skip(self, locator, spec), fields(name = %locator.name))]
    async fn set(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
    ) -> Result<(), VolumeError> {
        let mut meta = self.read_meta(DriverOp::Set, id).await?;
        meta.name = locator.name.clone();
        meta.spec = spec.clone();
        self.write_meta(DriverOp::Set, &meta).await?;
        debug!(size = spec.size, "volume metadata rewritten");
        Ok(())
    }

    async fn attach(&self, id: &VolumeId) -> Result<String, VolumeError> {
        let root = self.existing_root(DriverOp::Attach, id).await?;
        Ok(root.to_string_lossy().into_owned())
    }

    async fn detach(&self, id: &VolumeId) -> Result<(), VolumeError> {
        self.existing_root(DriverOp::Detach, id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError> {
        let target = self.existing_root(DriverOp::Mount, id).await?;
        let link = Path::new(mount_path);

        // Idempotent: a link that already points at this volume is a prior
        // successful mount.
        match tokio::fs::read_link(link).await {
            Ok(existing) if existing == target => {
                debug!(mount_path, "already mounted, assuming idempotent retry");
                return Ok(());
            }
            Ok(existing) => {
                return Err(VolumeError::driver(
                    DriverOp::Mount,
                    format!("{mount_path} already points at {}", existing.display()),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VolumeError::driver(
                    DriverOp::Mount,
                    format!("{mount_path}: {e}"),
                ));
            }
        }

        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VolumeError::driver(DriverOp::Mount, format!("create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::symlink(&target, link)
            .await
            .map_err(|e| VolumeError::driver(DriverOp::Mount, format!("{mount_path}: {e}")))?;

        info!(mount_path, "volume mounted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), VolumeError> {
        let link = Path::new(mount_path);
        let meta = match tokio::fs::symlink_metadata(link).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(mount_path, "mount path gone, nothing to unmount");
                return Ok(());
            }
            Err(e) => {
                return Err(VolumeError::driver(
                    DriverOp::Unmount,
                    format!("{mount_path}: {e}"),
                ));
            }
        };
        if !meta.file_type().is_symlink() {
            return Err(VolumeError::driver(
                DriverOp::Unmount,
                format!("{mount_path} is not a volume mount"),
            ));
        }

        tokio::fs::remove_file(link)
            .await
            .map_err(|e| VolumeError::driver(DriverOp::Unmount, format!("{mount_path}: {e}")))?;
        info!(mount_path, "volume unmounted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &VolumeId) -> Result<(), VolumeError> {
        let vol_root = self.volume_root(id);
        if vol_root.exists() {
            tokio::fs::remove_dir_all(&vol_root).await.map_err(|e| {
                VolumeError::driver(
                    DriverOp::Delete,
                    format!("remove dir {}: {e}", vol_root.display()),
                )
            })?;
        }

        let meta_path = self.meta_path(id);
        if meta_path.exists() {
            tokio::fs::remove_file(&meta_path).await.map_err(|e| {
                VolumeError::driver(
                    DriverOp::Delete,
                    format!("remove meta {}: {e}", meta_path.display()),
                )
            })?;
        }

        info!("volume directory removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn snapshot(
        &self,
        source: &VolumeId,
        id: &VolumeId,
        readonly: bool,
    ) -> Result<(), VolumeError> {
        let parent = self.read_meta(DriverOp::Snapshot, source).await?;
        self.copy_volume(DriverOp::Snapshot, source, id).await?;
        self.write_meta(
            DriverOp::Snapshot,
            &LocalMeta {
                id: id.clone(),
                name: String::new(),
                spec: parent.spec,
                source: Some(Source {
                    parent: Some(source.clone()),
                    seed: None,
                }),
                readonly,
            },
        )
        .await?;

        info!("snapshot copied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn provisioned(driver: &LocalDriver, id: &str) -> VolumeId {
        let id = VolumeId::from(id);
        driver
            .create(&id, &VolumeLocator::new("data"), &VolumeSpec::with_size(1), None)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn create_and_delete_volume() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let id = provisioned(&driver, "v-1").await;

        assert!(driver.volume_root(&id).is_dir());
        // The metadata sidecar file must be written to disk.
        assert!(driver.meta_path(&id).exists());
        let meta = driver.read_meta(DriverOp::Create, &id).await.unwrap();
        assert_eq!(meta.name, "data");

        driver.delete(&id).await.unwrap();
        assert!(!driver.volume_root(&id).exists());
        assert!(!driver.meta_path(&id).exists());

        // Deleting twice is harmless.
        driver.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn set_rewrites_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let id = provisioned(&driver, "v-1").await;

        driver
            .set(&id, &VolumeLocator::new("renamed"), &VolumeSpec::with_size(999))
            .await
            .unwrap();
        let meta = driver.read_meta(DriverOp::Set, &id).await.unwrap();
        assert_eq!(meta.name, "renamed");
        assert_eq!(meta.spec.size, 999);

        let err = driver
            .set(&VolumeId::from("v-9"), &VolumeLocator::new("x"), &VolumeSpec::with_size(1))
            .await
            .unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Set));
    }

    #[tokio::test]
    async fn attach_mount_unmount() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path().join("volumes"));
        let id = provisioned(&driver, "v-1").await;

        let device = driver.attach(&id).await.unwrap();
        assert_eq!(Path::new(&device), driver.volume_root(&id));

        let mount = tmp.path().join("mnt").join("v1");
        let mount = mount.to_str().unwrap();
        driver.mount(&id, mount).await.unwrap();
        assert_eq!(std::fs::read_link(mount).unwrap(), driver.volume_root(&id));

        // Mounting again at the same path is a no-op.
        driver.mount(&id, mount).await.unwrap();

        driver.unmount(&id, mount).await.unwrap();
        assert!(std::fs::symlink_metadata(mount).is_err());
        driver.unmount(&id, mount).await.unwrap();
        driver.detach(&id).await.unwrap();
    }

    #[tokio::test]
    async fn mount_refuses_foreign_link() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path().join("volumes"));
        let a = provisioned(&driver, "v-1").await;
        let b = provisioned(&driver, "v-2").await;

        let mount = tmp.path().join("shared");
        let mount = mount.to_str().unwrap();
        driver.mount(&a, mount).await.unwrap();
        let err = driver.mount(&b, mount).await.unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Mount));
    }

    #[tokio::test]
    async fn unmount_refuses_plain_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path().join("volumes"));
        let id = provisioned(&driver, "v-1").await;

        let err = driver
            .unmount(&id, tmp.path().to_str().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Unmount));
    }

    #[tokio::test]
    async fn attach_unknown_volume_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let err = driver.attach(&VolumeId::from("v-9")).await.unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Attach));
    }

    #[tokio::test]
    async fn snapshot_copies_data() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let src = provisioned(&driver, "v-1").await;
        std::fs::create_dir(driver.volume_root(&src).join("nested")).unwrap();
        std::fs::write(driver.volume_root(&src).join("nested/file"), b"payload").unwrap();

        let snap = VolumeId::from("v-2");
        driver.snapshot(&src, &snap, true).await.unwrap();

        let copied = std::fs::read(driver.volume_root(&snap).join("nested/file")).unwrap();
        assert_eq!(copied, b"payload");
        let meta = driver.read_meta(DriverOp::Snapshot, &snap).await.unwrap();
        assert!(meta.readonly);
        assert_eq!(meta.source.and_then(|s| s.parent), Some(src));
    }

    #[tokio::test]
    async fn validate_spec_checks_format() {
        let driver = LocalDriver::new("/nonexistent");
        let mut spec = VolumeSpec::with_size(1);
        assert!(driver.validate_spec(&spec).await.is_ok());
        spec.format = Some("dir".into());
        assert!(driver.validate_spec(&spec).await.is_ok());
        spec.format = Some("ext4".into());
        assert!(driver.validate_spec(&spec).await.is_err());
    }

    #[tokio::test]
    async fn seeded_create_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = LocalDriver::new(tmp.path());
        let source = Source {
            parent: None,
            seed: Some("http://example.invalid/image".into()),
        };
        let err = driver
            .create(
                &VolumeId::from("v-1"),
                &VolumeLocator::new("data"),
                &VolumeSpec::with_size(1),
                Some(&source),
            )
            .await
            .unwrap_err();
        assert_eq!(err.failed_op(), Some(DriverOp::Create));
    }
}
