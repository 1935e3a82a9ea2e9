//! Action resolver.
//!
//! Turns a [`VolumeStateAction`] and the volume's current state into an
//! ordered [`Transition`]: the list of driver steps needed to reach the
//! requested state.  Resolution has no side effects; every sequencing and
//! validation failure is detected here, before any driver call.
//!
//! Steps are always ordered unmount, detach, attach, mount.  A single request
//! never needs both a tear-down and a bring-up step on the same dimension, so
//! this ordering gives attach-before-mount on the way up and
//! unmount-before-detach on the way down.

use std::fmt;

use crate::error::VolumeError;
use crate::types::{Volume, VolumeActionParam, VolumeState, VolumeStateAction};

/// A single driver-facing step of a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Attach,
    Mount(String),
    Unmount,
    Detach,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attach => f.write_str("attach"),
            Self::Mount(path) => write!(f, "mount({path})"),
            Self::Unmount => f.write_str("unmount"),
            Self::Detach => f.write_str("detach"),
        }
    }
}

/// Ordered steps that take a volume from its current state to the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    pub steps: Vec<Step>,
}

impl Transition {
    /// `true` when the volume is already in the requested state.
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Resolve `action` against the current state of `volume`.
pub fn resolve(action: &VolumeStateAction, volume: &Volume) -> Result<Transition, VolumeError> {
    if volume.state == VolumeState::Deleted {
        return Err(VolumeError::conflict(format!(
            "volume {} has been deleted",
            volume.id
        )));
    }

    let attached = volume.state.is_attached();
    let mounted = volume.state.is_mounted();

    let will_be_attached = match action.attach {
        VolumeActionParam::Ignore => attached,
        VolumeActionParam::On => true,
        VolumeActionParam::Off => false,
    };

    if action.mount == VolumeActionParam::On {
        if action.attach == VolumeActionParam::Off {
            return Err(VolumeError::sequencing(
                "cannot mount and detach in the same request",
            ));
        }
        if !will_be_attached {
            return Err(VolumeError::sequencing(format!(
                "volume {} must be attached before it can be mounted",
                volume.id
            )));
        }
        if mounted {
            if !action.mount_path.is_empty() && action.mount_path != volume.mount_path {
                return Err(VolumeError::conflict(format!(
                    "volume {} is already mounted at {}",
                    volume.id, volume.mount_path
                )));
            }
        } else if action.mount_path.is_empty() {
            return Err(VolumeError::validation("mount_path is required to mount"));
        }
    }

    let will_unmount = mounted && action.mount == VolumeActionParam::Off;
    if action.attach == VolumeActionParam::Off && mounted && !will_unmount {
        return Err(VolumeError::conflict(format!(
            "volume {} is mounted at {}; unmount it before detaching",
            volume.id, volume.mount_path
        )));
    }

    let mut steps = Vec::new();
    if will_unmount {
        steps.push(Step::Unmount);
    }
    if action.attach == VolumeActionParam::Off && attached {
        steps.push(Step::Detach);
    }
    if action.attach == VolumeActionParam::On && !attached {
        steps.push(Step::Attach);
    }
    if action.mount == VolumeActionParam::On && !mounted {
        steps.push(Step::Mount(action.mount_path.clone()));
    }

    Ok(Transition { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{VolumeLocator, VolumeSpec};
    use VolumeActionParam::{Ignore, Off, On};

    fn volume(state: VolumeState) -> Volume {
        let mut vol = Volume::new(
            "v-1".into(),
            VolumeLocator::new("vol1"),
            VolumeSpec::with_size(1),
            None,
        );
        vol.state = state;
        if state.is_attached() {
            vol.device_path = "/dev/mem/v-1".into();
        }
        if state.is_mounted() {
            vol.mount_path = "/mnt/v1".into();
        }
        vol
    }

    fn action(attach: VolumeActionParam, mount: VolumeActionParam, path: &str) -> VolumeStateAction {
        VolumeStateAction {
            attach,
            mount,
            mount_path: path.into(),
            device_path: String::new(),
        }
    }

    fn steps(a: VolumeStateAction, state: VolumeState) -> Vec<Step> {
        resolve(&a, &volume(state)).expect("resolve").steps
    }

    #[test]
    fn ignore_everything_is_noop() {
        for state in [VolumeState::Created, VolumeState::Attached, VolumeState::Mounted] {
            assert!(resolve(&VolumeStateAction::default(), &volume(state))
                .unwrap()
                .is_noop());
        }
    }

    #[test]
    fn attach_is_idempotent() {
        assert_eq!(steps(action(On, Ignore, ""), VolumeState::Created), vec![Step::Attach]);
        assert!(steps(action(On, Ignore, ""), VolumeState::Attached).is_empty());
        assert!(steps(action(On, Ignore, ""), VolumeState::Mounted).is_empty());
    }

    #[test]
    fn detach_is_idempotent() {
        assert_eq!(steps(action(Off, Ignore, ""), VolumeState::Attached), vec![Step::Detach]);
        assert!(steps(action(Off, Ignore, ""), VolumeState::Created).is_empty());
    }

    #[test]
    fn bring_up_attaches_before_mounting() {
        assert_eq!(
            steps(action(On, On, "/mnt/v1"), VolumeState::Created),
            vec![Step::Attach, Step::Mount("/mnt/v1".into())]
        );
    }

    #[test]
    fn tear_down_unmounts_before_detaching() {
        assert_eq!(
            steps(action(Off, Off, ""), VolumeState::Mounted),
            vec![Step::Unmount, Step::Detach]
        );
    }

    #[test]
    fn mount_without_attach_is_sequencing_error() {
        let err = resolve(&action(Ignore, On, "/mnt/v1"), &volume(VolumeState::Created))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequencing);

        let err = resolve(&action(Off, On, "/mnt/v1"), &volume(VolumeState::Attached))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn mount_requires_a_path() {
        let err = resolve(&action(Ignore, On, ""), &volume(VolumeState::Attached)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn remount_same_path_is_noop_other_path_conflicts() {
        assert!(steps(action(Ignore, On, "/mnt/v1"), VolumeState::Mounted).is_empty());
        assert!(steps(action(Ignore, On, ""), VolumeState::Mounted).is_empty());

        let err = resolve(&action(Ignore, On, "/mnt/other"), &volume(VolumeState::Mounted))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn detach_while_mounted_conflicts() {
        let err = resolve(&action(Off, Ignore, ""), &volume(VolumeState::Mounted)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn unmount_when_not_mounted_is_noop() {
        assert!(steps(action(Ignore, Off, ""), VolumeState::Attached).is_empty());
        assert!(steps(action(Ignore, Off, ""), VolumeState::Created).is_empty());
    }

    #[test]
    fn deleted_volume_rejects_actions() {
        let err = resolve(&action(On, Ignore, ""), &volume(VolumeState::Deleted)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
