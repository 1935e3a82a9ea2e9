//! Volume error types.
//!
//! Every failure in `libvolume` is a [`VolumeError`].  The enum is tagged so
//! callers inside the process can dispatch on [`VolumeError::kind`], while the
//! wire envelope only ever sees the rendered string (see [`crate::codec`]).
//! Like the rest of the data model it is [`Serialize`]/[`Deserialize`] so it
//! can be persisted or forwarded by an embedding transport.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver operation that produced a [`VolumeError::Driver`] failure.
///
/// Carried in the error so a composite action can report which sub-step
/// failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriverOp {
    ValidateSpec,
    Create,
    Set,
    Attach,
    Detach,
    Mount,
    Unmount,
    Delete,
    Snapshot,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ValidateSpec => "validate_spec",
            Self::Create => "create",
            Self::Set => "set",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Delete => "delete",
            Self::Snapshot => "snapshot",
        })
    }
}

/// Coarse classification of a [`VolumeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Driver,
    Sequencing,
}

/// Unified error type for volume operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum VolumeError {
    /// Bad or missing locator, spec or request field.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// Unknown volume ID or name.
    #[error("volume {0} not found")]
    NotFound(String),

    /// Name collision, illegal transition or invariant violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage driver rejected or failed an operation.
    #[error("driver {op} failed: {reason}")]
    Driver {
        /// Operation the driver was executing.
        op: DriverOp,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Mount requested without a satisfied attach precondition.
    #[error("sequencing error: {0}")]
    Sequencing(String),
}

impl VolumeError {
    pub fn validation<E: fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn not_found<E: fmt::Display>(e: E) -> Self {
        Self::NotFound(e.to_string())
    }

    pub fn conflict<E: fmt::Display>(e: E) -> Self {
        Self::Conflict(e.to_string())
    }

    pub fn sequencing<E: fmt::Display>(e: E) -> Self {
        Self::Sequencing(e.to_string())
    }

    /// Create a [`VolumeError::Driver`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn driver<E: fmt::Display>(op: DriverOp, e: E) -> Self {
        Self::Driver {
            op,
            reason: e.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Driver { .. } => ErrorKind::Driver,
            Self::Sequencing(_) => ErrorKind::Sequencing,
        }
    }

    /// The driver step that failed, if this is a driver failure.
    pub fn failed_op(&self) -> Option<DriverOp> {
        match self {
            Self::Driver { op, .. } => Some(*op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = VolumeError::NotFound("v-7".into());
        assert_eq!(err.to_string(), "volume v-7 not found");

        let err = VolumeError::driver(DriverOp::Mount, "device busy");
        assert_eq!(err.to_string(), "driver mount failed: device busy");
    }

    #[test]
    fn kind_and_failed_op() {
        assert_eq!(
            VolumeError::sequencing("attach first").kind(),
            ErrorKind::Sequencing
        );
        assert_eq!(VolumeError::conflict("x").failed_op(), None);
        assert_eq!(
            VolumeError::driver(DriverOp::Detach, "x").failed_op(),
            Some(DriverOp::Detach)
        );
    }

    #[test]
    fn driver_error_serializes_op_in_snake_case() {
        let err = VolumeError::driver(DriverOp::ValidateSpec, "size is zero");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["Driver"]["op"], "validate_spec");
        let de: VolumeError = serde_json::from_value(json).expect("deserialize");
        assert_eq!(de, err);
    }
}
