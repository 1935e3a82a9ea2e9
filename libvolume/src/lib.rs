//! # libvolume: volume lifecycle control plane
//!
//! `libvolume` tracks storage volumes through their lifecycle
//! (created, attached, mounted, deleted) and drives a pluggable storage
//! driver to carry out each transition.  Callers express desired state with
//! tri-state attach/mount actions; the library works out the ordered driver
//! steps, rejects contradictory or out-of-order requests, and reports every
//! outcome in a uniform response envelope.  It follows the RK8s conventions
//! (Tokio async runtime, `tracing` for observability, `thiserror` for
//! structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Volume`, `VolumeLocator`, `VolumeSpec`, actions. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`message`] | Request and response bodies of the volume protocol. |
//! | [`action`] | Resolves a tri-state action into ordered driver steps. |
//! | [`state`] | Lifecycle state machine, ID allocation and the volume table. |
//! | [`driver`] | [`VolumeDriver`] trait: the storage side effects. |
//! | [`manager`] | [`VolumeManager`]: create, set, snapshot, delete, lookup. |
//! | [`query`] | Volume lookup by name, ID and labels. |
//! | [`codec`] | Maps results onto response envelopes; JSON encode/decode. |
//! | [`config`] | ID scheme and name uniqueness configuration. |
//! | [`backend`] | Storage drivers (in-memory, local directories). |

pub mod action;
pub mod backend;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod manager;
pub mod message;
pub mod query;
pub mod state;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use config::{IdScheme, UniquenessPolicy, VolumeConfig};
pub use driver::VolumeDriver;
pub use error::{DriverOp, ErrorKind, VolumeError};
pub use manager::VolumeManager;
pub use message::*;
pub use query::{OptionKey, VolumeQuery};
pub use types::*;
