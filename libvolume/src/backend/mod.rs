//! Storage driver implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`VolumeDriver`](crate::driver::VolumeDriver).

#[cfg(unix)]
pub mod local;
pub mod memory;
