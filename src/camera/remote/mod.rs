//! Emulated camera backed by a remote emulation service.
//!
//! The device drives the service through `RemoteServiceClient` and runs a
//! frame worker thread while started. `mock` provides a scriptable service
//! and recording consumer for tests.

pub mod api;
pub mod device;
pub mod mock;
pub mod worker;
