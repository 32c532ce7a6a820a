//! rembraille-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! (including the client crate's end-to-end tests) and the binary entry
//! point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::guest_registry::{GuestId, GuestRecord, HostStats};
pub use infrastructure::network::{HostConfig, HostError, HostEvent, HostServer};
