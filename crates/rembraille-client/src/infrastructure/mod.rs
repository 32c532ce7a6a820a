//! Infrastructure layer for the guest client.
//!
//! Contains the adapters that touch the outside world.
//!
//! **Dependency rule**: this layer may depend on `application` types it
//! publishes into (session events) and on `rembraille_core`, but the domain
//! crate never depends on it.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Builds the ordered list of candidate hosts from the
//!   last session, the default gateway, hypervisor tables, the ARP table and
//!   a subnet scan.
//!
//! - **`network`** – TCP link to the host: connection manager, receive and
//!   keepalive tasks, the serialized write path and reconnect backoff.
//!
//! - **`storage`** – TOML settings file in the platform config directory.

pub mod discovery;
pub mod network;
pub mod storage;
