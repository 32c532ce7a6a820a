//! Infrastructure layer of the reference host.
//!
//! - **`network`** – TCP listener and the per-guest protocol sessions.

pub mod network;
