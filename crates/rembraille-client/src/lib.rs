//! rembraille-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does the client do? (for beginners)
//!
//! The *client* runs inside the virtual machine, next to the screen reader.
//! The braille display itself is plugged into the machine hosting the VM, so
//! the client has to reach a small server on that host over TCP:
//!
//! 1. Works out where the host is (configured address, last session, default
//!    gateway, hypervisor tables, ARP table, subnet scan).
//! 2. Connects, negotiates the protocol version and learns the display size.
//! 3. Streams display rows (`Cells`) to the host.
//! 4. Receives key presses from the display and hands them to the screen
//!    reader as events.
//! 5. Pings the host and reconnects with backoff whenever the link breaks.

/// Application layer: dispatch of inbound messages and the session facade.
pub mod application;

/// Infrastructure layer: discovery, network and settings storage.
pub mod infrastructure;

pub use application::dispatch::{SessionEvent, StatusEvent};
pub use application::session::{BrailleSession, SessionError};
