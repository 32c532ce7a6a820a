//! Domain entities for RemBraille.
//!
//! Pure values with no sockets and no OS calls, shared by the guest client and
//! the reference host.

pub mod cells;
pub mod endpoint;
pub mod state;
