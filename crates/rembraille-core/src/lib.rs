//! # rembraille-core
//!
//! Shared library for RemBraille containing the wire protocol, domain types
//! and the display key gesture table.
//!
//! This crate is used by both the guest client and the reference host.
//! It has zero dependencies on OS APIs or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! RemBraille lets a screen reader running inside a virtual machine drive a
//! braille display plugged into the machine *hosting* that VM.  The guest
//! opens a TCP connection to a small server on the host and streams display
//! rows to it; the host streams key presses back.
//!
//! This crate (`rembraille-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Every message is a
//!   6-byte header plus a payload, decoded safely from partial reads.
//!
//! - **`domain`** – Plain values: endpoints and candidate lists, the
//!   connection state machine vocabulary, cell rows and key events.
//!
//! - **`keymap`** – The table turning display key ids into gesture names.

pub mod domain;
pub mod keymap;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `rembraille_core::CellBuffer` instead of the full module path.
pub use domain::cells::{CellBuffer, CellError, KeyEvent};
pub use domain::endpoint::{CandidateList, Endpoint};
pub use domain::state::{ConnectionState, FailureReason};
pub use keymap::Gesture;
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::frame::{Frame, FrameAssembler, FrameError};
pub use protocol::messages::BrailleMessage;
