//! Application layer of the reference host.
//!
//! - **`guest_registry`** – Which guests are connected and what they have
//!   sent, plus the running totals reported as statistics.
//! - **`render`** – Turns a row of cells into text for the log.

pub mod guest_registry;
pub mod render;
