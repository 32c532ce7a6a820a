//! Application layer of the guest client.
//!
//! - **`dispatch`** – Decides what every inbound message means to the guest
//!   and queues the resulting events for the driver.
//! - **`session`** – The facade a screen-reader binding talks to: connect,
//!   disconnect, send rows, register handlers, read the status.

pub mod dispatch;
pub mod session;
