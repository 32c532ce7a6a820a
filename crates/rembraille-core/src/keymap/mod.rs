//! Key tables for braille display input.
//!
//! Hosts report display keys as `u16` ids on the wire; [`gesture`] turns them
//! into the gesture names a screen reader binds commands to.

pub mod gesture;

pub use gesture::Gesture;
