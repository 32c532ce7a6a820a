//! Storage infrastructure: the client's settings file.
//!
//! The `config` sub-module reads the TOML settings from the platform config
//! directory, writes them back (the last connected host is remembered there)
//! and supplies defaults on first run.

pub mod config;

pub use config::{ClientConfig, ConfigError, ConfigStore};
