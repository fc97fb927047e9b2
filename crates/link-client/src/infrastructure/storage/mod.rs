//! Persistent settings.
//!
//! - **`config`** – TOML configuration file: multicast group, transport
//!   timeouts, liveness intervals, log level.

pub mod config;
