//! Infrastructure layer of the link client.
//!
//! Contains the OS-facing adapters: UDP sockets and multicast membership,
//! timers, the TOML configuration file, and the bridge a GUI drives.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `link_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod shutdown;
pub mod storage;
pub mod ui_bridge;
