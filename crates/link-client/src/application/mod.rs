//! Application layer of the link client.
//!
//! Everything here is network-agnostic: entities talk to their servers only
//! through the [`messenger::Messenger`] trait, so the whole layer can be
//! driven by test doubles.
//!
//! # Sub-modules
//!
//! - **`device`**   – One remote device: status, client status, connected
//!   time and user count, plus change listeners.
//!
//! - **`server`**   – One link server: contact timestamps, suspect flag, its
//!   device registry, and the request/response use cases (device list,
//!   client status, connect/disconnect, ping).
//!
//! - **`registry`** – The server registry and the per-server device registry,
//!   both safe to share between tasks and both emitting change events.
//!
//! - **`notify`**   – The subscribe/unsubscribe listener list used by all of
//!   the above.
//!
//! - **`messenger`** – The seam to the network: send a request, or send one
//!   and wait for the reply.
//!
//! - **`error`**    – [`error::LinkError`], the error taxonomy callers see.

pub mod device;
pub mod error;
pub mod messenger;
pub mod notify;
pub mod registry;
pub mod server;

pub use device::{Device, DeviceSnapshot};
pub use error::LinkError;
pub use messenger::{Messenger, TransportError};
pub use notify::{Listeners, SubscriptionId};
pub use registry::{DeviceRegistry, RegistryEvent, ServerRegistry};
pub use server::Server;
