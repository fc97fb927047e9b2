//! Network infrastructure for the link client.
//!
//! # Sub-modules
//!
//! - **`transport`** – One-remote UDP channel with timeout, exponential
//!   backoff and retry; plus [`transport::UdpMessenger`], the production
//!   [`Messenger`](crate::application::Messenger).
//!
//! - **`discovery`** – Joins the multicast group, receives server
//!   broadcasts and keeps the server registry in step with them.
//!
//! - **`liveness`**  – Periodic sweep that forgets silent servers and pings
//!   the ones this client has not talked to for a while.

pub mod discovery;
pub mod liveness;
pub mod transport;
