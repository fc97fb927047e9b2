//! Protocol module containing message types and the text codec.

pub mod codec;
pub mod messages;

pub use codec::ProtocolError;
pub use messages::*;
