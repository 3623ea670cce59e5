//! SIP signaling: minimal message parsing, Digest auth, STUN discovery,
//! and the Bridge Listener (C7).

pub mod auth;
pub mod listener;
pub mod message;
pub mod stun;

pub use listener::{BridgeListener, IncomingInvite, ListenerEvents};
pub use message::SipMessage;
