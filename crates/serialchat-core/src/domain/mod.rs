//! Domain value types shared by both peers.
//!
//! Everything here is an immutable value: once constructed, a
//! [`peer::PeerIdentity`] or [`message::Message`] never changes.

pub mod message;
pub mod peer;
