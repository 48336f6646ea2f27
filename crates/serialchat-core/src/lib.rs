//! # serialchat-core
//!
//! Shared library for SerialChat containing the domain value types, the
//! message codec, and the service constants both peers agree on.
//!
//! This crate has zero dependencies on OS APIs, sockets, or async runtimes.
//!
//! # Architecture overview
//!
//! SerialChat pairs two peers over a point-to-point serial-style socket link
//! (an RFCOMM-like channel) and exchanges short text messages between them.
//! One peer listens under a fixed service identifier, the other dials it.
//!
//! - **`domain`** – Immutable value types: who a peer is ([`PeerIdentity`]),
//!   what a chat message is ([`Message`]), and what a connection attempt
//!   reports to its caller ([`ConnectionResult`]).
//!
//! - **`protocol`** – How a message travels as bytes.  A frame is the sender
//!   name and the text joined by a single reserved delimiter, UTF-8 encoded.
//!   There is no length prefix: one socket read is one frame.

pub mod domain;
pub mod protocol;

pub use domain::message::{ConnectionResult, Message};
pub use domain::peer::{LinkStateEvent, PeerIdentity};
pub use protocol::codec::{decode_message, encode_message, DELIMITER};
pub use protocol::service::{READ_BUFFER_SIZE, SERVICE_NAME, SERVICE_UUID, UNKNOWN_NAME};
