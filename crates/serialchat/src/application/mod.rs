//! Application layer of the SerialChat peer.
//!
//! Everything here works against the platform seams in [`transport`] and
//! [`permissions`]; no module opens a real socket or reads a file.
//!
//! # Sub-modules
//!
//! - **`orchestrator`** – The [`orchestrator::ChatController`]: listen and
//!   dial attempts, the socket slots, link-state handling, and sending.
//!
//! - **`transfer_channel`** – Reads and writes frames over one connected
//!   socket.
//!
//! - **`device_registry`** – The deduplicated discovered set and the paired
//!   set, published as watch cells.
//!
//! - **`transport`** – Traits for the serial adapter and its sockets.
//!
//! - **`permissions`** – Capability snapshots passed into guarded operations.

pub mod device_registry;
pub mod orchestrator;
pub mod permissions;
pub mod transfer_channel;
pub mod transport;
