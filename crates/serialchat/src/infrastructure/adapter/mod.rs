//! Serial adapter implementations.
//!
//! - **`tcp`** – The production adapter: the serial link carried over TCP,
//!   with the service identifier checked in a handshake.
//! - **`handshake`** – The hello frame exchanged by the TCP adapter.
//! - **`mock`** – An in-memory radio for tests and local demos.

pub mod handshake;
pub mod mock;
pub mod tcp;
