//! Infrastructure layer for the SerialChat peer.
//!
//! Contains the OS-facing adapters: the TCP-emulated serial adapter, the
//! in-memory mock adapter used by tests and demos, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `serialchat_core`, but MUST NOT be imported by the `application` layer.

pub mod adapter;
pub mod storage;
