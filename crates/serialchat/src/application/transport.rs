//! Platform seams: the serial adapter and its socket handles.
//!
//! All socket calls are **blocking** and take `&self`.  The controller runs
//! them on a blocking worker while the control path may call `close()` on
//! the same handle at any time; an implementation must make `close()`
//! unblock a pending `accept`/`read` with an error or end-of-stream.
//!
//! The production implementation is
//! [`crate::infrastructure::adapter::tcp::TcpAdapter`]; tests use
//! [`crate::infrastructure::adapter::mock::MockAdapter`] or the `mockall`
//! generated `MockSerialAdapter`.

use std::io;
use std::sync::Arc;

use serialchat_core::{LinkStateEvent, PeerIdentity};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A connected (or connectable) byte-stream socket to one peer.
pub trait StreamSocket: Send + Sync {
    /// Performs the connect handshake for an outbound socket.
    ///
    /// Sockets returned by [`ServerSocket::accept`] are already connected.
    fn connect(&self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    /// Reads whatever the peer has sent, up to `buf.len()` bytes.
    ///
    /// `Ok(0)` means the stream has ended.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Closes the socket.  Idempotent.
    fn close(&self);
}

/// A listening socket published under a service identifier.
pub trait ServerSocket: Send + Sync {
    /// Blocks until a peer connects.
    ///
    /// Fails once the socket has been closed.
    fn accept(&self) -> io::Result<Arc<dyn StreamSocket>>;

    /// Closes the listener.  Idempotent.
    fn close(&self);
}

/// The local serial adapter (radio) and the push sources it exposes.
#[cfg_attr(test, mockall::automock)]
pub trait SerialAdapter: Send + Sync {
    /// The adapter's own display name, if the platform reports one.
    fn name(&self) -> Option<String>;

    /// Devices the platform has bonded with (the paired set).
    fn bonded_devices(&self) -> Vec<PeerIdentity>;

    /// Starts a device inquiry.  Results arrive on the found-device source.
    fn start_discovery(&self) -> bool;

    fn cancel_discovery(&self) -> bool;

    /// Opens a listening socket with a service record.
    fn listen(&self, service_name: &str, service_uuid: Uuid) -> io::Result<Arc<dyn ServerSocket>>;

    /// Creates an unconnected socket targeting `address` and `service_uuid`.
    fn create_socket(&self, address: &str, service_uuid: Uuid) -> io::Result<Arc<dyn StreamSocket>>;

    /// Subscribes to devices found during discovery.
    fn subscribe_found_devices(&self) -> mpsc::UnboundedReceiver<PeerIdentity>;

    /// Subscribes to link up/down notifications.
    fn subscribe_link_state(&self) -> mpsc::UnboundedReceiver<LinkStateEvent>;
}
