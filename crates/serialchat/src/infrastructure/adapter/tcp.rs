//! TCP-emulated serial adapter.
//!
//! Runs the serial link over plain TCP so two peers can chat on a LAN or on
//! loopback.  Addresses are `host:port` strings.  The service identifier is
//! carried in a small handshake (see [`super::handshake`]) so that a listener
//! only accepts dialers asking for the same service.
//!
//! # Blocking model
//!
//! Every socket call blocks, like the platform sockets this stands in for.
//! `accept` polls a non-blocking listener so that `close()` from another
//! thread ends it within one poll interval.  Closing a stream shuts the TCP
//! connection down, which makes a pending `read` return.
//!
//! # Discovery
//!
//! There is no radio inquiry on TCP.  Discovery probes every bonded peer
//! with a short connect timeout on a background thread and reports the ones
//! that answer.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serialchat_core::{LinkStateEvent, PeerIdentity};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::handshake::{HandshakeError, Hello};
use crate::application::transport::{SerialAdapter, ServerSocket, StreamSocket};
use crate::infrastructure::storage::config::AppConfig;

/// Sleep between polls of a non-blocking listener.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Settings for a [`TcpAdapter`].
#[derive(Debug, Clone)]
pub struct TcpAdapterConfig {
    /// Name reported by [`SerialAdapter::name`].
    pub name: Option<String>,
    /// Address the listener binds.
    pub listen_address: String,
    /// Address this peer announces in its hello.  Defaults to the listen
    /// address.
    pub advertised_address: String,
    pub bonded: Vec<PeerIdentity>,
    /// Zero is raised to one millisecond by [`TcpAdapter::new`].
    pub handshake_timeout: Duration,
    pub probe_timeout: Duration,
}

impl TcpAdapterConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let listen_address = config.transport.listen_address();
        Self {
            name: config.node.display_name.clone(),
            advertised_address: listen_address.clone(),
            listen_address,
            bonded: config.bonded_peers(),
            handshake_timeout: config.transport.handshake_timeout(),
            probe_timeout: config.transport.probe_timeout(),
        }
    }
}

/// State shared by the adapter and every socket it creates.
struct AdapterCore {
    config: TcpAdapterConfig,
    found: Mutex<Vec<mpsc::UnboundedSender<PeerIdentity>>>,
    link: Mutex<Vec<mpsc::UnboundedSender<LinkStateEvent>>>,
    discovering: AtomicBool,
}

impl AdapterCore {
    fn hello(&self, service_uuid: Uuid) -> Hello {
        Hello {
            service_uuid,
            name: self.config.name.clone().unwrap_or_default(),
            address: self.config.advertised_address.clone(),
        }
    }

    /// Names a remote peer, preferring the bonded entry for its address.
    fn identify(&self, name: &str, address: &str) -> PeerIdentity {
        self.config
            .bonded
            .iter()
            .find(|p| p.address() == address)
            .cloned()
            .unwrap_or_else(|| PeerIdentity::new(name, address))
    }

    fn emit_link_state(&self, event: LinkStateEvent) {
        lock(&self.link).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_found(&self, identity: PeerIdentity) {
        lock(&self.found).retain(|tx| tx.send(identity.clone()).is_ok());
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// A [`SerialAdapter`] over TCP.
pub struct TcpAdapter {
    core: Arc<AdapterCore>,
}

impl TcpAdapter {
    pub fn new(mut config: TcpAdapterConfig) -> Self {
        // std sockets reject a zero timeout with InvalidInput.
        config.handshake_timeout = config.handshake_timeout.max(MIN_SOCKET_TIMEOUT);
        config.probe_timeout = config.probe_timeout.max(MIN_SOCKET_TIMEOUT);
        Self {
            core: Arc::new(AdapterCore {
                config,
                found: Mutex::new(Vec::new()),
                link: Mutex::new(Vec::new()),
                discovering: AtomicBool::new(false),
            }),
        }
    }
}

impl SerialAdapter for TcpAdapter {
    fn name(&self) -> Option<String> {
        self.core.config.name.clone()
    }

    fn bonded_devices(&self) -> Vec<PeerIdentity> {
        self.core.config.bonded.clone()
    }

    fn start_discovery(&self) -> bool {
        if self.core.discovering.swap(true, Ordering::SeqCst) {
            debug!("discovery already running");
            return true;
        }
        let core = Arc::clone(&self.core);
        let spawned = std::thread::Builder::new()
            .name("serialchat-discovery".to_string())
            .spawn(move || probe_loop(&core));
        match spawned {
            Ok(_) => true,
            Err(e) => {
                warn!("failed to spawn discovery thread: {e}");
                self.core.discovering.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn cancel_discovery(&self) -> bool {
        self.core.discovering.swap(false, Ordering::SeqCst)
    }

    fn listen(&self, service_name: &str, service_uuid: Uuid) -> io::Result<Arc<dyn ServerSocket>> {
        let listener = TcpListener::bind(&self.core.config.listen_address)?;
        listener.set_nonblocking(true)?;
        info!(
            "{service_name} listening on {}",
            listener.local_addr()?
        );
        Ok(Arc::new(TcpServerSocket {
            core: Arc::clone(&self.core),
            service_uuid,
            listener: Mutex::new(Some(listener)),
        }))
    }

    fn create_socket(&self, address: &str, service_uuid: Uuid) -> io::Result<Arc<dyn StreamSocket>> {
        Ok(Arc::new(TcpStreamSocket {
            core: Arc::clone(&self.core),
            target: Some((address.to_string(), service_uuid)),
            stream: OnceLock::new(),
            remote: OnceLock::new(),
            closed: AtomicBool::new(false),
        }))
    }

    fn subscribe_found_devices(&self) -> mpsc::UnboundedReceiver<PeerIdentity> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.core.found).push(tx);
        rx
    }

    fn subscribe_link_state(&self) -> mpsc::UnboundedReceiver<LinkStateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.core.link).push(tx);
        rx
    }
}

/// Probes every bonded peer once, reporting the reachable ones.
fn probe_loop(core: &AdapterCore) {
    info!("probing {} bonded peer(s)", core.config.bonded.len());
    for peer in &core.config.bonded {
        if !core.discovering.load(Ordering::SeqCst) {
            debug!("discovery cancelled");
            return;
        }
        match probe(peer.address(), core.config.probe_timeout) {
            Ok(()) => {
                debug!("probe reached {peer}");
                core.emit_found(peer.clone());
            }
            Err(e) => debug!("probe of {peer} failed: {e}"),
        }
    }
    core.discovering.store(false, Ordering::SeqCst);
    info!("discovery finished");
}

fn probe(address: &str, timeout: Duration) -> io::Result<()> {
    let addr = resolve(address)?;
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

fn resolve(address: &str) -> io::Result<SocketAddr> {
    address.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{address} did not resolve"),
        )
    })
}

/// Replaces an unspecified advertised IP (`0.0.0.0`, `::`) with the IP the
/// connection came from.
fn reachable_address(advertised: &str, from: SocketAddr) -> String {
    match advertised.parse::<SocketAddr>() {
        Ok(addr) if addr.ip().is_unspecified() => SocketAddr::new(from.ip(), addr.port()).to_string(),
        _ => advertised.to_string(),
    }
}

fn handshake_to_io(e: HandshakeError) -> io::Error {
    match e {
        HandshakeError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Listening socket.  `close()` drops the listener so the port is freed at once.
pub struct TcpServerSocket {
    core: Arc<AdapterCore>,
    service_uuid: Uuid,
    listener: Mutex<Option<TcpListener>>,
}

impl TcpServerSocket {
    /// Runs the listener side of the handshake on a fresh connection.
    fn admit(&self, stream: TcpStream, from: SocketAddr) -> Result<Arc<TcpStreamSocket>, HandshakeError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.core.config.handshake_timeout))?;
        let theirs = Hello::read_from(&mut &stream)?;
        theirs.check_service(self.service_uuid)?;
        self.core.hello(self.service_uuid).write_to(&mut &stream)?;
        stream.set_read_timeout(None)?;
        stream.set_nodelay(true)?;

        let address = reachable_address(&theirs.address, from);
        let remote = self.core.identify(&theirs.name, &address);
        Ok(Arc::new(TcpStreamSocket::accepted(
            Arc::clone(&self.core),
            stream,
            remote,
        )))
    }
}

impl ServerSocket for TcpServerSocket {
    fn accept(&self) -> io::Result<Arc<dyn StreamSocket>> {
        loop {
            let accepted = {
                let guard = lock(&self.listener);
                let Some(listener) = guard.as_ref() else {
                    return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
                };
                listener.accept()
            };
            match accepted {
                Ok((stream, from)) => match self.admit(stream, from) {
                    Ok(socket) => {
                        info!("accepted {} from {from}", socket.remote_label());
                        socket.announce_up();
                        return Ok(socket);
                    }
                    Err(e) if e.is_disconnect() => debug!("{from} hung up during handshake"),
                    Err(e) => warn!("rejected connection from {from}: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&self) {
        if lock(&self.listener).take().is_some() {
            debug!("listener closed");
        }
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

/// TCP stream socket, either dialed or accepted.
pub struct TcpStreamSocket {
    core: Arc<AdapterCore>,
    target: Option<(String, Uuid)>,
    stream: OnceLock<TcpStream>,
    remote: OnceLock<PeerIdentity>,
    closed: AtomicBool,
}

impl TcpStreamSocket {
    fn accepted(core: Arc<AdapterCore>, stream: TcpStream, remote: PeerIdentity) -> Self {
        let socket = Self {
            core,
            target: None,
            stream: OnceLock::new(),
            remote: OnceLock::new(),
            closed: AtomicBool::new(false),
        };
        let _ = socket.stream.set(stream);
        let _ = socket.remote.set(remote);
        socket
    }

    /// Identity of the remote side, once the handshake has completed.
    pub fn remote(&self) -> Option<&PeerIdentity> {
        self.remote.get()
    }

    fn remote_label(&self) -> String {
        self.remote
            .get()
            .map_or_else(|| "unknown peer".to_string(), ToString::to_string)
    }

    fn announce_up(&self) {
        if let Some(peer) = self.remote.get() {
            self.core.emit_link_state(LinkStateEvent::up(peer.clone()));
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        self.stream
            .get()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "not connected"))
    }

    fn dial(&self, address: &str, service_uuid: Uuid) -> Result<(TcpStream, Hello), HandshakeError> {
        let stream = TcpStream::connect_timeout(&resolve(address)?, self.core.config.handshake_timeout)?;
        stream.set_read_timeout(Some(self.core.config.handshake_timeout))?;
        self.core.hello(service_uuid).write_to(&mut &stream)?;
        let theirs = Hello::read_from(&mut &stream)?;
        theirs.check_service(service_uuid)?;
        stream.set_read_timeout(None)?;
        stream.set_nodelay(true)?;
        Ok((stream, theirs))
    }
}

impl StreamSocket for TcpStreamSocket {
    fn connect(&self) -> io::Result<()> {
        if self.stream.get().is_some() {
            return Ok(());
        }
        let Some((address, service_uuid)) = &self.target else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no target address"));
        };
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }

        let (stream, theirs) = self.dial(address, *service_uuid).map_err(handshake_to_io)?;
        let remote = self.core.identify(&theirs.name, address);
        if self.stream.set(stream).is_err() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "connected twice"));
        }
        let _ = self.remote.set(remote);

        if self.closed.load(Ordering::SeqCst) {
            if let Some(stream) = self.stream.get() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed while connecting"));
        }
        info!("connected to {}", self.remote_label());
        self.announce_up();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.stream.get().is_some()
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.stream()?;
        stream.read(buf)
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.stream()?;
        stream.write_all(bytes)?;
        stream.flush()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.stream.get() {
            let _ = stream.shutdown(Shutdown::Both);
            if let Some(peer) = self.remote.get() {
                info!("link to {peer} closed");
                self.core.emit_link_state(LinkStateEvent::down(peer.clone()));
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serialchat_core::SERVICE_UUID;

    fn adapter(name: &str, bonded: Vec<PeerIdentity>) -> TcpAdapter {
        TcpAdapter::new(TcpAdapterConfig {
            name: Some(name.to_string()),
            listen_address: "127.0.0.1:0".to_string(),
            advertised_address: format!("{name}.local:1"),
            bonded,
            handshake_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(200),
        })
    }

    #[test]
    fn test_from_app_config_uses_transport_and_peers() {
        let mut cfg = AppConfig::default();
        cfg.node.display_name = Some("desk".to_string());
        cfg.transport.port = 4100;
        cfg.peers.push(crate::infrastructure::storage::config::PeerEntry {
            name: "laptop".to_string(),
            address: "10.0.0.2:4100".to_string(),
        });

        let tcp = TcpAdapterConfig::from_app_config(&cfg);

        assert_eq!(tcp.name.as_deref(), Some("desk"));
        assert_eq!(tcp.listen_address, "0.0.0.0:4100");
        assert_eq!(tcp.advertised_address, "0.0.0.0:4100");
        assert_eq!(tcp.bonded, vec![PeerIdentity::new("laptop", "10.0.0.2:4100")]);
    }

    #[test]
    fn test_zero_timeouts_are_raised_to_one_millisecond() {
        let a = TcpAdapter::new(TcpAdapterConfig {
            handshake_timeout: Duration::ZERO,
            probe_timeout: Duration::ZERO,
            ..adapter("a", vec![]).core.config.clone()
        });

        assert_eq!(a.core.config.handshake_timeout, Duration::from_millis(1));
        assert_eq!(a.core.config.probe_timeout, Duration::from_millis(1));
    }

    #[test]
    fn test_zero_timeout_dial_times_out_instead_of_invalid_input() {
        // A listener that accepts but never sends its hello.
        let silent = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();
        let a = TcpAdapter::new(TcpAdapterConfig {
            handshake_timeout: Duration::ZERO,
            ..adapter("a", vec![]).core.config.clone()
        });

        let socket = a
            .create_socket(&format!("127.0.0.1:{port}"), SERVICE_UUID)
            .unwrap();
        let err = socket.connect().expect_err("no hello within a millisecond");

        assert_ne!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_identify_prefers_bonded_entry() {
        let a = adapter("a", vec![PeerIdentity::new("Laptop", "10.0.0.2:1")]);
        assert_eq!(
            a.core.identify("laptop-hostname", "10.0.0.2:1"),
            PeerIdentity::new("Laptop", "10.0.0.2:1")
        );
        assert_eq!(
            a.core.identify("phone", "10.0.0.3:1"),
            PeerIdentity::new("phone", "10.0.0.3:1")
        );
    }

    #[test]
    fn test_unspecified_advertised_ip_is_replaced_by_source() {
        let from: SocketAddr = "192.168.1.7:50123".parse().unwrap();
        assert_eq!(reachable_address("0.0.0.0:27100", from), "192.168.1.7:27100");
        assert_eq!(reachable_address("10.0.0.2:27100", from), "10.0.0.2:27100");
        assert_eq!(reachable_address("laptop.local:27100", from), "laptop.local:27100");
    }

    #[test]
    fn test_closed_listener_fails_accept() {
        let a = adapter("a", vec![]);
        let server = a.listen("chat_service", SERVICE_UUID).unwrap();
        server.close();
        server.close();
        assert!(server.accept().is_err());
    }

    #[test]
    fn test_connect_to_unbound_port_fails() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let a = adapter("a", vec![]);

        let socket = a
            .create_socket(&format!("127.0.0.1:{port}"), SERVICE_UUID)
            .unwrap();

        assert!(socket.connect().is_err());
        assert!(!socket.is_connected());
    }

    #[test]
    fn test_unconnected_socket_io_fails() {
        let a = adapter("a", vec![]);
        let socket = a.create_socket("127.0.0.1:1", SERVICE_UUID).unwrap();
        let mut buf = [0u8; 4];
        assert!(socket.read(&mut buf).is_err());
        assert!(socket.write_all(b"x").is_err());
        socket.close();
    }

    #[test]
    fn test_handshake_errors_map_to_io() {
        let err = handshake_to_io(HandshakeError::ServiceMismatch {
            expected: SERVICE_UUID,
            offered: Uuid::nil(),
        });
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
