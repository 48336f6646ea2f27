//! In-memory serial adapter for tests and local demos.
//!
//! A [`MockRadio`] is the shared "air" between several [`MockAdapter`]s.  A
//! listener registers under `(address, service_uuid)`; a socket created by
//! another adapter for the same pair connects to it through a pair of
//! in-memory pipes.  One `write_all` arrives as one `read` chunk on the
//! other side, which matches how a real link behaves for short frames.
//!
//! Discovery and link-state sources are driven by hand through
//! [`MockAdapter::emit_found_device`] and [`MockAdapter::emit_link_state`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};

use serialchat_core::{LinkStateEvent, PeerIdentity};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::application::transport::{SerialAdapter, ServerSocket, StreamSocket};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Pipe ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PipeState {
    chunks: VecDeque<Vec<u8>>,
    closed: bool,
}

/// One direction of an in-memory link.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    ready: Condvar,
}

impl Pipe {
    fn push(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
        }
        state.chunks.push_back(bytes.to_vec());
        self.ready.notify_all();
        Ok(())
    }

    /// Blocks for the next chunk.  `Ok(0)` once closed and drained.
    fn pull(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        loop {
            if let Some(mut chunk) = state.chunks.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.chunks.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_all();
    }
}

struct Endpoint {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl Endpoint {
    fn pair() -> (Endpoint, Endpoint) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        (
            Endpoint {
                inbound: Arc::clone(&b_to_a),
                outbound: Arc::clone(&a_to_b),
            },
            Endpoint {
                inbound: a_to_b,
                outbound: b_to_a,
            },
        )
    }

    fn close(&self) {
        self.inbound.close();
        self.outbound.close();
    }
}

// ── Sockets ───────────────────────────────────────────────────────────────────

/// In-memory stream socket.
pub struct MockStreamSocket {
    radio: Arc<MockRadio>,
    target: (String, Uuid),
    endpoint: OnceLock<Endpoint>,
    closed: AtomicBool,
    counted: AtomicBool,
}

impl MockStreamSocket {
    fn outbound(radio: Arc<MockRadio>, address: &str, service_uuid: Uuid) -> Self {
        Self {
            radio,
            target: (address.to_string(), service_uuid),
            endpoint: OnceLock::new(),
            closed: AtomicBool::new(false),
            counted: AtomicBool::new(false),
        }
    }

    fn accepted(radio: Arc<MockRadio>, target: (String, Uuid), endpoint: Endpoint) -> Self {
        let socket = Self {
            radio,
            target,
            endpoint: OnceLock::new(),
            closed: AtomicBool::new(false),
            counted: AtomicBool::new(true),
        };
        let _ = socket.endpoint.set(endpoint);
        socket
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn uncount(&self) {
        if self.counted.swap(false, Ordering::SeqCst) {
            self.radio.open_sockets.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl StreamSocket for MockStreamSocket {
    fn connect(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "socket closed"));
        }
        if self.endpoint.get().is_some() {
            return Ok(());
        }
        let (ours, theirs) = Endpoint::pair();
        let (address, service_uuid) = &self.target;
        self.radio.deliver(address, *service_uuid, theirs)?;
        if self.endpoint.set(ours).is_err() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "connected twice"));
        }
        self.radio.open_sockets.fetch_add(1, Ordering::SeqCst);
        self.counted.store(true, Ordering::SeqCst);
        // A close that raced the connect must still tear the link down.
        if self.is_closed() {
            if let Some(endpoint) = self.endpoint.get() {
                endpoint.close();
            }
            self.uncount();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.is_closed() && self.endpoint.get().is_some()
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.endpoint.get() {
            Some(endpoint) => endpoint.inbound.pull(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        }
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        match self.endpoint.get() {
            Some(endpoint) => endpoint.outbound.push(bytes),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "not connected")),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(endpoint) = self.endpoint.get() {
            endpoint.close();
        }
        self.uncount();
    }
}

#[derive(Default)]
struct ListenerState {
    pending: VecDeque<Endpoint>,
    closed: bool,
}

/// In-memory listening socket.
pub struct MockServerSocket {
    radio: Arc<MockRadio>,
    key: (String, Uuid),
    state: Mutex<ListenerState>,
    ready: Condvar,
}

impl MockServerSocket {
    fn offer(&self, endpoint: Endpoint) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "not listening"));
        }
        state.pending.push_back(endpoint);
        self.ready.notify_all();
        Ok(())
    }
}

impl ServerSocket for MockServerSocket {
    fn accept(&self) -> io::Result<Arc<dyn StreamSocket>> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
            }
            if let Some(endpoint) = state.pending.pop_front() {
                self.radio.open_sockets.fetch_add(1, Ordering::SeqCst);
                return Ok(Arc::new(MockStreamSocket::accepted(
                    Arc::clone(&self.radio),
                    self.key.clone(),
                    endpoint,
                )));
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close(&self) {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            for endpoint in state.pending.drain(..) {
                endpoint.close();
            }
        }
        self.ready.notify_all();
        self.radio.unregister(&self.key, self);
    }
}

// ── Radio ─────────────────────────────────────────────────────────────────────

/// Shared medium connecting mock adapters.
#[derive(Default)]
pub struct MockRadio {
    listeners: Mutex<HashMap<(String, Uuid), Arc<MockServerSocket>>>,
    open_sockets: AtomicUsize,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an adapter living at `address` on this radio.
    pub fn adapter(self: &Arc<Self>, name: Option<&str>, address: &str) -> MockAdapter {
        MockAdapter {
            radio: Arc::clone(self),
            name: name.map(str::to_string),
            address: address.to_string(),
            bonded: Mutex::new(Vec::new()),
            found: Mutex::new(Vec::new()),
            link: Mutex::new(Vec::new()),
            discovering: AtomicBool::new(false),
        }
    }

    /// Whether an open listener exists at `address` for `service_uuid`.
    pub fn is_listening(&self, address: &str, service_uuid: Uuid) -> bool {
        lock(&self.listeners).contains_key(&(address.to_string(), service_uuid))
    }

    /// Stream sockets that are connected or accepted and not yet closed.
    pub fn open_sockets(&self) -> usize {
        self.open_sockets.load(Ordering::SeqCst)
    }

    fn register(&self, server: Arc<MockServerSocket>) {
        if let Some(old) = lock(&self.listeners).insert(server.key.clone(), server) {
            debug!("replacing listener at {}", old.key.0);
        }
    }

    fn unregister(&self, key: &(String, Uuid), server: &MockServerSocket) {
        let mut listeners = lock(&self.listeners);
        if listeners
            .get(key)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), server))
        {
            listeners.remove(key);
        }
    }

    fn deliver(&self, address: &str, service_uuid: Uuid, endpoint: Endpoint) -> io::Result<()> {
        let server = lock(&self.listeners)
            .get(&(address.to_string(), service_uuid))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"))?;
        server.offer(endpoint)
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// A [`SerialAdapter`] on a [`MockRadio`].
pub struct MockAdapter {
    radio: Arc<MockRadio>,
    name: Option<String>,
    address: String,
    bonded: Mutex<Vec<PeerIdentity>>,
    found: Mutex<Vec<mpsc::UnboundedSender<PeerIdentity>>>,
    link: Mutex<Vec<mpsc::UnboundedSender<LinkStateEvent>>>,
    discovering: AtomicBool,
}

impl MockAdapter {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn identity(&self) -> PeerIdentity {
        PeerIdentity::new(
            self.name.clone().unwrap_or_default(),
            self.address.clone(),
        )
    }

    pub fn set_bonded(&self, devices: Vec<PeerIdentity>) {
        *lock(&self.bonded) = devices;
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    /// Pushes a found device to every discovery subscriber.
    pub fn emit_found_device(&self, identity: PeerIdentity) {
        lock(&self.found).retain(|tx| tx.send(identity.clone()).is_ok());
    }

    /// Pushes a link-state event to every subscriber.
    pub fn emit_link_state(&self, event: LinkStateEvent) {
        lock(&self.link).retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl SerialAdapter for MockAdapter {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn bonded_devices(&self) -> Vec<PeerIdentity> {
        lock(&self.bonded).clone()
    }

    fn start_discovery(&self) -> bool {
        self.discovering.store(true, Ordering::SeqCst);
        true
    }

    fn cancel_discovery(&self) -> bool {
        self.discovering.swap(false, Ordering::SeqCst)
    }

    fn listen(&self, service_name: &str, service_uuid: Uuid) -> io::Result<Arc<dyn ServerSocket>> {
        debug!("mock listen {service_name} at {}", self.address);
        let server = Arc::new(MockServerSocket {
            radio: Arc::clone(&self.radio),
            key: (self.address.clone(), service_uuid),
            state: Mutex::new(ListenerState::default()),
            ready: Condvar::new(),
        });
        self.radio.register(Arc::clone(&server));
        Ok(server)
    }

    fn create_socket(&self, address: &str, service_uuid: Uuid) -> io::Result<Arc<dyn StreamSocket>> {
        Ok(Arc::new(MockStreamSocket::outbound(
            Arc::clone(&self.radio),
            address,
            service_uuid,
        )))
    }

    fn subscribe_found_devices(&self) -> mpsc::UnboundedReceiver<PeerIdentity> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.found).push(tx);
        rx
    }

    fn subscribe_link_state(&self) -> mpsc::UnboundedReceiver<LinkStateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.link).push(tx);
        rx
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
