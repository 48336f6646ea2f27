//! ChatController: turns a listen or dial attempt into an attached
//! [`TransferChannel`] and reports what happens as a [`ConnectionStream`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start_server──▶ Listening ──accept──▶ Connected ──stream ends──▶ Listening …
//!  │                                                │
//!  └──connect_to_device──▶ Connecting ──connect──▶──┘──close_connection──▶ Idle
//! ```
//!
//! All socket work runs on `spawn_blocking` workers that report back over an
//! `mpsc` channel.  The control path (`close_connection`, `release`, dropping
//! a stream) closes the sockets held in the controller's slots, which unblocks
//! whatever the worker is waiting on.
//!
//! # Attempt generations
//!
//! Each started stream takes a fresh generation number.  `close_connection`
//! and the cleanup of a dropped or finished stream bump it as well.  A worker only touches
//! the slots while its generation is current, so the late cleanup of a
//! finished attempt can never close the sockets of a newer one.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use serialchat_core::{
    encode_message, ConnectionResult, LinkStateEvent, Message, PeerIdentity, SERVICE_NAME,
    SERVICE_UUID, UNKNOWN_NAME,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::device_registry::DeviceRegistry;
use crate::application::permissions::{Capability, Permissions};
use crate::application::transfer_channel::TransferChannel;
use crate::application::transport::{SerialAdapter, ServerSocket, StreamSocket};

/// Capacity of the per-attempt result channel.
const RESULT_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the error notification broadcast.
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Failures reported by the controller.
///
/// Nothing is returned as `Err` across the public surface.  The `Display`
/// text of these variants is what callers see in [`ConnectionResult::Error`]
/// or on the error notification stream.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChatError {
    #[error("Permission denied: the {0} capability is not granted")]
    PermissionDenied(Capability),
    #[error("Can't connect to a non-paired device.")]
    DeviceNotPaired,
    #[error("Connection was interrupted")]
    ConnectionInterrupted,
    #[error("Unable to listen for incoming connections")]
    ListenFailed,
}

/// Sockets owned by the controller.
///
/// At most one listening socket, one connected socket, and one channel exist
/// at any time.
#[derive(Default)]
struct SocketSlots {
    generation: u64,
    server: Option<Arc<dyn ServerSocket>>,
    client: Option<Arc<dyn StreamSocket>>,
    channel: Option<Arc<TransferChannel>>,
}

impl SocketSlots {
    /// Closes and clears everything.  Returns `true` if a channel was attached.
    fn close_all(&mut self) -> bool {
        if let Some(server) = self.server.take() {
            server.close();
        }
        if let Some(client) = self.client.take() {
            client.close();
        }
        self.channel.take().is_some()
    }
}

struct Shared {
    adapter: Arc<dyn SerialAdapter>,
    registry: DeviceRegistry,
    connected: watch::Sender<bool>,
    errors: broadcast::Sender<String>,
    slots: Mutex<SocketSlots>,
    found_pump: Mutex<Option<JoinHandle<()>>>,
    link_pump: Mutex<Option<JoinHandle<()>>>,
}

/// Connection orchestrator for one local adapter.
///
/// Cloning is cheap; clones share the same sockets and observable state.
#[derive(Clone)]
pub struct ChatController {
    shared: Arc<Shared>,
}

impl ChatController {
    /// Creates a controller and subscribes to the adapter's link-state source.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(adapter: Arc<dyn SerialAdapter>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let controller = Self {
            shared: Arc::new(Shared {
                adapter,
                registry: DeviceRegistry::new(),
                connected: watch::Sender::new(false),
                errors,
                slots: Mutex::new(SocketSlots::default()),
                found_pump: Mutex::new(None),
                link_pump: Mutex::new(None),
            }),
        };
        controller.start_link_state_pump();
        controller
    }

    /// Creates a controller and immediately loads the paired set.
    pub fn with_permissions(adapter: Arc<dyn SerialAdapter>, perms: Permissions) -> Self {
        let controller = Self::new(adapter);
        controller.refresh_paired_devices(perms);
        controller
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    /// Starts a discovery session.  No-op without the scan capability.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime while the scan capability
    /// is granted.
    pub fn start_discovery(&self, perms: Permissions) {
        if !perms.scan {
            debug!("start_discovery ignored: scan capability missing");
            return;
        }

        self.shared.registry.reset_discovered();

        let mut found = self.shared.adapter.subscribe_found_devices();
        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(async move {
            while let Some(identity) = found.recv().await {
                shared.registry.record_discovered(identity);
            }
        });
        if let Some(old) = lock(&self.shared.found_pump).replace(pump) {
            old.abort();
        }

        self.refresh_paired_devices(perms);

        if self.shared.adapter.start_discovery() {
            info!("discovery started");
        } else {
            warn!("adapter refused to start discovery");
        }
    }

    /// Cancels a running discovery.  No-op without the scan capability.
    pub fn stop_discovery(&self, perms: Permissions) {
        self.shared.stop_discovery(perms);
    }

    /// Replaces the paired set with the adapter's bonded devices.
    ///
    /// Without the connect capability the previous snapshot is kept.
    pub fn refresh_paired_devices(&self, perms: Permissions) {
        if !perms.connect {
            debug!("paired refresh skipped: connect capability missing");
            return;
        }
        self.shared
            .registry
            .refresh_paired(self.shared.adapter.bonded_devices());
    }

    // ── Connection attempts ──────────────────────────────────────────────────

    /// Listens for peers and reports each accepted session.
    ///
    /// Nothing happens until the returned stream is first polled.
    pub fn start_server(&self, perms: Permissions) -> ConnectionStream {
        if !perms.connect {
            return ConnectionStream::denied(Capability::Connect);
        }
        ConnectionStream::lazy(Attempt::Server {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Dials `peer` once and reports the session.
    ///
    /// Nothing happens until the returned stream is first polled.
    pub fn connect_to_device(&self, perms: Permissions, peer: PeerIdentity) -> ConnectionStream {
        if !perms.connect {
            return ConnectionStream::denied(Capability::Connect);
        }
        ConnectionStream::lazy(Attempt::Client {
            shared: Arc::clone(&self.shared),
            peer,
            perms,
        })
    }

    /// Sends `text` to the connected peer.
    ///
    /// Returns the local [`Message`] that was sent, or `None` when the
    /// connect capability is missing or no channel is attached.  A failed
    /// write is logged and the message is still returned.
    pub async fn try_send_message(&self, perms: Permissions, text: &str) -> Option<Message> {
        if !perms.connect {
            debug!("send skipped: connect capability missing");
            return None;
        }
        let channel = lock(&self.shared.slots).channel.clone()?;

        let sender = self
            .shared
            .adapter
            .name()
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());
        let message = Message::local(text, sender);
        let frame = encode_message(&message);

        match tokio::task::spawn_blocking(move || channel.send(&frame)).await {
            Ok(true) => debug!("message sent"),
            Ok(false) => {}
            Err(e) => warn!("send worker failed: {e}"),
        }
        Some(message)
    }

    /// Closes and clears both socket slots.  Idempotent.
    pub fn close_connection(&self) {
        self.shared.close_connection();
    }

    /// Drops the push-source subscriptions and closes the connection.
    pub fn release(&self) {
        for pump in [&self.shared.found_pump, &self.shared.link_pump] {
            if let Some(handle) = lock(pump).take() {
                handle.abort();
            }
        }
        self.close_connection();
        info!("controller released");
    }

    // ── Link state ───────────────────────────────────────────────────────────

    /// Applies a link up/down notification.
    ///
    /// Only paired peers may change the connection state; anything else
    /// raises a "not paired" notification and leaves the state alone.
    pub fn handle_link_state(&self, event: LinkStateEvent) {
        self.shared.handle_link_state(event);
    }

    fn start_link_state_pump(&self) {
        let mut events = self.shared.adapter.subscribe_link_state();
        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                shared.handle_link_state(event);
            }
        });
        *lock(&self.shared.link_pump) = Some(pump);
    }

    // ── Observable state ─────────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    pub fn scanned_devices(&self) -> Vec<PeerIdentity> {
        self.shared.registry.scanned()
    }

    pub fn subscribe_scanned(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.shared.registry.subscribe_scanned()
    }

    pub fn paired_devices(&self) -> Vec<PeerIdentity> {
        self.shared.registry.paired()
    }

    pub fn subscribe_paired(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.shared.registry.subscribe_paired()
    }

    /// Subscribes to error notifications.  Earlier notifications are not replayed.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.shared.errors.subscribe()
    }

    /// Whether a TransferChannel is currently attached.
    pub fn has_channel(&self) -> bool {
        lock(&self.shared.slots).channel.is_some()
    }

    /// Whether both socket slots are empty.
    pub fn is_idle(&self) -> bool {
        let slots = lock(&self.shared.slots);
        slots.server.is_none() && slots.client.is_none() && slots.channel.is_none()
    }
}

impl Shared {
    fn stop_discovery(&self, perms: Permissions) {
        if !perms.scan {
            debug!("stop_discovery ignored: scan capability missing");
            return;
        }
        if self.adapter.cancel_discovery() {
            debug!("discovery cancelled");
        }
    }

    fn handle_link_state(&self, event: LinkStateEvent) {
        if self.registry.is_paired(&event.peer) {
            debug!(connected = event.connected, "link state of {}", event.peer);
            self.connected.send_replace(event.connected);
        } else {
            warn!("link state from non-paired device {}", event.peer);
            // No receivers is fine.
            let _ = self.errors.send(ChatError::DeviceNotPaired.to_string());
        }
    }

    fn set_connected(&self, value: bool) {
        self.connected.send_if_modified(|c| std::mem::replace(c, value) != value);
    }

    fn close_connection(&self) {
        let had_channel = {
            let mut slots = lock(&self.slots);
            slots.generation += 1;
            slots.close_all()
        };
        if had_channel {
            self.set_connected(false);
            info!("connection closed");
        }
    }

    /// Starts a new attempt and returns its generation.
    fn begin_attempt(&self) -> u64 {
        let mut slots = lock(&self.slots);
        slots.generation += 1;
        slots.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.slots).generation == generation
    }

    fn install_server(&self, generation: u64, server: Arc<dyn ServerSocket>) -> bool {
        let mut slots = lock(&self.slots);
        if slots.generation != generation {
            return false;
        }
        slots.server = Some(server);
        true
    }

    fn install_client(&self, generation: u64, socket: Arc<dyn StreamSocket>) -> bool {
        let mut slots = lock(&self.slots);
        if slots.generation != generation {
            return false;
        }
        slots.client = Some(socket);
        true
    }

    /// Closes the listener and attaches a channel over `socket`.
    fn attach(
        &self,
        generation: u64,
        socket: Arc<dyn StreamSocket>,
    ) -> Option<Arc<TransferChannel>> {
        let channel = {
            let mut slots = lock(&self.slots);
            if slots.generation != generation {
                return None;
            }
            if let Some(server) = slots.server.take() {
                server.close();
            }
            let channel = Arc::new(TransferChannel::new(Arc::clone(&socket)));
            slots.client = Some(socket);
            slots.channel = Some(Arc::clone(&channel));
            channel
        };
        self.set_connected(true);
        Some(channel)
    }

    /// Closes and clears the connected slot and its channel.
    fn detach(&self, generation: u64) {
        let had_channel = {
            let mut slots = lock(&self.slots);
            if slots.generation != generation {
                return;
            }
            if let Some(client) = slots.client.take() {
                client.close();
            }
            slots.channel.take().is_some()
        };
        if had_channel {
            self.set_connected(false);
        }
    }

    /// Closes everything an attempt may still hold and retires its
    /// generation, so a worker still between `listen` and install backs out.
    fn cleanup_attempt(&self, generation: u64) {
        let had_channel = {
            let mut slots = lock(&self.slots);
            if slots.generation != generation {
                return;
            }
            slots.generation += 1;
            slots.close_all()
        };
        if had_channel {
            self.set_connected(false);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Workers ───────────────────────────────────────────────────────────────────

enum Attempt {
    Server {
        shared: Arc<Shared>,
    },
    Client {
        shared: Arc<Shared>,
        peer: PeerIdentity,
        perms: Permissions,
    },
}

impl Attempt {
    fn shared(&self) -> &Arc<Shared> {
        match self {
            Attempt::Server { shared } | Attempt::Client { shared, .. } => shared,
        }
    }

    /// Runs the attempt to completion on a blocking worker.
    ///
    /// `tx` is dropped only after cleanup, so a consumer that sees the end of
    /// the stream also sees empty slots.
    fn run(self, generation: u64, tx: mpsc::Sender<ConnectionResult>) {
        match self {
            Attempt::Server { shared } => {
                serve(&shared, generation, &tx);
                shared.cleanup_attempt(generation);
            }
            Attempt::Client {
                shared,
                peer,
                perms,
            } => {
                dial(&shared, generation, &peer, perms, &tx);
                shared.cleanup_attempt(generation);
            }
        }
        drop(tx);
    }
}

fn serve(shared: &Shared, generation: u64, tx: &mpsc::Sender<ConnectionResult>) {
    loop {
        let server = match shared.adapter.listen(SERVICE_NAME, SERVICE_UUID) {
            Ok(server) => server,
            Err(e) => {
                warn!("listen failed: {e}");
                let _ = tx.blocking_send(ConnectionResult::Error(ChatError::ListenFailed.to_string()));
                return;
            }
        };
        if !shared.install_server(generation, Arc::clone(&server)) {
            server.close();
            return;
        }
        info!("listening as {SERVICE_NAME}");

        let client = match server.accept() {
            Ok(client) => client,
            Err(e) => {
                debug!("accept ended: {e}");
                return;
            }
        };
        info!("peer accepted");

        let Some(channel) = shared.attach(generation, Arc::clone(&client)) else {
            client.close();
            return;
        };
        if tx.blocking_send(ConnectionResult::Established).is_err() {
            return;
        }
        if !forward(&channel, tx) {
            return;
        }

        debug!("client stream ended");
        shared.detach(generation);
        if tx.is_closed() || !shared.is_current(generation) {
            return;
        }
    }
}

fn dial(
    shared: &Shared,
    generation: u64,
    peer: &PeerIdentity,
    perms: Permissions,
    tx: &mpsc::Sender<ConnectionResult>,
) {
    let interrupted = || ConnectionResult::Error(ChatError::ConnectionInterrupted.to_string());

    let socket = match shared.adapter.create_socket(peer.address(), SERVICE_UUID) {
        Ok(socket) => socket,
        Err(e) => {
            warn!("could not create socket for {peer}: {e}");
            let _ = tx.blocking_send(interrupted());
            return;
        }
    };
    if !shared.install_client(generation, Arc::clone(&socket)) {
        socket.close();
        return;
    }

    shared.stop_discovery(perms);

    match socket.connect() {
        Ok(()) => {
            info!("connected to {peer}");
            let Some(channel) = shared.attach(generation, socket) else {
                return;
            };
            if tx.blocking_send(ConnectionResult::Established).is_err() {
                return;
            }
            if forward(&channel, tx) {
                debug!("stream from {peer} ended");
            }
        }
        Err(e) => {
            warn!("connect to {peer} failed: {e}");
            socket.close();
            shared.detach(generation);
            let _ = tx.blocking_send(interrupted());
        }
    }
}

/// Forwards incoming messages until the channel ends.
///
/// Returns `false` if the consumer went away first.
fn forward(channel: &TransferChannel, tx: &mpsc::Sender<ConnectionResult>) -> bool {
    for message in channel.incoming() {
        debug!("received {} bytes of text", message.text().len());
        if tx
            .blocking_send(ConnectionResult::MessageReceived(message))
            .is_err()
        {
            return false;
        }
    }
    true
}

// ── ConnectionStream ──────────────────────────────────────────────────────────

/// Closes an attempt's sockets when the stream that owns it is dropped.
struct AttemptGuard {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.shared.cleanup_attempt(self.generation);
    }
}

/// Results of one connection attempt.
///
/// Lazy: the worker starts on the first poll.  Dropping the stream after
/// that closes whatever the attempt still holds.
pub struct ConnectionStream {
    pending: Option<Attempt>,
    rx: Option<mpsc::Receiver<ConnectionResult>>,
    guard: Option<AttemptGuard>,
}

impl ConnectionStream {
    fn lazy(attempt: Attempt) -> Self {
        Self {
            pending: Some(attempt),
            rx: None,
            guard: None,
        }
    }

    fn denied(capability: Capability) -> Self {
        warn!("connection attempt denied: {capability} capability missing");
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.try_send(ConnectionResult::Error(
            ChatError::PermissionDenied(capability).to_string(),
        ));
        Self {
            pending: None,
            rx: Some(rx),
            guard: None,
        }
    }

    fn start(&mut self) {
        let Some(attempt) = self.pending.take() else {
            return;
        };
        let shared = Arc::clone(attempt.shared());
        let generation = shared.begin_attempt();
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        self.rx = Some(rx);
        self.guard = Some(AttemptGuard { shared, generation });
        tokio::task::spawn_blocking(move || attempt.run(generation, tx));
    }

    /// Waits for the next result; `None` once the attempt is over.
    pub async fn next(&mut self) -> Option<ConnectionResult> {
        StreamExt::next(self).await
    }
}

impl Stream for ConnectionStream {
    type Item = ConnectionResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ConnectionResult>> {
        let this = self.get_mut();
        this.start();
        match this.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
