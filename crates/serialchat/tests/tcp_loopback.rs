//! End-to-end session over the TCP adapter on loopback.
//!
//! Two controllers, each with its own [`TcpAdapter`] on a free local port,
//! bonded to each other.  Covers the handshake, message exchange in both
//! directions, the server re-listening after a client leaves, and rejection
//! of a dialer that asks for a different service.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use serialchat::application::orchestrator::{ChatController, ConnectionStream};
use serialchat::application::permissions::Permissions;
use serialchat::infrastructure::adapter::handshake::Hello;
use serialchat::infrastructure::adapter::tcp::{TcpAdapter, TcpAdapterConfig};
use serialchat_core::{ConnectionResult, Message, PeerIdentity};
use tokio::sync::mpsc;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("local addr")
        .port()
}

fn tcp_node(name: &str, port: u16, bonded: Vec<PeerIdentity>) -> ChatController {
    let address = format!("127.0.0.1:{port}");
    let adapter = TcpAdapter::new(TcpAdapterConfig {
        name: Some(name.to_string()),
        listen_address: address.clone(),
        advertised_address: address,
        bonded,
        handshake_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(300),
    });
    ChatController::with_permissions(Arc::new(adapter), Permissions::ALL)
}

fn pump(mut stream: ConnectionStream) -> mpsc::UnboundedReceiver<ConnectionResult> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ConnectionResult>) -> Option<ConnectionResult> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("event arrives in time")
}

/// Waits until something accepts TCP connections on `port`.
async fn wait_for_listener(port: u16) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(tokio::time::Instant::now() < deadline, "listener never came up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loopback_session_and_relisten() {
    // Arrange
    let server_port = free_port();
    let client_port = free_port();
    let server_id = PeerIdentity::new("server", format!("127.0.0.1:{server_port}"));
    let client_id = PeerIdentity::new("client", format!("127.0.0.1:{client_port}"));
    let server = tcp_node("server", server_port, vec![client_id.clone()]);
    let client = tcp_node("client", client_port, vec![server_id.clone()]);

    let mut server_events = pump(server.start_server(Permissions::ALL));
    wait_for_listener(server_port).await;

    // Act: first session.
    let mut client_events = pump(client.connect_to_device(Permissions::ALL, server_id.clone()));

    // Assert
    assert_eq!(next_event(&mut client_events).await, Some(ConnectionResult::Established));
    assert_eq!(next_event(&mut server_events).await, Some(ConnectionResult::Established));

    client.try_send_message(Permissions::ALL, "ping").await;
    assert_eq!(
        next_event(&mut server_events).await,
        Some(ConnectionResult::MessageReceived(Message::remote("ping", "client")))
    );
    server.try_send_message(Permissions::ALL, "pong").await;
    assert_eq!(
        next_event(&mut client_events).await,
        Some(ConnectionResult::MessageReceived(Message::remote("pong", "server")))
    );

    // Act: the client leaves, the server listens again.
    client.close_connection();
    assert_eq!(next_event(&mut client_events).await, None);
    wait_for_listener(server_port).await;

    let mut again = pump(client.connect_to_device(Permissions::ALL, server_id));
    assert_eq!(next_event(&mut again).await, Some(ConnectionResult::Established));
    assert_eq!(next_event(&mut server_events).await, Some(ConnectionResult::Established));

    client.release();
    server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_service_is_dropped_without_a_session() {
    // Arrange
    let server_port = free_port();
    let server = tcp_node("server", server_port, vec![]);
    let mut server_events = pump(server.start_server(Permissions::ALL));
    wait_for_listener(server_port).await;

    // Act: a dialer asking for another service.
    let outcome = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", server_port))?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Hello {
            service_uuid: Uuid::nil(),
            name: "intruder".to_string(),
            address: "127.0.0.1:1".to_string(),
        }
        .write_to(&mut stream)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut buf = [0u8; 64];
        stream.read(&mut buf)
    })
    .await
    .expect("dialer task");

    // Assert: the listener hangs up without answering.
    assert!(matches!(outcome, Ok(0) | Err(_)));
    assert!(server_events.try_recv().is_err(), "no Established for a mismatched service");
    assert!(!server.has_channel());

    server.release();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_to_closed_port_is_interrupted() {
    let client = tcp_node("client", free_port(), vec![]);
    let target = PeerIdentity::new("nobody", format!("127.0.0.1:{}", free_port()));

    let mut events = pump(client.connect_to_device(Permissions::ALL, target));

    assert_eq!(
        next_event(&mut events).await,
        Some(ConnectionResult::Error("Connection was interrupted".to_string()))
    );
    assert_eq!(next_event(&mut events).await, None);
    assert!(client.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_reports_reachable_bonded_peers() {
    // Arrange: one bonded peer listening, one not.
    let up_port = free_port();
    let _listener = TcpListener::bind(("127.0.0.1", up_port)).expect("bind");
    let up = PeerIdentity::new("up", format!("127.0.0.1:{up_port}"));
    let down = PeerIdentity::new("down", format!("127.0.0.1:{}", free_port()));
    let controller = tcp_node("desk", free_port(), vec![up.clone(), down]);
    let mut scanned = controller.subscribe_scanned();

    // Act
    controller.start_discovery(Permissions::ALL);

    // Assert
    tokio::time::timeout(WAIT, scanned.wait_for(|devices| !devices.is_empty()))
        .await
        .expect("scan result in time")
        .expect("controller alive");
    assert_eq!(controller.scanned_devices(), vec![up]);
    assert_eq!(controller.paired_devices().len(), 2);

    controller.release();
}
