//! TransferChannel: message I/O over one connected socket.
//!
//! The channel borrows the socket's lifetime from the controller: it reads and
//! writes but never closes.  Closing the socket from the control path is how
//! a blocked [`IncomingMessages`] iterator is ended.
//!
//! # Framing
//!
//! Each read fills at most [`READ_BUFFER_SIZE`] bytes and every read that
//! returns at least one byte is decoded as exactly one message.  There is no
//! length prefix, so an oversized frame is split across reads and rapid sends
//! may be coalesced into one read.

use std::sync::Arc;

use serialchat_core::{decode_message, Message, READ_BUFFER_SIZE};
use tracing::{debug, warn};

use crate::application::transport::StreamSocket;

/// Message reader/writer over one connected stream socket.
pub struct TransferChannel {
    socket: Arc<dyn StreamSocket>,
}

impl TransferChannel {
    pub fn new(socket: Arc<dyn StreamSocket>) -> Self {
        Self { socket }
    }

    /// Returns the blocking sequence of inbound messages.
    ///
    /// The sequence ends silently when a read fails or the peer closes the
    /// stream; a dropped connection is indistinguishable from a clean end.
    pub fn incoming(&self) -> IncomingMessages {
        IncomingMessages {
            socket: Arc::clone(&self.socket),
            buf: vec![0u8; READ_BUFFER_SIZE],
            started: false,
            finished: false,
        }
    }

    /// Writes one full frame.
    ///
    /// Returns `false` on any I/O failure; the failure is logged, not raised.
    pub fn send(&self, bytes: &[u8]) -> bool {
        match self.socket.write_all(bytes) {
            Ok(()) => {
                debug!("sent frame of {} bytes", bytes.len());
                true
            }
            Err(e) => {
                warn!("failed to send frame: {e}");
                false
            }
        }
    }
}

/// Blocking iterator of messages read from the socket.
///
/// Not restartable: once it returns `None` it keeps returning `None`.
pub struct IncomingMessages {
    socket: Arc<dyn StreamSocket>,
    buf: Vec<u8>,
    started: bool,
    finished: bool,
}

impl Iterator for IncomingMessages {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            if !self.socket.is_connected() {
                debug!("socket not connected; incoming stream is empty");
                self.finished = true;
                return None;
            }
        }

        match self.socket.read(&mut self.buf) {
            Ok(0) => {
                debug!("peer closed the stream");
                self.finished = true;
                None
            }
            Ok(n) => Some(decode_message(&self.buf[..n])),
            Err(e) => {
                debug!("incoming stream ended: {e}");
                self.finished = true;
                None
            }
        }
    }
}

impl std::iter::FusedIterator for IncomingMessages {}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;

    /// Scripted socket: each queued item is the outcome of one read.
    struct ScriptedSocket {
        connected: bool,
        reads: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        written: Mutex<Vec<Vec<u8>>>,
        fail_writes: bool,
        read_calls: Mutex<usize>,
    }

    impl ScriptedSocket {
        fn new(connected: bool, reads: Vec<io::Result<Vec<u8>>>) -> Arc<Self> {
            Arc::new(Self {
                connected,
                reads: Mutex::new(reads.into()),
                written: Mutex::new(Vec::new()),
                fail_writes: false,
                read_calls: Mutex::new(0),
            })
        }

        fn failing_writes() -> Arc<Self> {
            Arc::new(Self {
                connected: true,
                reads: Mutex::new(VecDeque::new()),
                written: Mutex::new(Vec::new()),
                fail_writes: true,
                read_calls: Mutex::new(0),
            })
        }
    }

    impl StreamSocket for ScriptedSocket {
        fn connect(&self) -> io::Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            *self.read_calls.lock().unwrap() += 1;
            match self.reads.lock().unwrap().pop_front() {
                Some(Ok(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }

        fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            self.written.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn close(&self) {}
    }

    #[test]
    fn test_each_read_is_one_message() {
        // Arrange
        let socket = ScriptedSocket::new(
            true,
            vec![Ok(b"phone#hi".to_vec()), Ok(b"phone#there".to_vec())],
        );
        let channel = TransferChannel::new(socket);

        // Act
        let messages: Vec<Message> = channel.incoming().collect();

        // Assert
        assert_eq!(
            messages,
            vec![Message::remote("hi", "phone"), Message::remote("there", "phone")]
        );
    }

    #[test]
    fn test_unconnected_socket_yields_nothing_without_reading() {
        let socket = ScriptedSocket::new(false, vec![Ok(b"a#b".to_vec())]);
        let channel = TransferChannel::new(socket.clone());

        assert_eq!(channel.incoming().count(), 0);
        assert_eq!(*socket.read_calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_read_error_ends_stream_silently() {
        let socket = ScriptedSocket::new(
            true,
            vec![
                Ok(b"a#first".to_vec()),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
                Ok(b"a#never".to_vec()),
            ],
        );
        let channel = TransferChannel::new(socket);

        let messages: Vec<Message> = channel.incoming().collect();

        assert_eq!(messages, vec![Message::remote("first", "a")]);
    }

    #[test]
    fn test_stream_is_not_restartable_after_end() {
        let socket = ScriptedSocket::new(true, vec![Ok(b"a#x".to_vec())]);
        let channel = TransferChannel::new(socket.clone());
        let mut incoming = channel.incoming();

        assert!(incoming.next().is_some());
        assert!(incoming.next().is_none());
        assert!(incoming.next().is_none());
        assert_eq!(*socket.read_calls.lock().unwrap(), 2, "no read after end");
    }

    #[test]
    fn test_oversized_frame_is_truncated_to_buffer() {
        let frame = format!("s#{}", "x".repeat(READ_BUFFER_SIZE * 2));
        let socket = ScriptedSocket::new(true, vec![Ok(frame.into_bytes())]);
        let channel = TransferChannel::new(socket);

        let first = channel.incoming().next().expect("one message");

        assert_eq!(first.text().len(), READ_BUFFER_SIZE - 2);
    }

    #[test]
    fn test_send_writes_full_frame_and_reports_success() {
        let socket = ScriptedSocket::new(true, vec![]);
        let channel = TransferChannel::new(socket.clone());

        assert!(channel.send(b"desk#hello"));
        assert_eq!(*socket.written.lock().unwrap(), vec![b"desk#hello".to_vec()]);
    }

    #[test]
    fn test_send_failure_returns_false() {
        let channel = TransferChannel::new(ScriptedSocket::failing_writes());
        assert!(!channel.send(b"desk#hello"));
    }
}
