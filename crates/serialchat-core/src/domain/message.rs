//! Chat messages and the results produced by a connection attempt.

/// One chat message, either typed locally or received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    text: String,
    sender_name: String,
    is_from_local_user: bool,
}

impl Message {
    pub fn new(text: impl Into<String>, sender_name: impl Into<String>, is_from_local_user: bool) -> Self {
        Self {
            text: text.into(),
            sender_name: sender_name.into(),
            is_from_local_user,
        }
    }

    /// A message typed on this device.
    pub fn local(text: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self::new(text, sender_name, true)
    }

    /// A message that arrived from the peer.
    pub fn remote(text: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self::new(text, sender_name, false)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn is_from_local_user(&self) -> bool {
        self.is_from_local_user
    }
}

/// What a server or client connection attempt reports to its consumer.
///
/// Consumers must match exhaustively; a dropped connection is signalled by the
/// end of the result sequence, not by an `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    /// A bidirectional channel to the peer is now attached.
    Established,
    /// A frame arrived from the peer and was decoded.
    MessageReceived(Message),
    /// The attempt failed; the reason is user-facing text.
    Error(String),
}

impl ConnectionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionResult::Error(_))
    }
}
