//! Peer identities and link-state notifications.

use std::fmt;

/// The identity of a remote device as reported by the platform.
///
/// Equality compares **both** fields.  A device that changes its advertised
/// name is treated as a new, distinct peer; discovery dedup and the paired
/// check both rely on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    name: String,
    address: String,
}

impl PeerIdentity {
    /// Creates a new identity.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// The human-readable device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The link-layer address used to open a socket to this peer.
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

/// A link up/down notification pushed by the platform for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStateEvent {
    pub peer: PeerIdentity,
    pub connected: bool,
}

impl LinkStateEvent {
    pub fn up(peer: PeerIdentity) -> Self {
        Self {
            peer,
            connected: true,
        }
    }

    pub fn down(peer: PeerIdentity) -> Self {
        Self {
            peer,
            connected: false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
