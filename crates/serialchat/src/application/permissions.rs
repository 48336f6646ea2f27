//! Capability checks supplied by the platform.
//!
//! The controller never looks permissions up by itself.  Callers take a
//! [`Permissions`] snapshot from their [`PermissionOracle`] and pass it into
//! every guarded operation, which keeps the controller testable without a
//! platform environment.

use std::fmt;

/// A platform capability guarding some controller operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Scanning for nearby devices.
    Scan,
    /// Opening, accepting, and using connections; also reading the bonded
    /// device list.
    Connect,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Scan => f.write_str("scan"),
            Capability::Connect => f.write_str("connect"),
        }
    }
}

/// A point-in-time snapshot of granted capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub scan: bool,
    pub connect: bool,
}

impl Permissions {
    /// Every capability granted.
    pub const ALL: Permissions = Permissions {
        scan: true,
        connect: true,
    };

    /// No capability granted.
    pub const NONE: Permissions = Permissions {
        scan: false,
        connect: false,
    };

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Scan => self.scan,
            Capability::Connect => self.connect,
        }
    }
}

/// Boolean capability oracle provided by the platform.
pub trait PermissionOracle: Send + Sync {
    fn has_capability(&self, capability: Capability) -> bool;

    /// Captures the current answers for both capabilities.
    fn snapshot(&self) -> Permissions {
        Permissions {
            scan: self.has_capability(Capability::Scan),
            connect: self.has_capability(Capability::Connect),
        }
    }
}

impl PermissionOracle for Permissions {
    fn has_capability(&self, capability: Capability) -> bool {
        self.has(capability)
    }
}
