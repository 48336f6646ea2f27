//! DeviceRegistry: the deduplicated sets of discovered and paired peers.
//!
//! Both sets are published as `tokio::sync::watch` cells, so a reader gets the
//! current snapshot on subscribe and every later update.
//!
//! - **Discovered set**: append-only during one discovery session, cleared
//!   when a new session starts.  An identity is appended only if no entry with
//!   the same (name, address) exists; first-appearance order is kept.
//! - **Paired set**: replaced wholesale by every refresh.

use serialchat_core::PeerIdentity;
use tokio::sync::watch;
use tracing::debug;

/// Published sets of discovered and paired peers.
pub struct DeviceRegistry {
    scanned: watch::Sender<Vec<PeerIdentity>>,
    paired: watch::Sender<Vec<PeerIdentity>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            scanned: watch::Sender::new(Vec::new()),
            paired: watch::Sender::new(Vec::new()),
        }
    }

    /// Appends `identity` to the discovered set unless an identical entry exists.
    ///
    /// Returns `true` when the set changed.
    pub fn record_discovered(&self, identity: PeerIdentity) -> bool {
        self.scanned.send_if_modified(|devices| {
            if devices.contains(&identity) {
                false
            } else {
                debug!("discovered {identity}");
                devices.push(identity);
                true
            }
        })
    }

    /// Replaces the paired set with `identities`.
    pub fn refresh_paired(&self, identities: Vec<PeerIdentity>) {
        debug!("paired set refreshed with {} device(s)", identities.len());
        self.paired.send_replace(identities);
    }

    /// Clears the discovered set at the start of a new discovery session.
    pub fn reset_discovered(&self) {
        self.scanned.send_if_modified(|devices| {
            let changed = !devices.is_empty();
            devices.clear();
            changed
        });
    }

    pub fn is_paired(&self, identity: &PeerIdentity) -> bool {
        self.paired.borrow().contains(identity)
    }

    /// Snapshot of the discovered set.
    pub fn scanned(&self) -> Vec<PeerIdentity> {
        self.scanned.borrow().clone()
    }

    /// Snapshot of the paired set.
    pub fn paired(&self) -> Vec<PeerIdentity> {
        self.paired.borrow().clone()
    }

    pub fn subscribe_scanned(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.scanned.subscribe()
    }

    pub fn subscribe_paired(&self) -> watch::Receiver<Vec<PeerIdentity>> {
        self.paired.subscribe()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, address: &str) -> PeerIdentity {
        PeerIdentity::new(name, address)
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = DeviceRegistry::new();
        assert!(registry.scanned().is_empty());
        assert!(registry.paired().is_empty());
    }

    #[test]
    fn test_identical_identity_is_recorded_once() {
        // Arrange
        let registry = DeviceRegistry::new();

        // Act
        let first = registry.record_discovered(peer("phone", "aa:bb"));
        let second = registry.record_discovered(peer("phone", "aa:bb"));

        // Assert
        assert!(first);
        assert!(!second, "duplicate must be a no-op");
        assert_eq!(registry.scanned(), vec![peer("phone", "aa:bb")]);
    }

    #[test]
    fn test_different_name_or_address_records_two_entries() {
        let registry = DeviceRegistry::new();
        registry.record_discovered(peer("phone", "aa:bb"));
        registry.record_discovered(peer("phone-2", "aa:bb"));
        registry.record_discovered(peer("phone", "cc:dd"));
        assert_eq!(registry.scanned().len(), 3);
    }

    #[test]
    fn test_discovered_order_is_first_appearance() {
        let registry = DeviceRegistry::new();
        registry.record_discovered(peer("b", "2"));
        registry.record_discovered(peer("a", "1"));
        registry.record_discovered(peer("b", "2"));
        registry.record_discovered(peer("c", "3"));
        let names: Vec<_> = registry.scanned().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_reset_discovered_clears_set() {
        let registry = DeviceRegistry::new();
        registry.record_discovered(peer("phone", "aa:bb"));
        registry.reset_discovered();
        assert!(registry.scanned().is_empty());
    }

    #[test]
    fn test_refresh_paired_replaces_wholesale() {
        // Arrange
        let registry = DeviceRegistry::new();
        registry.refresh_paired(vec![peer("old", "1"), peer("kept", "2")]);

        // Act
        registry.refresh_paired(vec![peer("kept", "2"), peer("new", "3")]);

        // Assert
        assert_eq!(registry.paired(), vec![peer("kept", "2"), peer("new", "3")]);
        assert!(!registry.is_paired(&peer("old", "1")));
    }

    #[test]
    fn test_is_paired_requires_full_identity_match() {
        let registry = DeviceRegistry::new();
        registry.refresh_paired(vec![peer("laptop", "aa:bb")]);
        assert!(registry.is_paired(&peer("laptop", "aa:bb")));
        assert!(!registry.is_paired(&peer("renamed", "aa:bb")));
    }

    #[tokio::test]
    async fn test_subscriber_sees_current_value_and_updates() {
        // Arrange
        let registry = DeviceRegistry::new();
        registry.record_discovered(peer("a", "1"));
        let mut rx = registry.subscribe_scanned();

        // Assert current value is visible immediately
        assert_eq!(rx.borrow_and_update().len(), 1);

        // Act
        registry.record_discovered(peer("b", "2"));

        // Assert the update is observed
        rx.changed().await.expect("sender alive");
        assert_eq!(rx.borrow().len(), 2);
    }

    #[test]
    fn test_duplicate_does_not_notify_subscribers() {
        let registry = DeviceRegistry::new();
        registry.record_discovered(peer("a", "1"));
        let mut rx = registry.subscribe_scanned();
        rx.borrow_and_update();

        registry.record_discovered(peer("a", "1"));

        assert!(!rx.has_changed().expect("sender alive"));
    }
}
