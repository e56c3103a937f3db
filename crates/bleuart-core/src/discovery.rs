//! Discovery arbitration
//!
//! When two devices both advertise and scan they see each other at roughly the
//! same time. The [`DiscoveryArbiter`] records every sighting once and decides
//! which side connects: the side whose local identity is numerically greater
//! than the advertised one initiates, the other waits. With distinct identities
//! exactly one side of every pair acts.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::types::{DeviceAddress, PeerIdentity};

// ----------------------------------------------------------------------------
// Discovered Peer
// ----------------------------------------------------------------------------

/// First sighting of a remote advertiser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub address: DeviceAddress,
    pub identity: PeerIdentity,
    pub first_seen: Instant,
}

/// What the arbiter decided about a sighting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Local identity is greater; this side connects out
    Initiate,
    /// Remote identity is greater; the remote connects to us
    Defer,
    /// Remote advertises our own identity. Neither side connects and no re-roll
    /// happens; this is an unresolved condition.
    Collision,
    /// Address or identity already recorded in this discovery session
    Duplicate,
}

// ----------------------------------------------------------------------------
// Arbiter
// ----------------------------------------------------------------------------

/// Deduplicates sightings and applies the identity tie-break
#[derive(Debug)]
pub struct DiscoveryArbiter {
    local: PeerIdentity,
    by_address: HashMap<DeviceAddress, DiscoveredPeer>,
    identities: HashSet<PeerIdentity>,
}

impl DiscoveryArbiter {
    pub fn new(local: PeerIdentity) -> Self {
        Self {
            local,
            by_address: HashMap::new(),
            identities: HashSet::new(),
        }
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.local
    }

    /// Record a sighting and decide who connects
    pub fn observe(
        &mut self,
        address: DeviceAddress,
        identity: PeerIdentity,
        now: Instant,
    ) -> Verdict {
        if self.by_address.contains_key(&address) || self.identities.contains(&identity) {
            return Verdict::Duplicate;
        }

        self.by_address.insert(
            address,
            DiscoveredPeer {
                address,
                identity,
                first_seen: now,
            },
        );
        self.identities.insert(identity);

        let verdict = decide(self.local, identity);
        match verdict {
            Verdict::Initiate => {
                info!("Discovered {} ({}), initiating", address, identity);
            }
            Verdict::Defer => {
                debug!("Discovered {} ({}), waiting for it to connect", address, identity);
            }
            Verdict::Collision => {
                warn!(
                    "Peer {} advertises our own identity {}, not connecting",
                    address, identity
                );
            }
            Verdict::Duplicate => {}
        }
        verdict
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&DiscoveredPeer> {
        self.by_address.get(address)
    }

    pub fn is_known(&self, address: &DeviceAddress) -> bool {
        self.by_address.contains_key(address)
    }

    /// Drop one peer, e.g. once its link is established or lost
    pub fn forget(&mut self, address: &DeviceAddress) -> Option<DiscoveredPeer> {
        let peer = self.by_address.remove(address)?;
        self.identities.remove(&peer.identity);
        Some(peer)
    }

    /// Start a fresh discovery session
    pub fn reset(&mut self) {
        self.by_address.clear();
        self.identities.clear();
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Tie-break rule: the numerically greater identity connects out
pub fn decide(local: PeerIdentity, remote: PeerIdentity) -> Verdict {
    use core::cmp::Ordering;

    match local.cmp(&remote) {
        Ordering::Greater => Verdict::Initiate,
        Ordering::Less => Verdict::Defer,
        Ordering::Equal => Verdict::Collision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> DeviceAddress {
        DeviceAddress::new([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_tie_break_is_one_sided() {
        let five = PeerIdentity::new(5);
        let nine = PeerIdentity::new(9);
        assert_eq!(decide(nine, five), Verdict::Initiate);
        assert_eq!(decide(five, nine), Verdict::Defer);
    }

    #[test]
    fn test_collision_never_initiates() {
        let mut arbiter = DiscoveryArbiter::new(PeerIdentity::new(7));
        let verdict = arbiter.observe(addr(1), PeerIdentity::new(7), Instant::now());
        assert_eq!(verdict, Verdict::Collision);
    }

    #[test]
    fn test_duplicates_by_address_and_identity() {
        let now = Instant::now();
        let mut arbiter = DiscoveryArbiter::new(PeerIdentity::new(100));
        assert_eq!(arbiter.observe(addr(1), PeerIdentity::new(42), now), Verdict::Initiate);
        assert_eq!(arbiter.observe(addr(1), PeerIdentity::new(43), now), Verdict::Duplicate);
        // Same identity seen through a different (e.g. rotated) address
        assert_eq!(arbiter.observe(addr(2), PeerIdentity::new(42), now), Verdict::Duplicate);
        assert_eq!(arbiter.len(), 1);
    }

    #[test]
    fn test_records_are_not_mutated() {
        let first = Instant::now();
        let mut arbiter = DiscoveryArbiter::new(PeerIdentity::new(100));
        arbiter.observe(addr(1), PeerIdentity::new(42), first);
        arbiter.observe(addr(1), PeerIdentity::new(42), Instant::now());

        let peer = arbiter.get(&addr(1)).unwrap();
        assert_eq!(peer.first_seen, first);
        assert_eq!(peer.identity, PeerIdentity::new(42));
    }

    #[test]
    fn test_forget_and_reset_allow_rediscovery() {
        let now = Instant::now();
        let mut arbiter = DiscoveryArbiter::new(PeerIdentity::new(100));
        arbiter.observe(addr(1), PeerIdentity::new(42), now);
        arbiter.observe(addr(2), PeerIdentity::new(43), now);

        assert!(arbiter.forget(&addr(1)).is_some());
        assert_eq!(arbiter.observe(addr(1), PeerIdentity::new(42), now), Verdict::Initiate);

        arbiter.reset();
        assert!(arbiter.is_empty());
        assert_eq!(arbiter.observe(addr(2), PeerIdentity::new(43), now), Verdict::Initiate);
    }
}
