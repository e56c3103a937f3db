//! Single-flight FIFO dispatcher
//!
//! GATT allows one outstanding write or notification per connection. The
//! [`TransferQueue`] keeps a FIFO per remote endpoint and hands back at most one
//! transfer to dispatch at a time; the next one is released only when the
//! transport reports the in-flight transfer complete. Endpoints are independent
//! of one another.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Pending Transfer
// ----------------------------------------------------------------------------

/// An outbound payload bound to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer<K> {
    pub target: K,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct LinkQueue {
    waiting: VecDeque<Vec<u8>>,
    in_flight: Option<usize>,
}

impl LinkQueue {
    fn new() -> Self {
        Self {
            waiting: VecDeque::new(),
            in_flight: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Transfer Queue
// ----------------------------------------------------------------------------

/// Per-connection FIFO with one dispatched transfer at a time
#[derive(Debug)]
pub struct TransferQueue<K> {
    links: HashMap<K, LinkQueue>,
}

impl<K> Default for TransferQueue<K> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + core::fmt::Display> TransferQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `payload` for `target`
    ///
    /// Returns the transfer to dispatch right away when the connection was idle.
    /// An empty payload is ignored.
    pub fn enqueue(&mut self, target: K, payload: Vec<u8>) -> Option<PendingTransfer<K>> {
        if payload.is_empty() {
            return None;
        }

        let link = self.links.entry(target).or_insert_with(LinkQueue::new);
        if link.in_flight.is_some() {
            link.waiting.push_back(payload);
            debug!("Queued transfer for {} ({} waiting)", target, link.waiting.len());
            return None;
        }

        link.in_flight = Some(payload.len());
        Some(PendingTransfer { target, payload })
    }

    /// Retire the in-flight transfer for `target` and release the next one
    ///
    /// The head is dropped whether or not it succeeded; failed transfers are
    /// never resent. A completion for an idle or unknown connection is ignored.
    pub fn complete(&mut self, target: K, success: bool) -> Option<PendingTransfer<K>> {
        let link = self.links.get_mut(&target)?;
        let Some(len) = link.in_flight.take() else {
            warn!("Completion for {} with nothing in flight", target);
            return None;
        };

        if !success {
            warn!("Transfer of {} bytes to {} failed, dropping it", len, target);
        }

        match link.waiting.pop_front() {
            Some(payload) => {
                link.in_flight = Some(payload.len());
                Some(PendingTransfer { target, payload })
            }
            None => {
                self.links.remove(&target);
                None
            }
        }
    }

    /// Size of the in-flight transfer for `target`, if any
    pub fn in_flight_len(&self, target: K) -> Option<usize> {
        self.links.get(&target).and_then(|link| link.in_flight)
    }

    pub fn is_in_flight(&self, target: K) -> bool {
        self.in_flight_len(target).is_some()
    }

    /// Transfers waiting behind the in-flight one
    pub fn pending(&self, target: K) -> usize {
        self.links.get(&target).map_or(0, |link| link.waiting.len())
    }

    /// Forget everything queued for a removed connection
    pub fn clear(&mut self, target: K) -> usize {
        match self.links.remove(&target) {
            Some(link) => {
                let dropped = link.waiting.len();
                if dropped > 0 {
                    debug!("Dropped {} queued transfers for {}", dropped, target);
                }
                dropped
            }
            None => 0,
        }
    }

    pub fn clear_all(&mut self) {
        self.links.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.links.is_empty()
    }
}
