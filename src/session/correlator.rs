//! Matches device MCP replies to the requests that are waiting on them.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};

/// Outstanding device requests keyed by numeric id.
///
/// Every id leaves the map exactly once: through [`resolve`](Self::resolve),
/// [`discard`](Self::discard) or [`cancel_all`](Self::cancel_all).
#[derive(Debug)]
pub struct PendingRequestCorrelator {
    pending: DashMap<u64, oneshot::Sender<Value>>,
    next_id: AtomicU64,
}

impl Default for PendingRequestCorrelator {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl PendingRequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next request id for this session.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Session`] if `id` is already outstanding.
    pub fn issue(&self, id: u64) -> Result<ResponseSlot> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(GatewayError::Session(format!(
                "request id {id} is already outstanding"
            ))),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                Ok(ResponseSlot { id, rx })
            }
        }
    }

    /// Deliver `payload` to the waiter for `id`.
    ///
    /// Returns `false` when nothing was waiting (late or duplicate reply).
    pub fn resolve(&self, id: u64, payload: Value) -> bool {
        match self.pending.remove(&id) {
            Some((_, tx)) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `id` without delivering anything.
    pub fn discard(&self, id: u64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Cancel every outstanding request. Waiters observe
    /// [`GatewayError::Cancelled`].
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.pending.remove(id).is_some())
            .count()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// The receiving half of an issued request.
#[derive(Debug)]
pub struct ResponseSlot {
    id: u64,
    rx: oneshot::Receiver<Value>,
}

impl ResponseSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Cancelled`] if the request was cancelled.
    pub async fn wait(self) -> Result<Value> {
        self.rx
            .await
            .map_err(|_| GatewayError::Cancelled(format!("device request {} cancelled", self.id)))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_payload_once() {
        let correlator = PendingRequestCorrelator::new();
        let slot = correlator.issue(7).unwrap();
        assert!(correlator.is_pending(7));

        assert!(correlator.resolve(7, json!({"result": "ok"})));
        assert!(!correlator.resolve(7, json!({"result": "again"})));
        assert_eq!(slot.wait().await.unwrap(), json!({"result": "ok"}));
        assert!(correlator.is_empty());
    }

    #[test]
    fn resolving_unissued_id_reports_no_waiter() {
        let correlator = PendingRequestCorrelator::new();
        assert!(!correlator.resolve(9, json!(null)));
    }

    #[test]
    fn duplicate_issue_is_rejected() {
        let correlator = PendingRequestCorrelator::new();
        let _slot = correlator.issue(3).unwrap();
        assert!(correlator.issue(3).is_err());
        assert_eq!(correlator.len(), 1);
    }

    #[tokio::test]
    async fn cancel_all_wakes_every_waiter() {
        let correlator = PendingRequestCorrelator::new();
        let a = correlator.issue(1).unwrap();
        let b = correlator.issue(2).unwrap();
        assert_eq!(correlator.cancel_all(), 2);
        assert_eq!(correlator.cancel_all(), 0);
        assert!(matches!(a.wait().await, Err(GatewayError::Cancelled(_))));
        assert!(matches!(b.wait().await, Err(GatewayError::Cancelled(_))));
    }

    #[test]
    fn ids_are_monotonic() {
        let correlator = PendingRequestCorrelator::new();
        let first = correlator.next_id();
        assert_eq!(correlator.next_id(), first + 1);
    }
}
