//! Correlation table - the promise table between inbound calls and their
//! out-of-band responses.
//!
//! Flow:
//! 1. Request handler mints a [`CorrelationId`] and inserts the call's [`ResponseHandle`]
//! 2. Timeout scheduler arms a deadline for the same ID
//! 3. Whichever of the response dispatcher / timeout scheduler calls
//!    [`CorrelationTable::remove_if_present`] first owns the handle and resolves it;
//!    the other observes absence and does nothing.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::CallStatus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::debug;

/// Outcome delivered to the caller waiting on a pending call
pub type CallOutcome = Result<String, CallStatus>;

/// Single-use handle to an in-flight call's response channel.
///
/// `complete` and `fail` consume the handle, so a call can be resolved at most once.
#[derive(Debug)]
pub struct ResponseHandle {
    sender: oneshot::Sender<CallOutcome>,
}

impl ResponseHandle {
    /// Create a handle and the receiver the RPC layer waits on
    pub fn channel() -> (Self, oneshot::Receiver<CallOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    /// Complete the call with a response payload.
    ///
    /// Returns false if the caller has already gone away.
    pub fn complete(self, payload: String) -> bool {
        self.sender.send(Ok(payload)).is_ok()
    }

    /// Fail the call with the given status.
    ///
    /// Returns false if the caller has already gone away.
    pub fn fail(self, status: CallStatus) -> bool {
        self.sender.send(Err(status)).is_ok()
    }

    /// Whether the waiting side has been dropped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Insert was attempted with an ID that is already pending.
///
/// Carries the rejected handle back so the caller can still resolve it.
#[derive(Debug, thiserror::Error)]
#[error("correlation id {id} is already pending")]
pub struct DuplicateCorrelationId {
    pub id: CorrelationId,
    pub handle: ResponseHandle,
}

/// A call that has been accepted but neither completed nor timed out
#[derive(Debug)]
struct PendingCall {
    handle: ResponseHandle,
    accepted_at: Instant,
}

/// Counters for the correlation table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total calls registered
    pub total_registered: AtomicU64,
    /// Total calls completed with a response
    pub total_completed: AtomicU64,
    /// Total calls failed by their deadline
    pub total_timeouts: AtomicU64,
    /// Total calls resolved after the caller had already disconnected
    pub total_abandoned: AtomicU64,
}

impl PendingStats {
    pub fn registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.total_completed.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.total_timeouts.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.total_abandoned.load(Ordering::Relaxed)
    }

    pub(crate) fn record_completed(&self, delivered: bool) {
        self.total_completed.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.total_abandoned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_timeout(&self, delivered: bool) {
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.total_abandoned.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Concurrency-safe map from correlation ID to pending response handle.
///
/// Only `insert` and `remove_if_present` mutate the table. Each is a single
/// shard-locked map operation, so racing removals of the same ID observe the
/// handle exactly once.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: DashMap<CorrelationId, PendingCall>,
    stats: PendingStats,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call.
    pub fn insert(
        &self,
        id: CorrelationId,
        handle: ResponseHandle,
    ) -> Result<(), DuplicateCorrelationId> {
        match self.pending.entry(id) {
            Entry::Occupied(_) => Err(DuplicateCorrelationId { id, handle }),
            Entry::Vacant(slot) => {
                slot.insert(PendingCall {
                    handle,
                    accepted_at: Instant::now(),
                });
                self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %id, "Registered pending call");
                Ok(())
            }
        }
    }

    /// Atomically remove and return the handle for `id`, if still pending.
    pub fn remove_if_present(&self, id: &CorrelationId) -> Option<ResponseHandle> {
        self.remove_with_age(id).map(|(handle, _)| handle)
    }

    /// Like [`remove_if_present`](Self::remove_if_present), also reporting how
    /// long the call was pending.
    pub fn remove_with_age(&self, id: &CorrelationId) -> Option<(ResponseHandle, Duration)> {
        self.pending
            .remove(id)
            .map(|(_, call)| (call.handle, call.accepted_at.elapsed()))
    }

    /// Number of currently pending calls.
    ///
    /// Read-only observability. The value may be stale by the time it is read;
    /// call handling only ever goes through `insert` and `remove_if_present`.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check if a correlation ID is pending.
    ///
    /// Read-only observability, like [`len`](Self::len). A `true` answer does
    /// not reserve the entry; only `remove_if_present` decides who resolves it.
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}
