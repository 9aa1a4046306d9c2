//! Deadline scheduler for pending calls.
//!
//! One background task owns a min-heap of deadlines instead of one timer per
//! call. `arm` only enqueues, so it never blocks a request. When a deadline
//! passes, the task removes the call from the [`CorrelationTable`]; if it was
//! still pending the call fails with `DeadlineExceeded`, otherwise the firing
//! is a no-op. There is no cancellation: a completed call simply leaves a
//! deadline that finds nothing to remove.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::CallStatus;
use crate::domain::pending::CorrelationTable;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A deadline entry in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    at: Instant,
    id: CorrelationId,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first)
        other.at.cmp(&self.at).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of deadlines
#[derive(Debug, Default)]
struct DeadlineHeap {
    heap: BinaryHeap<Deadline>,
}

impl DeadlineHeap {
    fn push(&mut self, deadline: Deadline) {
        self.heap.push(deadline);
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|d| d.at)
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Pop every entry whose deadline is at or before `now`.
    fn pop_expired(&mut self, now: Instant) -> Vec<CorrelationId> {
        let mut expired = Vec::new();
        while let Some(deadline) = self.heap.peek() {
            if deadline.at > now {
                break;
            }
            expired.push(deadline.id);
            self.heap.pop();
        }
        expired
    }
}

/// Handle used by the request path to arm deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutScheduler {
    sender: mpsc::UnboundedSender<Deadline>,
    timeout: Duration,
}

impl TimeoutScheduler {
    /// Create a scheduler and the task that enforces its deadlines.
    ///
    /// Deadlines armed before the task is spawned are buffered, and their
    /// timeout is still measured from the moment `arm` was called.
    pub fn new(table: Arc<CorrelationTable>, timeout: Duration) -> (Self, DeadlineTask) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self { sender, timeout },
            DeadlineTask {
                table,
                receiver,
                heap: DeadlineHeap::default(),
            },
        )
    }

    /// Schedule a deadline check for `id`, `timeout` from now.
    pub fn arm(&self, id: CorrelationId) {
        let deadline = Deadline {
            at: Instant::now() + self.timeout,
            id,
        };
        if self.sender.send(deadline).is_err() {
            warn!(correlation_id = %id, "Deadline task is gone; call will not time out");
        }
    }

    /// The configured per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Background task that fires armed deadlines.
///
/// Runs until every [`TimeoutScheduler`] handle is dropped and all deadlines
/// already armed have fired.
pub struct DeadlineTask {
    table: Arc<CorrelationTable>,
    receiver: mpsc::UnboundedReceiver<Deadline>,
    heap: DeadlineHeap,
}

impl DeadlineTask {
    pub async fn run(mut self) {
        let mut accepting = true;

        loop {
            if !accepting && self.heap.is_empty() {
                break;
            }

            let next = self.heap.next_deadline();
            let sleep = async {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                armed = self.receiver.recv(), if accepting => match armed {
                    Some(deadline) => self.heap.push(deadline),
                    None => accepting = false,
                },
                _ = sleep => {
                    for id in self.heap.pop_expired(Instant::now()) {
                        expire(&self.table, id);
                    }
                }
            }
        }

        debug!("Deadline task finished");
    }
}

/// Fail the call for `id` if it is still pending.
fn expire(table: &CorrelationTable, id: CorrelationId) {
    let Some((handle, elapsed)) = table.remove_with_age(&id) else {
        return;
    };
    // Counted before the caller can observe the failure
    table.stats().record_timeout(!handle.is_closed());
    let delivered = handle.fail(CallStatus::DeadlineExceeded);
    warn!(
        correlation_id = %id,
        elapsed_ms = elapsed.as_millis() as u64,
        delivered,
        "Pending call exceeded its deadline"
    );
}
