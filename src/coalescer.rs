use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::entry::Payload;
use crate::error::FetchError;

/// Outcome shared by every caller coalesced on one identifier: the same
/// payload `Arc` on success, or a structurally equal error on failure.
pub type Outcome = Result<Payload, FetchError>;

/// An in-flight operation slot. Exactly one exists per identifier between the
/// first acquire and its settlement.
struct PendingOperation {
    tx: broadcast::Sender<Outcome>,
    subscribers: usize,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingOperation>>>;

/// Process-wide registry ensuring at most one pending operation per resource
/// identifier.
///
/// The first caller for an identifier becomes the *owner* and receives a
/// [`SettlePermit`] it must eventually settle; callers arriving before
/// settlement become *joiners* and observe the owner's outcome. The registry
/// slot is removed the instant the operation settles.
pub struct RequestCoalescer {
    pending: PendingMap,
}

/// Result of [`RequestCoalescer::acquire_or_join`].
pub enum Acquired {
    /// This caller is responsible for running the producer and settling.
    Owner {
        permit: SettlePermit,
        outcome: OutcomeReceiver,
    },
    /// Another caller owns the operation; await its outcome.
    Joiner { outcome: OutcomeReceiver },
}

impl Acquired {
    /// Whether this caller is the owner.
    pub fn is_owner(&self) -> bool {
        matches!(self, Acquired::Owner { .. })
    }
}

/// Receiver for a coalesced operation's settled outcome.
pub struct OutcomeReceiver {
    rx: broadcast::Receiver<Outcome>,
    identifier: String,
}

impl OutcomeReceiver {
    /// Wait for the operation to settle.
    pub async fn recv(mut self) -> Outcome {
        match self.rx.recv().await {
            Ok(outcome) => outcome,
            // The channel can only close if the slot was dropped without a
            // send, which the permit's Drop impl prevents; map it to a
            // network failure rather than panic.
            Err(_) => Err(FetchError::network(
                &self.identifier,
                "coalesced operation dropped before settling",
            )),
        }
    }
}

/// The owner's obligation to settle its operation exactly once.
///
/// Dropping an unsettled permit settles the slot with a network error so
/// joined waiters are never left dangling.
pub struct SettlePermit {
    identifier: String,
    pending: PendingMap,
    settled: bool,
}

impl SettlePermit {
    /// Deliver the outcome to every joined waiter and remove the slot.
    pub fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        settle_slot(&self.pending, &self.identifier, outcome);
    }
}

impl Drop for SettlePermit {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                identifier = %self.identifier,
                "owner dropped without settling; failing joined waiters"
            );
            settle_slot(
                &self.pending,
                &self.identifier,
                Err(FetchError::network(
                    &self.identifier,
                    "owner dropped before settling",
                )),
            );
        }
    }
}

fn settle_slot(pending: &PendingMap, identifier: &str, outcome: Outcome) {
    let operation = pending.lock().unwrap().remove(identifier);
    if let Some(operation) = operation {
        // A send error just means every waiter has already gone away
        let _ = operation.tx.send(outcome);
    }
}

impl RequestCoalescer {
    /// Create a new, empty coalescer.
    pub fn new() -> Self {
        RequestCoalescer {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire exclusive execution rights for `identifier`, or join the
    /// operation already pending for it.
    pub fn acquire_or_join(&self, identifier: &str) -> Acquired {
        let mut pending = self.pending.lock().unwrap();

        if let Some(operation) = pending.get_mut(identifier) {
            operation.subscribers += 1;
            return Acquired::Joiner {
                outcome: OutcomeReceiver {
                    rx: operation.tx.subscribe(),
                    identifier: identifier.to_string(),
                },
            };
        }

        let (tx, rx) = broadcast::channel(1);
        pending.insert(
            identifier.to_string(),
            PendingOperation { tx, subscribers: 1 },
        );

        Acquired::Owner {
            permit: SettlePermit {
                identifier: identifier.to_string(),
                pending: Arc::clone(&self.pending),
                settled: false,
            },
            outcome: OutcomeReceiver {
                rx,
                identifier: identifier.to_string(),
            },
        }
    }

    /// Number of identifiers with a pending operation.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Number of callers waiting on `identifier` (0 if nothing is pending).
    pub fn subscriber_count(&self, identifier: &str) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(identifier)
            .map(|operation| operation.subscribers)
            .unwrap_or(0)
    }
}

impl Default for RequestCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
