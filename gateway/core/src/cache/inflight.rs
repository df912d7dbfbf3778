//! In-Flight Reservations
//!
//! At most one computation per fingerprint. The first caller to reserve a
//! fingerprint receives a [`Ticket`] and computes; everyone else receives a
//! [`Waiter`] subscribed to the ticket's completion signal.
//!
//! ```text
//! reserve(fp) ──► vacant?  ── yes ──► Ticket  ──► complete(outcome)
//!                   │                              │
//!                   no                             ▼
//!                   └──────────► Waiter ◄── watch broadcast
//! ```
//!
//! A ticket dropped without completing publishes `Abandoned`, so waiters are
//! never left hanging and the reservation is always released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::request::{Fingerprint, PlanningResult};

/// Outcome broadcast to every caller sharing a computation
pub type SharedOutcome = Result<PlanningResult, GatewayError>;

type Signal = watch::Receiver<Option<SharedOutcome>>;

struct Slot {
    /// Distinguishes this reservation from a later one for the same key
    id: u64,
    signal: Signal,
}

/// Table of fingerprints currently being computed
#[derive(Default)]
pub struct InFlightTable {
    slots: Arc<DashMap<Fingerprint, Slot>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InFlightTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightTable")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl InFlightTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim a fingerprint or join the existing claim
    pub fn reserve(&self, fingerprint: &Fingerprint) -> Reservation {
        match self.slots.entry(fingerprint.clone()) {
            Entry::Occupied(slot) => Reservation::InFlight(Waiter {
                fingerprint: fingerprint.clone(),
                signal: slot.get().signal.clone(),
            }),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, signal) = watch::channel(None);
                vacant.insert(Slot { id, signal });
                Reservation::Acquired(Ticket {
                    fingerprint: fingerprint.clone(),
                    id,
                    sender,
                    slots: Arc::clone(&self.slots),
                    completed: false,
                })
            }
        }
    }

    /// Whether a fingerprint is currently being computed
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.slots.contains_key(fingerprint)
    }

    /// Number of fingerprints currently being computed
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Result of [`InFlightTable::reserve`]
#[derive(Debug)]
pub enum Reservation {
    /// Caller is the sole computer for this fingerprint
    Acquired(Ticket),
    /// Another caller is computing; wait for its outcome
    InFlight(Waiter),
}

/// Exclusive right to compute one fingerprint
pub struct Ticket {
    fingerprint: Fingerprint,
    id: u64,
    sender: watch::Sender<Option<SharedOutcome>>,
    slots: Arc<DashMap<Fingerprint, Slot>>,
    completed: bool,
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("fingerprint", &self.fingerprint.short())
            .field("id", &self.id)
            .finish()
    }
}

impl Ticket {
    /// Fingerprint this ticket reserves
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Publish the outcome to all waiters and release the reservation
    pub fn complete(mut self, outcome: SharedOutcome) {
        self.publish(outcome);
    }

    fn publish(&mut self, outcome: SharedOutcome) {
        self.completed = true;
        // Release before publishing so nobody can join a finished computation.
        // Only remove our own slot, never a newer reservation.
        self.slots
            .remove_if(&self.fingerprint, |_, slot| slot.id == self.id);
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                fingerprint = %self.fingerprint.short(),
                "Reservation dropped without an outcome"
            );
            let abandoned = GatewayError::Abandoned(self.fingerprint.to_string());
            self.publish(Err(abandoned));
        }
    }
}

/// Subscription to another caller's computation
#[derive(Debug)]
pub struct Waiter {
    fingerprint: Fingerprint,
    signal: Signal,
}

impl Waiter {
    /// Fingerprint being waited on
    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Wait for the computing caller to publish its outcome
    pub async fn wait(mut self) -> SharedOutcome {
        let outcome = match self.signal.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(GatewayError::Abandoned(self.fingerprint.to_string())))
    }
}
