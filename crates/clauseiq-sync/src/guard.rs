//! Per-clause in-flight guard.
//!
//! At most one mutation per clause id may be outstanding. A permit is taken
//! synchronously before the remote call and released when it is dropped,
//! after the call settles. The id then stays blocked for a grace period so
//! that a duplicate dispatch arriving just after settlement is dropped too.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Default time an id stays blocked after its mutation settles.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
enum Slot {
    Pending,
    Settled { until: Instant },
}

#[derive(Debug)]
pub(crate) struct InFlight {
    grace: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl InFlight {
    pub(crate) fn new(grace: Duration) -> Self {
        Self {
            grace,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn grace(&self) -> Duration {
        self.grace
    }

    pub(crate) fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    /// Take the permit for `id`, or `None` if a mutation is in flight or
    /// within its grace period.
    pub(crate) fn try_acquire(&self, id: &str) -> Option<Permit<'_>> {
        let mut slots = self.lock();
        let now = Instant::now();
        match slots.get(id) {
            Some(Slot::Pending) => return None,
            Some(Slot::Settled { until }) if *until > now => return None,
            _ => {}
        }
        slots.retain(|_, slot| !matches!(slot, Slot::Settled { until } if *until <= now));
        slots.insert(id.to_string(), Slot::Pending);
        Some(Permit {
            guard: self,
            id: id.to_string(),
        })
    }

    pub(crate) fn is_busy(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(Slot::Pending) => true,
            Some(Slot::Settled { until }) => *until > Instant::now(),
            None => false,
        }
    }

    fn release(&self, id: &str) {
        let mut slots = self.lock();
        if self.grace.is_zero() {
            slots.remove(id);
        } else {
            slots.insert(
                id.to_string(),
                Slot::Settled {
                    until: Instant::now() + self.grace,
                },
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while a mutation for one clause id is in flight.
#[derive(Debug)]
pub(crate) struct Permit<'a> {
    guard: &'a InFlight,
    id: String,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.guard.release(&self.id);
    }
}
