//! Per-key deduplication of concurrent computations
//!
//! The first caller to [`Flights::join`] a key becomes its leader and holds a
//! [`Leader`] guard while it computes. Later callers block until the guard is
//! dropped and then retry their lookup. Dropping the guard (normal return,
//! error or unwind) always releases the waiters.
//!
//! A computation that re-enters the cache for its own key deadlocks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Flight {
    done: Mutex<bool>,
    finished: Condvar,
}

impl Flight {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }
}

/// Outcome of joining a key's flight
pub(crate) enum Role<'a> {
    /// Caller must compute; waiters are released when the guard drops
    Leader(Leader<'a>),
    /// Another caller's computation finished while this one waited
    Waited,
}

/// In-flight computations by key
#[derive(Default)]
pub(crate) struct Flights {
    active: Mutex<HashMap<String, Arc<Flight>, ahash::RandomState>>,
}

impl Flights {
    /// Lead the flight for `key`, or wait for the current leader to finish
    pub(crate) fn join(&self, key: &str) -> Role<'_> {
        let mut active = self.active.lock();
        if let Some(flight) = active.get(key).cloned() {
            drop(active);
            flight.wait();
            return Role::Waited;
        }

        let flight = Arc::new(Flight::default());
        active.insert(key.to_string(), Arc::clone(&flight));
        Role::Leader(Leader {
            flights: self,
            key: key.to_string(),
            flight,
        })
    }

    /// Keys currently being computed
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.active.lock().len()
    }
}

/// Held by the caller computing a key
pub(crate) struct Leader<'a> {
    flights: &'a Flights,
    key: String,
    flight: Arc<Flight>,
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        self.flights.active.lock().remove(&self.key);
        self.flight.finish();
    }
}
