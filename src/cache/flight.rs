//! Per-key single-flight coordination.
//!
//! The first caller to [`InFlight::begin`] a key becomes the leader and owns
//! the in-flight token until it completes or is dropped. Everyone else gets a
//! [`FlightWaiter`] that resolves to the leader's outcome. Token creation goes
//! through a `DashMap` entry, so it is atomic per key and never held across
//! the populate call itself.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::watch;

pub struct InFlight<T> {
    slots: Arc<DashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
        }
    }
}

pub enum Flight<T> {
    Leader(FlightGuard<T>),
    Follower(FlightWaiter<T>),
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: &str) -> Flight<T> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(occupied) => Flight::Follower(FlightWaiter {
                receiver: occupied.get().clone(),
            }),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver);
                Flight::Leader(FlightGuard {
                    key: key.to_string(),
                    slots: Arc::clone(&self.slots),
                    sender,
                    retired: false,
                })
            }
        }
    }

    /// Number of keys with a running leader.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// The in-flight token. Dropping it without [`FlightGuard::complete`]
/// releases waiters empty-handed so one of them can take over.
pub struct FlightGuard<T> {
    key: String,
    slots: Arc<DashMap<String, watch::Receiver<Option<T>>>>,
    sender: watch::Sender<Option<T>>,
    retired: bool,
}

impl<T> FlightGuard<T> {
    /// Publish the outcome to every waiter and retire the token.
    pub fn complete(mut self, outcome: T) {
        // Retire first: callers arriving after this point must start a new
        // flight rather than observe a finished one.
        self.retire();
        self.sender.send_replace(Some(outcome));
    }

    fn retire(&mut self) {
        if !self.retired {
            self.slots.remove(&self.key);
            self.retired = true;
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        self.retire();
    }
}

pub struct FlightWaiter<T> {
    receiver: watch::Receiver<Option<T>>,
}

impl<T: Clone> FlightWaiter<T> {
    /// Wait for the leader. `None` means the leader went away without an
    /// outcome.
    pub async fn wait(mut self) -> Option<T> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }
}
