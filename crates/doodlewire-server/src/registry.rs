//! The set of live connections.

use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use doodlewire_core::{Identity, UserId};
use tokio::sync::mpsc;

/// An encoded text frame, shared between all recipients of a broadcast.
pub type Frame = Utf8Bytes;

/// Bounded queue feeding one connection's socket writer.
pub type Outbox = mpsc::Sender<Frame>;

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The queue is full; the client is not keeping up.
    Lagging,
    /// The session has already gone away.
    Gone,
}

impl<T> From<mpsc::error::TrySendError<T>> for DeliveryFailure {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Lagging,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Gone,
        }
    }
}

struct Member {
    identity: Identity,
    outbox: Outbox,
}

/// Live connections keyed by user id. Each user appears at most once.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: HashMap<UserId, Member>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `false` if the id is already present.
    pub fn add(&mut self, identity: Identity, outbox: Outbox) -> bool {
        if self.members.contains_key(&identity.id) {
            return false;
        }
        self.members
            .insert(identity.id.clone(), Member { identity, outbox });
        true
    }

    /// Unregister a connection, dropping its outbox. Removing an absent id is
    /// a no-op that returns `None`.
    pub fn remove(&mut self, id: &UserId) -> Option<Identity> {
        self.members.remove(id).map(|member| member.identity)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.members.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Visit every live connection except `excluding`.
    pub fn for_each<F>(&self, excluding: Option<&UserId>, mut f: F)
    where
        F: FnMut(&Identity, &Outbox),
    {
        for member in self.members.values() {
            if Some(&member.identity.id) != excluding {
                f(&member.identity, &member.outbox);
            }
        }
    }

    /// Queue `frame` on every connection except `excluding`, collecting the
    /// ones that could not take it.
    pub fn deliver(&self, frame: &Frame, excluding: Option<&UserId>) -> Vec<(UserId, DeliveryFailure)> {
        let mut failed = Vec::new();
        self.for_each(excluding, |identity, outbox| {
            if let Err(err) = outbox.try_send(frame.clone()) {
                failed.push((identity.id.clone(), DeliveryFailure::from(err)));
            }
        });
        failed
    }
}
