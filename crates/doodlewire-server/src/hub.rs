//! Shared canvas state and fan-out.
//!
//! The identity allocator, the drawing log and the connection registry live
//! behind one mutex. Every operation mutates them and queues its broadcast
//! while holding that lock, so each connection receives frames in exactly the
//! order the server processed the underlying events. Queuing never waits: a
//! connection whose queue is full or closed is evicted instead.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use doodlewire_core::{
    DrawCommand, DrawingLog, Identity, IdentityAllocator, ServerMessage, StrokeSegment, UserId,
};
use tracing::{debug, info, warn};

use crate::registry::{ConnectionRegistry, DeliveryFailure, Frame, Outbox};

struct Shared {
    allocator: IdentityAllocator,
    log: DrawingLog,
    registry: ConnectionRegistry,
}

/// Coordinator shared by every session.
pub struct Hub {
    shared: Mutex<Shared>,
    outbound_capacity: usize,
}

impl Hub {
    /// Create a hub whose sessions buffer up to `outbound_capacity` frames.
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                allocator: IdentityAllocator::new(),
                log: DrawingLog::new(),
                registry: ConnectionRegistry::new(),
            }),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Every mutation is a single step, so state behind a poisoned lock is
    /// still consistent.
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a new connection.
    ///
    /// Issues an identity, registers `outbox`, queues `user_connected` with
    /// the full drawing on it, then announces the new count to everyone.
    pub fn join(&self, outbox: Outbox) -> Identity {
        let mut shared = self.lock();
        let Shared {
            allocator,
            log,
            registry,
        } = &mut *shared;

        let identity = allocator.allocate_unless(|id| registry.contains(id));
        let welcome = ServerMessage::UserConnected {
            user_id: identity.id.clone(),
            user_color: identity.color.clone(),
            drawing_data: log.snapshot(),
        };

        registry.add(identity.clone(), outbox.clone());
        if let Some(frame) = encode(&welcome) {
            if let Err(err) = outbox.try_send(frame) {
                shared.evict(vec![(identity.id.clone(), DeliveryFailure::from(err))]);
                return identity;
            }
        }

        info!(user_id = %identity.id, count = shared.registry.count(), "User connected");
        shared.announce_count();
        identity
    }

    /// Remove a connection and announce the new count. Returns `false` if it
    /// was already gone.
    pub fn leave(&self, id: &UserId) -> bool {
        let mut shared = self.lock();
        if shared.registry.remove(id).is_none() {
            return false;
        }
        info!(user_id = %id, count = shared.registry.count(), "User disconnected");
        shared.announce_count();
        true
    }

    /// Attribute, record and relay a stroke segment. Returns the stored
    /// segment, or `None` if `author` is no longer connected.
    pub fn draw(&self, author: &Identity, command: DrawCommand) -> Option<StrokeSegment> {
        let mut shared = self.lock();
        if !shared.registry.contains(&author.id) {
            return None;
        }

        let segment = StrokeSegment::stamp(command, author, now_millis());
        let stored = shared.log.append(segment).clone();
        shared.broadcast(&ServerMessage::Draw(stored.clone()), Some(&author.id));
        Some(stored)
    }

    /// Empty the drawing log and tell everyone but `from`.
    pub fn clear(&self, from: &UserId) -> bool {
        let mut shared = self.lock();
        if !shared.registry.contains(from) {
            return false;
        }

        shared.log.clear();
        info!(user_id = %from, "Canvas cleared");
        shared.broadcast(&ServerMessage::Clear, Some(from));
        true
    }

    /// Relay a pointer position to everyone but `author`. Not logged.
    ///
    /// Coordinates are relayed at their parsed `f64` value, so an integer
    /// `42` goes back out as `42.0`.
    pub fn cursor(&self, author: &Identity, x: f64, y: f64) -> bool {
        let mut shared = self.lock();
        if !shared.registry.contains(&author.id) {
            return false;
        }

        let message = ServerMessage::Cursor {
            user_id: author.id.clone(),
            user_color: author.color.clone(),
            x,
            y,
        };
        shared.broadcast(&message, Some(&author.id));
        true
    }

    /// Send `message` to every live connection except `sender`.
    pub fn broadcast_except(&self, message: &ServerMessage, sender: &UserId) {
        self.lock().broadcast(message, Some(sender));
    }

    /// Send `message` to every live connection.
    pub fn broadcast_all(&self, message: &ServerMessage) {
        self.lock().broadcast(message, None);
    }

    pub fn user_count(&self) -> usize {
        self.lock().registry.count()
    }

    pub fn stroke_count(&self) -> usize {
        self.lock().log.len()
    }

    /// The drawing log as a new client would receive it.
    pub fn snapshot(&self) -> Vec<StrokeSegment> {
        self.lock().log.snapshot()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_OUTBOUND_BUFFER)
    }
}

impl Shared {
    fn broadcast(&mut self, message: &ServerMessage, excluding: Option<&UserId>) {
        if let Some(frame) = encode(message) {
            let failed = self.registry.deliver(&frame, excluding);
            self.evict(failed);
        }
    }

    fn announce_count(&mut self) {
        let count = self.registry.count();
        self.broadcast(&ServerMessage::UserCount { count }, None);
    }

    /// Drop connections that could not take a frame. Evictions change the
    /// count, which is announced in turn; repeat until a round evicts nobody.
    fn evict(&mut self, mut failed: Vec<(UserId, DeliveryFailure)>) {
        while !failed.is_empty() {
            let mut evicted = false;
            for (id, failure) in failed.drain(..) {
                if self.registry.remove(&id).is_none() {
                    continue;
                }
                evicted = true;
                match failure {
                    DeliveryFailure::Lagging => {
                        warn!(user_id = %id, "Dropping connection that is not keeping up")
                    }
                    DeliveryFailure::Gone => debug!(user_id = %id, "Dropping closed connection"),
                }
            }
            if !evicted {
                break;
            }

            let count = self.registry.count();
            info!(count, "Connections evicted");
            if let Some(frame) = encode(&ServerMessage::UserCount { count }) {
                failed = self.registry.deliver(&frame, None);
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Frame> {
    match message.encode() {
        Ok(text) => Some(Frame::from(text)),
        Err(err) => {
            warn!(error = %err, "Failed to encode server message");
            None
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tokio::sync::mpsc;

    fn connect(hub: &Hub) -> (Identity, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(hub.outbound_capacity());
        (hub.join(tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(ServerMessage::decode(frame.as_str()).unwrap());
        }
        messages
    }

    fn strokes(messages: Vec<ServerMessage>) -> Vec<StrokeSegment> {
        messages
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::Draw(segment) => Some(segment),
                _ => None,
            })
            .collect()
    }

    fn line(x: f64) -> DrawCommand {
        DrawCommand {
            from_x: x,
            from_y: 0.0,
            to_x: x + 10.0,
            to_y: 10.0,
            color: "#000".to_string(),
            size: 5.0,
        }
    }

    #[test]
    fn test_join_sends_welcome_then_count() {
        let hub = Hub::default();
        let (alice, mut alice_rx) = connect(&hub);

        let messages = drain(&mut alice_rx);
        assert_eq!(
            messages,
            vec![
                ServerMessage::UserConnected {
                    user_id: alice.id.clone(),
                    user_color: alice.color.clone(),
                    drawing_data: Vec::new(),
                },
                ServerMessage::UserCount { count: 1 },
            ]
        );
    }

    #[test]
    fn test_second_join_announced_to_all() {
        let hub = Hub::default();
        let (_alice, mut alice_rx) = connect(&hub);
        drain(&mut alice_rx);

        let (bob, mut bob_rx) = connect(&hub);
        assert_eq!(drain(&mut alice_rx), vec![ServerMessage::UserCount { count: 2 }]);

        let bob_messages = drain(&mut bob_rx);
        assert!(matches!(
            &bob_messages[0],
            ServerMessage::UserConnected { user_id, drawing_data, .. }
                if *user_id == bob.id && drawing_data.is_empty()
        ));
        assert_eq!(bob_messages[1], ServerMessage::UserCount { count: 2 });
        assert_eq!(hub.user_count(), 2);
    }

    #[test]
    fn test_draw_is_not_echoed_to_sender() {
        let hub = Hub::default();
        let (alice, mut alice_rx) = connect(&hub);
        let (_bob, mut bob_rx) = connect(&hub);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let stored = hub.draw(&alice, line(0.0)).unwrap();
        assert_eq!(stored.user_id, alice.id);
        assert_eq!(stored.user_color, alice.color);
        assert!(stored.timestamp > 0);

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![ServerMessage::Draw(stored)]);
    }

    #[test]
    fn test_late_joiner_receives_log_in_order() {
        let hub = Hub::default();
        let (alice, _alice_rx) = connect(&hub);
        let (bob, _bob_rx) = connect(&hub);

        hub.draw(&alice, line(0.0));
        hub.draw(&bob, line(1.0));
        hub.draw(&alice, line(2.0));
        let expected = hub.snapshot();
        assert_eq!(expected.len(), 3);

        let (_carol, mut carol_rx) = connect(&hub);
        match &drain(&mut carol_rx)[0] {
            ServerMessage::UserConnected { drawing_data, .. } => {
                assert_eq!(drawing_data, &expected);
                let xs: Vec<f64> = drawing_data.iter().map(|s| s.from_x).collect();
                assert_eq!(xs, vec![0.0, 1.0, 2.0]);
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_clear_empties_log_and_notifies_others() {
        let hub = Hub::default();
        let (alice, mut alice_rx) = connect(&hub);
        let (bob, mut bob_rx) = connect(&hub);
        hub.draw(&alice, line(0.0));
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        assert!(hub.clear(&bob.id));
        assert!(hub.snapshot().is_empty());
        assert_eq!(drain(&mut alice_rx), vec![ServerMessage::Clear]);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_cursor_is_relayed_not_logged() {
        let hub = Hub::default();
        let (alice, _alice_rx) = connect(&hub);
        let (_bob, mut bob_rx) = connect(&hub);
        drain(&mut bob_rx);

        assert!(hub.cursor(&alice, 12.5, 99.0));
        assert_eq!(hub.stroke_count(), 0);
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::Cursor {
                user_id: alice.id.clone(),
                user_color: alice.color.clone(),
                x: 12.5,
                y: 99.0,
            }]
        );
    }

    #[test]
    fn test_leave_is_idempotent() {
        let hub = Hub::default();
        let (alice, _alice_rx) = connect(&hub);
        let (_bob, mut bob_rx) = connect(&hub);
        drain(&mut bob_rx);

        assert!(hub.leave(&alice.id));
        assert!(!hub.leave(&alice.id));
        assert_eq!(drain(&mut bob_rx), vec![ServerMessage::UserCount { count: 1 }]);
    }

    #[test]
    fn test_closed_connection_is_evicted() {
        let hub = Hub::default();
        let (alice, _alice_rx) = connect(&hub);
        let (_bob, bob_rx) = connect(&hub);
        let (_carol, mut carol_rx) = connect(&hub);
        drop(bob_rx);
        drain(&mut carol_rx);

        hub.draw(&alice, line(0.0));

        assert_eq!(hub.user_count(), 2);
        let messages = drain(&mut carol_rx);
        assert!(matches!(messages[0], ServerMessage::Draw(_)));
        assert_eq!(messages[1], ServerMessage::UserCount { count: 2 });
    }

    #[test]
    fn test_lagging_connection_is_evicted() {
        let hub = Hub::new(4);
        let (alice, mut alice_rx) = connect(&hub);
        let (slow, mut slow_rx) = connect(&hub);
        drain(&mut alice_rx);

        // welcome + count already queued for the slow client
        for i in 0..2 {
            hub.cursor(&alice, i as f64, 0.0);
        }
        assert_eq!(hub.user_count(), 2);
        hub.cursor(&alice, 2.0, 0.0);

        assert_eq!(hub.user_count(), 1);
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerMessage::UserCount { count: 1 }]
        );

        // the evicted client still gets what was queued, then the queue closes
        assert_eq!(drain(&mut slow_rx).len(), 4);
        assert!(slow_rx.try_recv().is_err());
        assert!(hub.draw(&slow, line(0.0)).is_none());
        assert!(!hub.clear(&slow.id));
        assert!(hub.snapshot().is_empty());
    }

    #[test]
    fn test_broadcast_helpers() {
        let hub = Hub::default();
        let (alice, mut alice_rx) = connect(&hub);
        let (_bob, mut bob_rx) = connect(&hub);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.broadcast_except(&ServerMessage::Clear, &alice.id);
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec![ServerMessage::Clear]);

        hub.broadcast_all(&ServerMessage::UserCount { count: 2 });
        assert_eq!(drain(&mut alice_rx).len(), 1);
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[test]
    fn test_concurrent_draws_reach_everyone_in_log_order() {
        const DRAWERS: usize = 4;
        const STROKES: usize = 500;

        let hub = Arc::new(Hub::new(DRAWERS * STROKES * 2));
        let (_first, mut first_rx) = connect(&hub);
        let (_second, mut second_rx) = connect(&hub);

        // drawers keep their receivers alive so nobody is evicted
        let mut drawer_rxs = Vec::new();
        let handles: Vec<_> = (0..DRAWERS)
            .map(|n| {
                let (identity, rx) = connect(&hub);
                drawer_rxs.push(rx);
                let hub = Arc::clone(&hub);
                thread::spawn(move || {
                    for i in 0..STROKES {
                        hub.draw(&identity, line((n * STROKES + i) as f64));
                    }
                })
            })
            .collect();

        while hub.stroke_count() < STROKES {
            thread::yield_now();
        }
        let (_late, mut late_rx) = connect(&hub);

        for handle in handles {
            handle.join().unwrap();
        }

        let log = hub.snapshot();
        assert_eq!(log.len(), DRAWERS * STROKES);
        assert_eq!(strokes(drain(&mut first_rx)), log);
        assert_eq!(strokes(drain(&mut second_rx)), log);

        let mut late_messages = drain(&mut late_rx);
        let ServerMessage::UserConnected { drawing_data, .. } = late_messages.remove(0) else {
            panic!("Expected user_connected first");
        };
        assert!(drawing_data.len() >= STROKES);
        let mut seen = drawing_data;
        seen.extend(strokes(late_messages));
        assert_eq!(seen, log);
        assert_eq!(hub.user_count(), DRAWERS + 3);
    }
}
