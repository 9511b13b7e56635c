//! Per-connection protocol handling.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use doodlewire_core::{ClientMessage, Identity};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hub::Hub;
use crate::registry::Outbox;

enum Phase {
    Connecting,
    Active(Identity),
    Closed,
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Drawn,
    Cleared,
    CursorRelayed,
    /// Well-formed but of a type this server does not handle.
    Ignored,
    /// Unparseable or missing required fields; discarded.
    Malformed,
    /// The session is not active (not yet open, closed or evicted).
    Inactive,
}

/// Protocol state machine for one connection: `Connecting -> Active -> Closed`.
///
/// Dropping a session closes it, so membership is released on every exit
/// path, including task cancellation.
pub struct Session {
    hub: Arc<Hub>,
    phase: Phase,
}

impl Session {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            phase: Phase::Connecting,
        }
    }

    /// Join the hub. Only valid while connecting.
    pub fn open(&mut self, outbox: Outbox) -> Option<&Identity> {
        if !matches!(self.phase, Phase::Connecting) {
            return None;
        }
        self.phase = Phase::Active(self.hub.join(outbox));
        self.identity()
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.phase {
            Phase::Active(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Handle one inbound text frame. Never ends the session.
    pub fn dispatch(&mut self, text: &str) -> Dispatch {
        let Phase::Active(identity) = &self.phase else {
            return Dispatch::Inactive;
        };

        match ClientMessage::parse(text) {
            Ok(ClientMessage::Draw(command)) => match self.hub.draw(identity, command) {
                Some(_) => Dispatch::Drawn,
                None => Dispatch::Inactive,
            },
            Ok(ClientMessage::Clear) => {
                if self.hub.clear(&identity.id) {
                    Dispatch::Cleared
                } else {
                    Dispatch::Inactive
                }
            }
            Ok(ClientMessage::Cursor { x, y }) => {
                if self.hub.cursor(identity, x, y) {
                    Dispatch::CursorRelayed
                } else {
                    Dispatch::Inactive
                }
            }
            Ok(ClientMessage::Unknown) => {
                debug!(user_id = %identity.id, "Ignoring unknown message type");
                Dispatch::Ignored
            }
            Err(err) => {
                debug!(user_id = %identity.id, error = %err, "Discarding malformed message");
                Dispatch::Malformed
            }
        }
    }

    /// Leave the hub. Safe to call from any phase, any number of times.
    pub fn close(&mut self) {
        if let Phase::Active(identity) = std::mem::replace(&mut self.phase, Phase::Closed) {
            self.hub.leave(&identity.id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive one WebSocket until either side closes it.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::channel(hub.outbound_capacity());

    let mut session = Session::new(hub);
    let Some(user_id) = session.open(outbox).map(|identity| identity.id.clone()) else {
        return;
    };
    info!(user_id = %user_id, "Session started");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.dispatch(text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(user_id = %user_id, len = data.len(), "Discarding binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ping/pong are answered by the transport
                    Some(Err(e)) => {
                        warn!(user_id = %user_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            frame = inbox.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sender.send(Message::Text(frame)).await {
                            debug!(user_id = %user_id, error = %e, "Send failed");
                            break;
                        }
                    }
                    // The hub dropped our outbox: this connection was evicted.
                    None => break,
                }
            }
        }
    }

    session.close();
    let _ = sender.close().await;
    info!(user_id = %user_id, "Session ended");
}
