//! Native relay client.
//!
//! Runs the WebSocket connection on a background thread so callers can poll
//! for events without blocking. When the connection drops the thread
//! reconnects according to a [`RetryPolicy`]; each successful reconnect
//! delivers a fresh [`ClientEvent::Welcome`] carrying the full drawing.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket, connect};
use url::Url;

use crate::drawing_log::StrokeSegment;
use crate::identity::{Identity, UserColor, UserId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::retry::RetryPolicy;

/// Errors reported synchronously by [`RelayClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid WebSocket URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Connection thread has stopped")]
    ChannelClosed,
    #[error("Encoding failed: {0}")]
    Encode(#[from] crate::protocol::ProtocolError),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the relay connection
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket opened
    Connected,
    /// Identity assigned by the server and the drawing so far
    Welcome {
        identity: Identity,
        drawing: Vec<StrokeSegment>,
    },
    /// Another user drew a segment
    Stroke(StrokeSegment),
    /// Another user cleared the canvas
    Cleared,
    /// Another user's pointer moved
    Cursor {
        user_id: UserId,
        user_color: UserColor,
        x: f64,
        y: f64,
    },
    /// Number of connected users
    UserCount(usize),
    /// Socket closed
    Disconnected,
    /// Connection attempt or transport failed
    Error { message: String },
}

impl From<ServerMessage> for ClientEvent {
    fn from(message: ServerMessage) -> Self {
        match message {
            ServerMessage::UserConnected {
                user_id,
                user_color,
                drawing_data,
            } => ClientEvent::Welcome {
                identity: Identity {
                    id: user_id,
                    color: user_color,
                },
                drawing: drawing_data,
            },
            ServerMessage::Draw(segment) => ClientEvent::Stroke(segment),
            ServerMessage::Clear => ClientEvent::Cleared,
            ServerMessage::Cursor {
                user_id,
                user_color,
                x,
                y,
            } => ClientEvent::Cursor {
                user_id,
                user_color,
                x,
                y,
            },
            ServerMessage::UserCount { count } => ClientEvent::UserCount(count),
        }
    }
}

/// Commands sent to the connection thread.
enum Command {
    Send(String),
    Close,
}

/// How a live session on the socket ended.
enum SessionEnd {
    /// Caller asked to disconnect, or dropped the client.
    Requested,
    /// Server or network closed the socket.
    Dropped,
}

/// WebSocket client for the relay server.
pub struct RelayClient {
    retry: RetryPolicy,
    state: ConnectionState,
    events: Vec<ClientEvent>,
    /// Channel to send commands to the connection thread.
    cmd_tx: Option<Sender<Command>>,
    /// Channel to receive events from the connection thread.
    event_rx: Option<Receiver<ClientEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Create a new disconnected client.
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            state: ConnectionState::Disconnected,
            events: Vec::new(),
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Start connecting to `url` in the background.
    pub fn connect(&mut self, url: &str) -> Result<(), ClientError> {
        if self.cmd_tx.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        let parsed = Url::parse(url)?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ClientError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = channel::<Command>();
        let (event_tx, event_rx) = channel::<ClientEvent>();
        let url = url.to_string();
        let retry = self.retry;

        let handle = thread::spawn(move || run_connection(&url, retry, &cmd_rx, &event_tx));

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);

        Ok(())
    }

    /// Stop the connection thread. No further reconnects are attempted.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Queue a message for the server.
    pub fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        let tx = self.cmd_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(Command::Send(message.encode()?))
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Drain pending events (non-blocking).
    pub fn poll_events(&mut self) -> Vec<ClientEvent> {
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    ClientEvent::Connected => self.state = ConnectionState::Connected,
                    ClientEvent::Disconnected => self.state = ConnectionState::Disconnected,
                    ClientEvent::Error { .. } => self.state = ConnectionState::Error,
                    _ => {}
                }
                self.events.push(event);
            }
        }

        std::mem::take(&mut self.events)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Connection thread body: connect, pump, back off, repeat.
fn run_connection(
    url: &str,
    retry: RetryPolicy,
    cmd_rx: &Receiver<Command>,
    event_tx: &Sender<ClientEvent>,
) {
    let mut attempt = 0;

    loop {
        log::info!("Relay client: connecting to {}", url);
        match connect(url) {
            Ok((mut socket, response)) => {
                log::info!("Relay client connected, status: {}", response.status());
                attempt = 0;
                let _ = event_tx.send(ClientEvent::Connected);

                set_poll_timeouts(&mut socket);
                let end = pump(&mut socket, cmd_rx, event_tx);
                let _ = event_tx.send(ClientEvent::Disconnected);

                if let SessionEnd::Requested = end {
                    break;
                }
            }
            Err(e) => {
                log::error!("Relay connection failed: {}", e);
                let _ = event_tx.send(ClientEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
            }
        }

        let Some(delay) = retry.delay(attempt) else {
            break;
        };
        attempt = attempt.saturating_add(1);
        log::info!("Relay client: reconnecting in {:?}", delay);
        if !wait_unless_closed(cmd_rx, delay) {
            break;
        }
    }

    log::info!("Relay client thread exiting");
}

/// Short read timeouts so the pump can interleave reads and queued sends.
fn set_poll_timeouts(socket: &mut WebSocket<MaybeTlsStream<std::net::TcpStream>>) {
    match socket.get_mut() {
        MaybeTlsStream::Plain(tcp) => {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }
        #[allow(unreachable_patterns)]
        _ => {
            log::debug!("TLS or other stream - using default timeout handling");
        }
    }
}

fn pump(
    socket: &mut WebSocket<MaybeTlsStream<std::net::TcpStream>>,
    cmd_rx: &Receiver<Command>,
    event_tx: &Sender<ClientEvent>,
) -> SessionEnd {
    loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Send(text)) => {
                    if let Err(e) = socket.send(Message::Text(text.into())) {
                        log::error!("Relay send error: {}", e);
                        return SessionEnd::Dropped;
                    }
                }
                Ok(Command::Close) => {
                    log::info!("Relay close requested");
                    let _ = socket.close(None);
                    return SessionEnd::Requested;
                }
                Err(TryRecvError::Disconnected) => return SessionEnd::Requested,
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                Ok(message) => {
                    let _ = event_tx.send(ClientEvent::from(message));
                }
                Err(e) => log::warn!("Ignoring unreadable server message: {}", e),
            },
            Ok(Message::Close(_)) => {
                log::info!("Relay sent close frame");
                return SessionEnd::Dropped;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                log::error!("Relay read error: {}", e);
                return SessionEnd::Dropped;
            }
        }
    }
}

/// Sleep for `delay`, returning `false` early if the caller asked to close.
/// Messages queued while offline are dropped.
fn wait_unless_closed(cmd_rx: &Receiver<Command>, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match cmd_rx.recv_timeout(remaining) {
            Ok(Command::Send(_)) => log::debug!("Dropping message sent while offline"),
            Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => return false,
            Err(RecvTimeoutError::Timeout) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let mut client = RelayClient::default();
        let result = client.connect("http://localhost:3000");
        assert!(matches!(result, Err(ClientError::UnsupportedScheme(s)) if s == "http"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_rejects_invalid_url() {
        let mut client = RelayClient::default();
        assert!(matches!(
            client.connect("not a url"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_send_requires_connection() {
        let client = RelayClient::default();
        assert!(matches!(
            client.send(&ClientMessage::Clear),
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn test_server_messages_map_to_events() {
        let event = ClientEvent::from(ServerMessage::UserCount { count: 3 });
        assert_eq!(event, ClientEvent::UserCount(3));

        let event = ClientEvent::from(ServerMessage::UserConnected {
            user_id: UserId::from("me"),
            user_color: UserColor::from("#54A0FF"),
            drawing_data: Vec::new(),
        });
        match event {
            ClientEvent::Welcome { identity, drawing } => {
                assert_eq!(identity.id, UserId::from("me"));
                assert!(drawing.is_empty());
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_wait_stops_on_close() {
        let (tx, rx) = channel();
        tx.send(Command::Send("queued".to_string())).unwrap();
        tx.send(Command::Close).unwrap();
        assert!(!wait_unless_closed(&rx, Duration::from_secs(10)));
    }

    #[test]
    fn test_wait_elapses() {
        let (_tx, rx) = channel::<Command>();
        assert!(wait_unless_closed(&rx, Duration::from_millis(10)));
    }
}
