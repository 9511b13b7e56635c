//! Doodlewire Core Library
//!
//! Platform-agnostic data structures shared by the Doodlewire relay server and
//! its clients: the wire protocol, user identities, the drawing log and the
//! logical canvas coordinate space.

pub mod canvas;
pub mod drawing_log;
pub mod identity;
pub mod protocol;
pub mod retry;

#[cfg(not(target_arch = "wasm32"))]
pub mod client;

pub use canvas::{CANVAS_HEIGHT, CANVAS_WIDTH, Viewport};
pub use drawing_log::{DrawingLog, StrokeSegment};
pub use identity::{Identity, IdentityAllocator, PALETTE, UserColor, UserId};
pub use protocol::{ClientMessage, DrawCommand, ProtocolError, ServerMessage};
pub use retry::RetryPolicy;

#[cfg(not(target_arch = "wasm32"))]
pub use client::{ClientError, ClientEvent, ConnectionState, RelayClient};
