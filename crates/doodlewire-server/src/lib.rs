//! Doodlewire relay server.
//!
//! Relays drawing, cursor and clear events between WebSocket clients and keeps
//! the authoritative drawing log that late joiners replay.

pub mod config;
pub mod error;
pub mod hub;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use hub::Hub;
pub use server::{AppState, router, run, serve};
