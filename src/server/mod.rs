//! Server - WebSocket transport in front of the game hub

pub mod hub;
pub mod ws;

pub use hub::{GameHub, Outbox};
pub use ws::serve;
