//! Market Rounds - Core Library
//! Real-time trading-round game server: rooms, rounds, trades, bonds and rankings

// Public modules
pub mod config;
pub mod core;
pub mod directory;
pub mod journal;
pub mod market;
pub mod protocol;
pub mod room;
pub mod server;

// Re-exports
pub use config::AppConfig;
pub use core::{Error, Result};
