//! Pure Rust async client for the Frostbite rcon protocol spoken by
//! Battlefield 3 and 4 servers: commands, responses and server-pushed events
//! multiplexed over one TCP connection.
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod packet;
pub mod sequence;

pub use client::{Client, Response};
pub use config::ClientConfig;
pub use error::RconError;
pub use events::EventSink;
