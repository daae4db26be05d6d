//! In-memory message relay server.
//!
//! Clients post short chat-like messages over an HTTP JSON API, the server
//! appends an automatic reply, and the bounded message history can be queried
//! globally or per sender. Nothing survives the process.

pub mod cli;
pub mod server;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use store::{Message, MessageStore};
