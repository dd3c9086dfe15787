//! Client-side synchronization for a real-time collaborative text editor.
//!
//! A [`ConnectionManager`] owns the one WebSocket connection of the process
//! and recovers it with linear backoff after unexpected drops. Each editing
//! surface attaches a [`SyncController`] to it, which applies remote document
//! snapshots to a [`DocumentBuffer`] and forwards local edits without ever
//! echoing a remote write back to the server.

pub mod config;
pub mod models;
pub mod sync;
pub mod ws;

pub use config::Config;
pub use models::{ConnectionError, ConnectionState, ConnectionStatus, Message};
pub use sync::{DocumentBuffer, EditOutcome, SyncController};
pub use ws::{ConnectionManager, ReconnectPolicy};
