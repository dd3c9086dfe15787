pub mod buffer;
pub mod controller;
pub mod echo;

pub use buffer::{BufferSnapshot, DocumentBuffer, Origin};
pub use controller::{EditOutcome, SyncController};
pub use echo::{EchoTracker, Inbound};
