pub mod connection;
pub mod listeners;
pub mod transport;

pub use connection::{ConnectionManager, ReconnectPolicy};
pub use listeners::{ListenerHandle, ListenerRegistry};
pub use transport::{Connector, Transport, WsConnector};
