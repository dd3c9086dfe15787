use futures_util::future::BoxFuture;
use futures_util::{Sink, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::debug;
use url::Url;

use crate::models::ConnectionError;

pub type TransportSink = Pin<Box<dyn Sink<WsMessage, Error = WsError> + Send>>;
pub type TransportStream = Pin<Box<dyn Stream<Item = Result<WsMessage, WsError>> + Send>>;

/// An established duplex connection, split into its outbound and inbound halves.
pub struct Transport {
    pub sink: TransportSink,
    pub stream: TransportStream,
}

/// Opens transports to an endpoint.
///
/// The connection manager only ever talks to the network through this seam.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Transport, ConnectionError>>;
}

/// Dials WebSocket endpoints with tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str) -> BoxFuture<'static, Result<Transport, ConnectionError>> {
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let url = parse_endpoint(&endpoint)?;
            let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| ConnectionError::ConnectionFailed {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?;
            debug!("WebSocket handshake with {} completed: {}", endpoint, response.status());

            let (sink, stream) = ws_stream.split();
            Ok(Transport {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}

/// Only `ws://` and `wss://` URLs are accepted.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, ConnectionError> {
    let url = Url::parse(endpoint).map_err(|e| ConnectionError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConnectionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}
