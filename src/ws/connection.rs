use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::listeners::{ListenerHandle, ListenerRegistry};
use super::transport::{Connector, Transport, WsConnector};
use crate::models::{ConnectionError, ConnectionFault, ConnectionState, ConnectionStatus, Message};

/// Linear backoff for recovering from unexpected drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the `attempt`-th reconnect (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

type Outcome = Result<(), ConnectionError>;

fn as_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

struct ScheduledRetry {
    id: u64,
    handle: JoinHandle<()>,
}

struct Shared {
    endpoint: String,
    state: ConnectionState,
    attempt: u32,
    // Set from an unexpected drop until the connection opens again, the
    // ceiling is hit or `disconnect` is called. Any attempt failing while set,
    // explicit or scheduled, continues the backoff.
    recovering: bool,
    // Bumped for every establishment and every disconnect. Transport tasks and
    // pending attempts carry the epoch they were started under and are ignored
    // once it moves on.
    epoch: u64,
    waiters: Vec<oneshot::Sender<Outcome>>,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    retry: Option<ScheduledRetry>,
    next_retry_id: u64,
}

struct Inner {
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    listeners: ListenerRegistry,
    shared: Mutex<Shared>,
    status: watch::Sender<ConnectionStatus>,
}

/// Owns the one collaboration connection shared by every editing surface.
///
/// Cloning is cheap and every clone drives the same connection. Only
/// [`ConnectionManager::disconnect`] ever closes it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::with_connector(endpoint, policy, WsConnector)
    }

    pub fn with_connector(endpoint: impl Into<String>, policy: ReconnectPolicy, connector: impl Connector) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                policy,
                connector: Arc::new(connector),
                listeners: ListenerRegistry::new(),
                shared: Mutex::new(Shared {
                    endpoint: endpoint.into(),
                    state: ConnectionState::Idle,
                    attempt: 0,
                    recovering: false,
                    epoch: 0,
                    waiters: Vec::new(),
                    outbound: None,
                    retry: None,
                    next_retry_id: 0,
                }),
                status,
            }),
        }
    }

    pub fn endpoint(&self) -> String {
        self.inner.shared.lock().endpoint.clone()
    }

    /// Used by the next establishment. A live connection is not migrated.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        let mut shared = self.inner.shared.lock();
        if shared.endpoint == endpoint {
            return;
        }
        if matches!(shared.state, ConnectionState::Open | ConnectionState::Connecting) {
            info!(
                "Endpoint changed to {} while {}; the current connection to {} is kept",
                endpoint, shared.state, shared.endpoint
            );
        }
        shared.endpoint = endpoint;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.inner.shared.lock().attempt
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Opens the connection, or joins the attempt already in flight.
    ///
    /// Every concurrent caller observes the same outcome and at most one
    /// transport is created. A failure here is returned, not retried, unless
    /// the connection was already recovering from a drop: then the backoff
    /// carries on as if a scheduled attempt had failed.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let outcome = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Connecting => {
                    debug!("Joining connection attempt to {} already in flight", shared.endpoint);
                }
                ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                    if shared.retry.is_some() {
                        debug!("Connecting ahead of the scheduled reconnect to {}", shared.endpoint);
                    }
                    self.start_attempt(&mut shared);
                }
            }
            let (tx, rx) = oneshot::channel();
            shared.waiters.push(tx);
            rx
        };
        outcome.await.unwrap_or_else(|_| {
            Err(ConnectionError::Aborted {
                endpoint: self.endpoint(),
            })
        })
    }

    pub async fn connect_to(&self, endpoint: impl Into<String>) -> Result<(), ConnectionError> {
        self.set_endpoint(endpoint);
        self.connect().await
    }

    /// Hands `message` to the transport.
    ///
    /// Returns `false` if the connection is not open. The message is dropped,
    /// not queued: messages are snapshots and the next open resynchronizes.
    pub fn send(&self, message: &Message) -> bool {
        let shared = self.inner.shared.lock();
        let tx = match (shared.state, shared.outbound.as_ref()) {
            (ConnectionState::Open, Some(tx)) => tx,
            _ => {
                let fault = ConnectionFault::SendWhileDisconnected {
                    kind: message.kind().to_string(),
                };
                warn!("{}", fault);
                return false;
            }
        };
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound '{}' message: {}", message.kind(), e);
                return false;
            }
        };
        if tx.send(WsMessage::text(text)).is_err() {
            let fault = ConnectionFault::SendWhileDisconnected {
                kind: message.kind().to_string(),
            };
            warn!("{}", fault);
            return false;
        }
        debug!("Queued outbound '{}' message", message.kind());
        true
    }

    pub fn on_message(&self, handler: impl Fn(&Message) + Send + Sync + 'static) -> ListenerHandle {
        self.inner.listeners.register(handler)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Closes the connection and stops all automatic recovery.
    ///
    /// Clears every listener and fails any pending `connect` callers with
    /// [`ConnectionError::Aborted`]. Calling it again is a no-op. A later
    /// `connect` starts over as if from idle.
    pub fn disconnect(&self) {
        let (waiters, endpoint) = {
            let mut shared = self.inner.shared.lock();
            let previous = shared.state;
            shared.state = ConnectionState::Closing;
            shared.epoch += 1;
            shared.attempt = 0;
            shared.recovering = false;
            if let Some(retry) = shared.retry.take() {
                debug!("Cancelled scheduled reconnect to {}", shared.endpoint);
                retry.handle.abort();
            }
            if let Some(tx) = shared.outbound.take() {
                let _ = tx.send(WsMessage::Close(None));
            }
            shared.state = ConnectionState::Closed;
            self.publish(ConnectionStatus::Closed);
            if previous != ConnectionState::Closed {
                info!("Disconnected from {}", shared.endpoint);
            }
            (mem::take(&mut shared.waiters), shared.endpoint.clone())
        };

        self.inner.listeners.clear();
        for waiter in waiters {
            let _ = waiter.send(Err(ConnectionError::Aborted {
                endpoint: endpoint.clone(),
            }));
        }
    }

    fn publish(&self, status: ConnectionStatus) {
        self.inner.status.send_replace(status);
    }

    fn start_attempt(&self, shared: &mut Shared) {
        shared.state = ConnectionState::Connecting;
        shared.epoch += 1;

        // While recovering the reconnecting indicator stays up.
        if !shared.recovering {
            self.publish(ConnectionStatus::Connecting);
        }
        info!("Connecting to {}", shared.endpoint);

        let manager = self.clone();
        let endpoint = shared.endpoint.clone();
        let epoch = shared.epoch;
        tokio::spawn(async move { manager.establish(endpoint, epoch).await });
    }

    async fn establish(self, endpoint: String, epoch: u64) {
        let result = self.inner.connector.connect(&endpoint).await;

        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state != ConnectionState::Connecting {
            debug!("Discarding superseded connection attempt to {}", endpoint);
            return;
        }

        let waiters = mem::take(&mut shared.waiters);
        let outcome = match result {
            Ok(transport) => {
                let (tx, rx) = mpsc::unbounded_channel();
                shared.state = ConnectionState::Open;
                shared.attempt = 0;
                shared.recovering = false;
                shared.outbound = Some(tx);
                self.publish(ConnectionStatus::Open);
                info!("Connected to {}", endpoint);

                let manager = self.clone();
                let endpoint = endpoint.clone();
                tokio::spawn(async move { manager.run_transport(transport, rx, epoch, endpoint).await });
                Ok(())
            }
            Err(e) => {
                shared.state = ConnectionState::Idle;
                warn!("Connection attempt to {} failed: {}", endpoint, e);
                if shared.recovering {
                    self.schedule_reconnect(&mut shared);
                } else {
                    self.publish(ConnectionStatus::Idle);
                }
                Err(e)
            }
        };
        drop(shared);

        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_transport(
        self,
        transport: Transport,
        mut outbound: mpsc::UnboundedReceiver<WsMessage>,
        epoch: u64,
        endpoint: String,
    ) {
        let Transport { mut sink, mut stream } = transport;

        // Outbound channel -> socket. Ends after a close frame or when the channel is dropped.
        let writer_endpoint = endpoint.clone();
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    warn!("Failed to write to {}: {}", writer_endpoint, e);
                    return;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Socket -> listeners, in arrival order.
        let listeners = self.inner.listeners.clone();
        let reader_endpoint = endpoint.clone();
        let mut recv_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match Message::from_json(&text) {
                        Ok(message) => {
                            debug!("Received '{}' message from {}", message.kind(), reader_endpoint);
                            listeners.dispatch(&message);
                        }
                        Err(e) => {
                            warn!("Dropping inbound data from {}: {}", reader_endpoint, e);
                        }
                    },
                    Ok(WsMessage::Binary(_)) => {
                        debug!("Ignoring binary frame from {}", reader_endpoint);
                    }
                    Ok(WsMessage::Close(frame)) => {
                        info!("Server closed connection {}: {:?}", reader_endpoint, frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Transport error on {}: {}", reader_endpoint, e);
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = (&mut send_task) => recv_task.abort(),
            _ = (&mut recv_task) => send_task.abort(),
        };

        self.handle_transport_closed(epoch, &endpoint);
    }

    fn handle_transport_closed(&self, epoch: u64, endpoint: &str) {
        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state != ConnectionState::Open {
            debug!("Transport to {} finished after an explicit close", endpoint);
            return;
        }

        shared.state = ConnectionState::Idle;
        shared.outbound = None;
        shared.recovering = true;
        let fault = ConnectionFault::UnexpectedDisconnect {
            endpoint: endpoint.to_string(),
        };
        warn!("{}", fault);
        self.schedule_reconnect(&mut shared);
    }

    /// No-op while a retry is already pending; that retry continues the backoff.
    fn schedule_reconnect(&self, shared: &mut Shared) {
        if shared.state != ConnectionState::Idle || shared.retry.is_some() {
            return;
        }

        shared.attempt += 1;
        let attempt = shared.attempt;
        if !self.inner.policy.allows(attempt) {
            let attempts = attempt - 1;
            shared.recovering = false;
            warn!(
                "Giving up on {} after {} reconnect attempts; waiting for an explicit connect",
                shared.endpoint, attempts
            );
            self.publish(ConnectionStatus::RecoveryStopped { attempts });
            return;
        }

        let delay = self.inner.policy.delay_for(attempt);
        info!("Reconnecting to {} in {:?} (attempt {})", shared.endpoint, delay, attempt);
        self.publish(ConnectionStatus::Reconnecting {
            attempt,
            retry_in_ms: as_millis(delay),
        });

        let id = shared.next_retry_id;
        shared.next_retry_id += 1;
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.retry_after(id, delay).await });
        shared.retry = Some(ScheduledRetry { id, handle });
    }

    /// A failure of the attempt started here is rescheduled by `establish`.
    async fn retry_after(self, id: u64, delay: Duration) {
        tokio::time::sleep(delay).await;

        let mut shared = self.inner.shared.lock();
        if shared.retry.as_ref().map(|retry| retry.id) != Some(id) {
            return;
        }
        shared.retry = None;
        if shared.state != ConnectionState::Idle {
            debug!("Scheduled reconnect skipped, connection is {}", shared.state);
            return;
        }
        self.start_attempt(&mut shared);
    }
}
