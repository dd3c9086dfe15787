use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use super::buffer::DocumentBuffer;
use super::echo::{EchoTracker, Inbound};
use crate::models::{ContentUpdate, CursorPosition, Message};
use crate::ws::{ConnectionManager, ListenerHandle};

/// What happened to a local edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The text already matched the buffer, e.g. a UI re-submitting a remote write.
    Unchanged,
    Sent { seq: u64 },
    /// Applied to the buffer but not transmitted because the connection is down.
    LocalOnly,
}

struct SyncState {
    echo: EchoTracker,
    server_version: Option<u64>,
}

struct ControllerInner {
    connection: ConnectionManager,
    buffer: DocumentBuffer,
    state: Mutex<SyncState>,
    users: watch::Sender<u64>,
}

/// Keeps one editing surface's buffer in sync with the shared connection.
///
/// Dropping the controller only removes its listener. The connection stays
/// up for any other surface using it.
pub struct SyncController {
    inner: Arc<ControllerInner>,
    listener: ListenerHandle,
}

impl SyncController {
    pub fn attach(connection: ConnectionManager, buffer: DocumentBuffer) -> Self {
        let client = Uuid::new_v4();
        let (users, _) = watch::channel(0);
        let inner = Arc::new(ControllerInner {
            connection: connection.clone(),
            buffer,
            state: Mutex::new(SyncState {
                echo: EchoTracker::new(client),
                server_version: None,
            }),
            users,
        });

        let weak = Arc::downgrade(&inner);
        let listener = connection.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(message);
            }
        });
        info!("Sync controller {} attached", client);

        Self { inner, listener }
    }

    pub fn buffer(&self) -> &DocumentBuffer {
        &self.inner.buffer
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.state.lock().echo.client()
    }

    /// Latest document version the relay reported.
    pub fn server_version(&self) -> Option<u64> {
        self.inner.state.lock().server_version
    }

    pub fn users_count(&self) -> u64 {
        *self.inner.users.borrow()
    }

    pub fn subscribe_presence(&self) -> watch::Receiver<u64> {
        self.inner.users.subscribe()
    }

    /// Entry point for everything the user types: the full new document text.
    pub fn local_edit(&self, text: &str) -> EditOutcome {
        self.inner.local_edit(text)
    }

    pub fn send_cursor(&self, position: u64) -> bool {
        self.inner.connection.send(&Message::CursorPosition(CursorPosition {
            user_id: None,
            position,
        }))
    }

    /// Same as dropping the controller.
    pub fn detach(self) {}
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.listener.unregister();
        debug!("Sync controller detached");
    }
}

impl ControllerInner {
    fn local_edit(&self, text: &str) -> EditOutcome {
        let mut state = self.state.lock();
        if self.buffer.apply_local(text).is_none() {
            debug!("Edit matches the buffer, nothing to send");
            return EditOutcome::Unchanged;
        }

        let origin = state.echo.record(text);
        let message = Message::ContentUpdate(ContentUpdate {
            content: text.to_string(),
            version: None,
            origin: Some(origin),
        });
        if self.connection.send(&message) {
            EditOutcome::Sent { seq: origin.seq }
        } else {
            state.echo.forget(origin);
            debug!("Edit kept locally while disconnected");
            EditOutcome::LocalOnly
        }
    }

    fn handle_inbound(&self, message: &Message) {
        match message {
            Message::ContentUpdate(update) => self.apply_content(update),
            Message::UserCountUpdate(update) => {
                self.users.send_replace(update.count);
                info!("{} users connected", update.count);
            }
            Message::UserJoined(presence) => {
                info!("User {} joined", presence.user_id.as_deref().unwrap_or("unknown"));
            }
            Message::UserLeft(presence) => {
                info!("User {} left", presence.user_id.as_deref().unwrap_or("unknown"));
            }
            Message::CursorPosition(cursor) => {
                debug!(
                    "Cursor of {} at {}",
                    cursor.user_id.as_deref().unwrap_or("unknown"),
                    cursor.position
                );
            }
            Message::Unrecognized { kind, .. } => {
                info!("Ignoring unrecognized '{}' message", kind);
            }
        }
    }

    fn apply_content(&self, update: &ContentUpdate) {
        let mut state = self.state.lock();
        if let Some(version) = update.version {
            state.server_version = Some(version);
        }

        match state.echo.classify(update) {
            Inbound::OwnEcho { seq } => {
                debug!("Discarding echo of local edit {}", seq);
                return;
            }
            Inbound::OwnReordered { seq } => {
                debug!("Local edit {} was ordered after a remote update, applying it", seq);
            }
            Inbound::Remote => {}
        }

        if let Some(revision) = self.buffer.apply_remote(&update.content) {
            state.echo.supersede_pending();
            debug!("Applied remote content as revision {}", revision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EditOrigin, UserCount, UserPresence};
    use crate::sync::buffer::Origin;
    use crate::ws::transport::testing::{FakeConnector, FakePeer};
    use crate::ws::ReconnectPolicy;
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn connected() -> (SyncController, FakePeer, FakeConnector) {
        let connector = FakeConnector::new();
        let manager = ConnectionManager::with_connector("ws://host/ws", ReconnectPolicy::default(), connector.clone());
        let controller = SyncController::attach(manager.clone(), DocumentBuffer::default());
        manager.connect().await.unwrap();
        let peer = connector.take_peer();
        (controller, peer, connector)
    }

    fn content_updates(peer: &mut FakePeer) -> Vec<ContentUpdate> {
        peer.drain_messages()
            .into_iter()
            .filter_map(|msg| match msg {
                Message::ContentUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    fn echo_of(update: &ContentUpdate, version: u64) -> Message {
        Message::ContentUpdate(ContentUpdate {
            version: Some(version),
            ..update.clone()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn user_count_comes_from_the_server() {
        let (controller, peer, _) = connected().await;
        peer.push(&Message::UserJoined(UserPresence { user_id: Some("a".into()) }));
        peer.push(&Message::UserJoined(UserPresence { user_id: Some("b".into()) }));
        settle().await;
        assert_eq!(controller.users_count(), 0);

        peer.push(&Message::UserCountUpdate(UserCount { count: 3 }));
        settle().await;
        assert_eq!(controller.users_count(), 3);

        peer.push(&Message::UserLeft(UserPresence::default()));
        settle().await;
        assert_eq!(controller.users_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_sends_one_update_per_distinct_edit() {
        let (controller, mut peer, _) = connected().await;
        assert!(matches!(controller.local_edit("hello"), EditOutcome::Sent { seq: 1 }));
        assert_eq!(controller.local_edit("hello"), EditOutcome::Unchanged);
        settle().await;

        let sent = content_updates(&mut peer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "hello");
        assert_eq!(sent[0].origin.map(|o| o.client), Some(controller.client_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_update_is_applied_without_resending() {
        let (controller, mut peer, _) = connected().await;
        let mut renders = controller.buffer().subscribe();

        peer.push_raw(tokio_tungstenite::tungstenite::Message::text(
            json!({"type": "content_update", "payload": {"content": "from bob", "version": 4}}).to_string(),
        ));
        settle().await;

        assert_eq!(controller.buffer().text(), "from bob");
        assert_eq!(controller.server_version(), Some(4));
        assert!(renders.has_changed().unwrap());
        let rendered = renders.borrow_and_update().clone();
        assert_eq!(rendered.origin, Origin::Remote);

        // The UI's change detection hands the rendered text straight back.
        assert_eq!(controller.local_edit(&rendered.text), EditOutcome::Unchanged);
        settle().await;
        assert!(content_updates(&mut peer).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn own_echo_does_not_clobber_newer_typing() {
        let (controller, mut peer, _) = connected().await;
        controller.local_edit("h");
        controller.local_edit("he");
        settle().await;
        let sent = content_updates(&mut peer);
        assert_eq!(sent.len(), 2);

        // The relay echoes "h" after the user already typed "he".
        peer.push(&echo_of(&sent[0], 1));
        settle().await;
        assert_eq!(controller.buffer().text(), "he");

        peer.push(&echo_of(&sent[1], 2));
        settle().await;
        assert_eq!(controller.buffer().text(), "he");
        assert_eq!(controller.buffer().revision(), 2);
        assert!(content_updates(&mut peer).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn untagged_echo_is_recognized_by_content() {
        let (controller, mut peer, _) = connected().await;
        controller.local_edit("a");
        controller.local_edit("ab");
        settle().await;
        assert_eq!(content_updates(&mut peer).len(), 2);

        // Relay that strips the origin tag.
        peer.push(&Message::content("a"));
        peer.push(&Message::content("ab"));
        settle().await;
        assert_eq!(controller.buffer().text(), "ab");
        assert!(!controller.buffer().is_remote_origin());
    }

    #[tokio::test(start_paused = true)]
    async fn relay_order_wins_after_a_foreign_update() {
        let (controller, mut peer, _) = connected().await;
        controller.local_edit("mine");
        settle().await;
        let sent = content_updates(&mut peer);

        let other = EditOrigin {
            client: Uuid::new_v4(),
            seq: 9,
        };
        peer.push(&Message::ContentUpdate(ContentUpdate {
            content: "theirs".into(),
            version: Some(1),
            origin: Some(other),
        }));
        peer.push(&echo_of(&sent[0], 2));
        settle().await;

        assert_eq!(controller.buffer().text(), "mine");
        assert_eq!(controller.server_version(), Some(2));
        assert!(content_updates(&mut peer).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_while_disconnected_stay_local() {
        let (controller, mut peer, _) = connected().await;
        controller.connection().disconnect();

        assert_eq!(controller.local_edit("offline"), EditOutcome::LocalOnly);
        assert_eq!(controller.buffer().text(), "offline");
        settle().await;
        assert!(content_updates(&mut peer).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognized_messages_are_ignored() {
        let (controller, peer, _) = connected().await;
        peer.push_raw(tokio_tungstenite::tungstenite::Message::text(r#"{"type":"selection","payload":{"from":1}}"#));
        peer.push(&Message::CursorPosition(CursorPosition {
            user_id: Some("bob".into()),
            position: 4,
        }));
        settle().await;
        assert_eq!(controller.buffer().revision(), 0);
        assert_eq!(controller.users_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_positions_go_out() {
        let (controller, mut peer, _) = connected().await;
        assert!(controller.send_cursor(7));
        settle().await;
        assert_eq!(
            peer.drain_messages(),
            vec![Message::CursorPosition(CursorPosition { user_id: None, position: 7 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detaching_one_surface_keeps_the_connection() {
        let (first, peer, connector) = connected().await;
        let manager = first.connection().clone();
        let second = SyncController::attach(manager.clone(), DocumentBuffer::default());
        assert_eq!(manager.listener_count(), 2);

        first.detach();
        assert_eq!(manager.listener_count(), 1);
        assert!(manager.is_connected());

        peer.push(&Message::content("still flowing"));
        settle().await;
        assert_eq!(second.buffer().text(), "still flowing");
        assert_eq!(connector.attempts(), 1);
    }
}
