use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

/// Where the latest buffer revision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub text: String,
    pub revision: u64,
    pub origin: Origin,
    pub updated_at: DateTime<Utc>,
}

/// The editing surface's text, shared between the UI and the sync controller.
///
/// Every write bumps the revision and records its [`Origin`], so observers
/// can tell a programmatic remote write from something the user typed.
/// Writes that would not change the text are ignored.
#[derive(Clone)]
pub struct DocumentBuffer {
    state: Arc<watch::Sender<BufferSnapshot>>,
}

impl Default for DocumentBuffer {
    fn default() -> Self {
        Self::new("")
    }
}

impl DocumentBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        let (state, _) = watch::channel(BufferSnapshot {
            text: text.into(),
            revision: 0,
            origin: Origin::Local,
            updated_at: Utc::now(),
        });
        Self { state: Arc::new(state) }
    }

    pub fn text(&self) -> String {
        self.state.borrow().text.clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.borrow().revision
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.state.borrow().clone()
    }

    /// True while the current revision was written from a remote update.
    pub fn is_remote_origin(&self) -> bool {
        self.state.borrow().origin == Origin::Remote
    }

    /// Re-renders are driven from this receiver.
    pub fn subscribe(&self) -> watch::Receiver<BufferSnapshot> {
        self.state.subscribe()
    }

    pub fn apply_local(&self, text: &str) -> Option<u64> {
        self.write(text, Origin::Local)
    }

    pub fn apply_remote(&self, text: &str) -> Option<u64> {
        self.write(text, Origin::Remote)
    }

    fn write(&self, text: &str, origin: Origin) -> Option<u64> {
        let mut revision = None;
        self.state.send_if_modified(|snapshot| {
            if snapshot.text == text {
                return false;
            }
            snapshot.text = text.to_string();
            snapshot.revision += 1;
            snapshot.origin = origin;
            snapshot.updated_at = Utc::now();
            revision = Some(snapshot.revision);
            true
        });
        revision
    }
}
