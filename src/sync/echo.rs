use std::collections::VecDeque;
use uuid::Uuid;

use crate::models::{ContentUpdate, EditOrigin};

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingEdit {
    seq: u64,
    content: String,
    // A foreign update was applied after this edit went out.
    superseded: bool,
}

/// How an inbound content update relates to this client's own edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The relay echoing an edit this client sent; the buffer already has it.
    OwnEcho { seq: u64 },
    /// Our own edit, but the relay ordered it after a foreign update we
    /// already applied, so it has to be applied again.
    OwnReordered { seq: u64 },
    Remote,
}

/// Recognizes echoes of locally sent edits by identity instead of timing.
///
/// Each sent edit gets the next sequence number. Echoes are matched by their
/// `origin` tag when the relay preserves it, otherwise by content in send order.
#[derive(Debug)]
pub struct EchoTracker {
    client: Uuid,
    next_seq: u64,
    pending: VecDeque<PendingEdit>,
    capacity: usize,
}

impl EchoTracker {
    pub fn new(client: Uuid) -> Self {
        Self::with_capacity(client, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(client: Uuid, capacity: usize) -> Self {
        Self {
            client,
            next_seq: 1,
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn client(&self) -> Uuid {
        self.client
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Registers an edit about to be sent and returns its tag.
    pub fn record(&mut self, content: &str) -> EditOrigin {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.pending.len() == self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(PendingEdit {
            seq,
            content: content.to_string(),
            superseded: false,
        });
        EditOrigin {
            client: self.client,
            seq,
        }
    }

    /// Takes back the tag from [`EchoTracker::record`] when the send did not happen.
    pub fn forget(&mut self, origin: EditOrigin) {
        self.pending.retain(|edit| edit.seq != origin.seq);
    }

    pub fn classify(&mut self, update: &ContentUpdate) -> Inbound {
        let position = match update.origin {
            Some(origin) if origin.client == self.client => {
                match self.pending.iter().position(|edit| edit.seq == origin.seq) {
                    Some(position) => position,
                    // Already evicted. Never re-apply our own stale text.
                    None => return Inbound::OwnEcho { seq: origin.seq },
                }
            }
            Some(_) => return Inbound::Remote,
            None => match self.pending.iter().position(|edit| edit.content == update.content) {
                Some(position) => position,
                None => return Inbound::Remote,
            },
        };

        // Earlier pending edits were overtaken; the relay answers in send order.
        let mut matched = None;
        for _ in 0..=position {
            matched = self.pending.pop_front();
        }
        match matched {
            Some(edit) if edit.superseded => Inbound::OwnReordered { seq: edit.seq },
            Some(edit) => Inbound::OwnEcho { seq: edit.seq },
            None => Inbound::Remote,
        }
    }

    /// Called after a foreign update has been applied to the buffer.
    pub fn supersede_pending(&mut self) {
        for edit in &mut self.pending {
            edit.superseded = true;
        }
    }
}
