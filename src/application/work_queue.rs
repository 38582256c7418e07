//! Work Queue
//!
//! FIFO of pending exchanges shared between producers (gather task, config
//! sync, external callers) and the single exchange engine.
//!
//! Entries are handed out as `Arc` handles so the lock is only held for the
//! container operation itself.

use crate::application::queue_entry::QueueEntry;
use crate::wire::messages::Opcode;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct WorkQueue {
    entries: Mutex<VecDeque<Arc<QueueEntry>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its id.
    pub fn push_back(&self, entry: QueueEntry) -> Uuid {
        let id = entry.id;
        let mut entries = self.entries.lock();
        entries.push_back(Arc::new(entry));
        tracing::debug!("queued {} ({} pending)", id, entries.len());
        id
    }

    /// Shared handle to the head entry.
    pub fn peek_front(&self) -> Option<Arc<QueueEntry>> {
        self.entries.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<Arc<QueueEntry>> {
        self.entries.lock().pop_front()
    }

    /// Pop the head only if it is still the entry with `id`.
    pub fn pop_front_if(&self, id: Uuid) -> Option<Arc<QueueEntry>> {
        let mut entries = self.entries.lock();
        match entries.front() {
            Some(head) if head.id == id => entries.pop_front(),
            _ => None,
        }
    }

    /// Whether any queued entry carries a request with `opcode`.
    pub fn contains_opcode(&self, opcode: Opcode) -> bool {
        self.entries.lock().iter().any(|e| e.opcode() == opcode)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
