//! Queue Entries
//!
//! A queue entry is one pending exchange: the request to send, an optional
//! file the payload is streamed from, and a handler that decides what happens
//! when the server answers.

use crate::domain::ports::FileStore;
use crate::domain::value_objects::{DataKind, NodeId};
use crate::wire::messages::{DataRequest, Opcode, Request};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// When an entry leaves the queue after a response in its accepted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Stay queued until the server answers `Ack`.
    UntilAck,
    /// Pop after the first accepted response, whatever the handler decided.
    OneShot,
}

/// Per-entry reaction to server responses.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    /// Called once when the payload is answered with `Ack`.
    async fn on_success(&self, _entry: &QueueEntry) {}

    /// Called when the payload is answered with `Reset` or `Blocked`.
    /// Returns true to keep the entry queued for another attempt.
    fn on_error(&self, _entry: &QueueEntry, _opcode: Opcode) -> bool {
        true
    }

    /// Response opcodes handed to `on_accepted_response` instead of being
    /// treated as protocol errors.
    fn accepted_responses(&self) -> &[Opcode] {
        &[]
    }

    /// Handle a response in the accepted set. The full payload, opcode
    /// included, is passed. Returns true to answer `Ack`, false for `Reset`.
    fn on_accepted_response(&self, _payload: &Bytes) -> bool {
        false
    }

    fn completion(&self) -> Completion {
        Completion::UntilAck
    }
}

pub struct QueueEntry {
    pub id: Uuid,
    pub request: Request,
    /// File streamed as the `Data` payload, if any
    pub source_file: Option<PathBuf>,
    pub handler: Arc<dyn EntryHandler>,
}

impl QueueEntry {
    pub fn new(request: Request, handler: Arc<dyn EntryHandler>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            source_file: None,
            handler,
        }
    }

    pub fn with_source_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_file = Some(path.into());
        self
    }

    /// Build an upload of the file at `path`.
    pub fn upload(
        node_id: NodeId,
        path: &Path,
        data_kind: DataKind,
        timestamp: u64,
        handler: Arc<dyn EntryHandler>,
    ) -> Self {
        let request = Request::Data(DataRequest::new(node_id, timestamp, data_kind));
        Self::new(request, handler).with_source_file(path)
    }

    pub fn opcode(&self) -> Opcode {
        self.request.opcode()
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("opcode", &self.opcode())
            .field("source_file", &self.source_file)
            .field("completion", &self.handler.completion())
            .finish()
    }
}

/// Unix timestamp embedded in a recorder file name such as `1700000000.wav`.
/// A staging suffix (`1700000000-2.wav`) is ignored.
pub fn timestamp_from_file_name(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let base = stem.split_once('-').map_or(stem, |(base, _)| base);
    base.parse().ok()
}

/// Handler for file uploads: removes the staged file after a successful send
/// unless configured to keep it.
pub struct UploadHandler {
    file_store: Arc<dyn FileStore>,
    delete_on_success: bool,
}

impl UploadHandler {
    pub fn new(file_store: Arc<dyn FileStore>, delete_on_success: bool) -> Self {
        Self {
            file_store,
            delete_on_success,
        }
    }
}

#[async_trait]
impl EntryHandler for UploadHandler {
    async fn on_success(&self, entry: &QueueEntry) {
        let Some(path) = &entry.source_file else {
            tracing::info!("upload {} acknowledged", entry.id);
            return;
        };

        tracing::info!("uploaded {}", path.display());
        if self.delete_on_success {
            if let Err(e) = self.file_store.remove_file(path).await {
                tracing::warn!("failed to delete {}: {}", path.display(), e);
            }
        }
    }

    fn on_error(&self, entry: &QueueEntry, opcode: Opcode) -> bool {
        tracing::warn!("upload {} answered with {}, will retry", entry.id, opcode);
        true
    }
}
