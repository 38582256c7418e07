//! Config Sync Task
//!
//! Periodically queues a `ConfigQuery` and applies the server's `ConfigReply`
//! to the server directory.

use crate::application::queue_entry::{Completion, EntryHandler, QueueEntry};
use crate::application::work_queue::WorkQueue;
use crate::domain::ports::{Clock, DeviceInfo};
use crate::domain::services::ServerDirectory;
use crate::infrastructure::ShutdownController;
use crate::wire::messages::{ConfigReply, Opcode, Request};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Applies a `ConfigReply` to the directory. One-shot: the query is dropped
/// after the first reply whether or not it could be applied.
pub struct ConfigRefreshHandler {
    directory: Arc<ServerDirectory>,
    clock: Arc<dyn Clock>,
    /// Port every advertised host is reached on
    server_port: u16,
}

impl ConfigRefreshHandler {
    pub fn new(directory: Arc<ServerDirectory>, clock: Arc<dyn Clock>, server_port: u16) -> Self {
        Self {
            directory,
            clock,
            server_port,
        }
    }

    /// Merge `reply` into the directory and move the send timeslot.
    pub fn apply(&self, reply: &ConfigReply) {
        let now = self.clock.now();
        let hosts: Vec<(String, u16)> = reply
            .addresses
            .iter()
            .map(|addr| (addr.to_string(), self.server_port))
            .collect();

        let summary = self.directory.merge(&hosts, now);
        self.directory
            .set_next_timeslot(now.saturating_add(reply.next_timeslot_in));

        tracing::info!(
            "server directory refreshed: {} added, {} kept, {} dropped, next timeslot in {}s",
            summary.added,
            summary.kept,
            summary.dropped,
            reply.next_timeslot_in
        );
        if self.directory.is_empty() {
            tracing::warn!("config reply left the server directory empty");
        }
    }
}

impl EntryHandler for ConfigRefreshHandler {
    fn accepted_responses(&self) -> &[Opcode] {
        &[Opcode::ConfigReply]
    }

    fn on_accepted_response(&self, payload: &Bytes) -> bool {
        match ConfigReply::decode(payload.clone()) {
            Ok(reply) => {
                self.apply(&reply);
                true
            }
            Err(e) => {
                tracing::warn!("malformed config reply: {}", e);
                false
            }
        }
    }

    fn completion(&self) -> Completion {
        Completion::OneShot
    }
}

pub struct ConfigSync {
    queue: Arc<WorkQueue>,
    directory: Arc<ServerDirectory>,
    clock: Arc<dyn Clock>,
    device: Arc<dyn DeviceInfo>,
    server_port: u16,
    interval: Duration,
}

impl ConfigSync {
    pub fn new(
        queue: Arc<WorkQueue>,
        directory: Arc<ServerDirectory>,
        clock: Arc<dyn Clock>,
        device: Arc<dyn DeviceInfo>,
        server_port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            directory,
            clock,
            device,
            server_port,
            interval,
        }
    }

    /// Queue a refresh unless one is already pending.
    pub fn enqueue_refresh(&self) -> Option<Uuid> {
        if self.queue.contains_opcode(Opcode::ConfigQuery) {
            tracing::debug!("config query already queued, skipping");
            return None;
        }

        let handler = ConfigRefreshHandler::new(self.directory.clone(), self.clock.clone(), self.server_port);
        let entry = QueueEntry::new(
            Request::ConfigQuery {
                node_id: self.device.node_id(),
            },
            Arc::new(handler),
        );
        Some(self.queue.push_back(entry))
    }

    pub async fn run(self: Arc<Self>, shutdown: ShutdownController) {
        tracing::info!("config sync started (every {:?})", self.interval);

        while !shutdown.is_shutdown() {
            self.enqueue_refresh();
            if !shutdown.sleep(self.interval).await {
                break;
            }
        }

        tracing::info!("config sync stopped");
    }
}
