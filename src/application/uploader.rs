//! Uploader - owns the queue and directory and runs the background tasks
//!
//! This is the object a host program builds: it wires the exchange engine,
//! config sync and file gather tasks around one shared work queue and one
//! shared server directory, and exposes `enqueue_upload` for producers
//! outside the gather task.

use crate::application::config_sync::ConfigSync;
use crate::application::exchange_engine::{EngineSettings, ExchangeEngine};
use crate::application::file_gather::{FileGather, GatherSettings};
use crate::application::queue_entry::{timestamp_from_file_name, QueueEntry, UploadHandler};
use crate::application::work_queue::WorkQueue;
use crate::config::Config;
use crate::domain::ports::{Clock, DeviceInfo, FileStore};
use crate::domain::services::ServerDirectory;
use crate::domain::value_objects::DataKind;
use crate::error::Result;
use crate::infrastructure::ShutdownController;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct Uploader {
    config: Config,
    queue: Arc<WorkQueue>,
    directory: Arc<ServerDirectory>,
    clock: Arc<dyn Clock>,
    device: Arc<dyn DeviceInfo>,
    file_store: Arc<dyn FileStore>,
    shutdown: ShutdownController,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Uploader {
    /// Build an uploader bootstrapped with the configured server.
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        device: Arc<dyn DeviceInfo>,
        file_store: Arc<dyn FileStore>,
    ) -> Result<Self> {
        config.validate()?;
        let directory = Arc::new(ServerDirectory::with_initial(
            config.server_host.clone(),
            config.server_port,
        ));

        Ok(Self {
            config,
            queue: Arc::new(WorkQueue::new()),
            directory,
            clock,
            device,
            file_store,
            shutdown: ShutdownController::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn directory(&self) -> &Arc<ServerDirectory> {
        &self.directory
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Whether the tasks stopped because of a configuration-fatal error.
    pub fn is_fatal(&self) -> bool {
        self.shutdown.is_fatal()
    }

    /// Spawn the background tasks. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::warn!("uploader already started");
            return;
        }

        let engine = Arc::new(ExchangeEngine::new(
            self.queue.clone(),
            self.directory.clone(),
            self.clock.clone(),
            self.device.clone(),
            EngineSettings::from(&self.config),
        ));
        tasks.push(tokio::spawn(engine.run(self.shutdown.clone())));

        let sync = Arc::new(ConfigSync::new(
            self.queue.clone(),
            self.directory.clone(),
            self.clock.clone(),
            self.device.clone(),
            self.config.server_port,
            self.config.config_sync_interval(),
        ));
        tasks.push(tokio::spawn(sync.run(self.shutdown.clone())));

        if self.config.gather_enabled {
            let gather = Arc::new(FileGather::new(
                self.queue.clone(),
                self.directory.clone(),
                self.clock.clone(),
                self.device.clone(),
                self.file_store.clone(),
                GatherSettings {
                    landing_dir: self.config.landing_dir.clone(),
                    staging_dir: self.config.staging_dir.clone(),
                    queue_cap: self.config.queue_cap,
                    interval: self.config.gather_interval(),
                    delete_on_success: self.config.delete_after_send,
                },
            ));
            tasks.push(tokio::spawn(gather.run(self.shutdown.clone())));
        }

        tracing::info!(
            "uploader started: node={} server={}:{}",
            self.device.node_id(),
            self.config.server_host,
            self.config.server_port
        );
    }

    /// Request stop and wait for every task to finish its current iteration.
    pub async fn stop(&self) {
        self.shutdown.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("uploader task ended abnormally: {}", e);
            }
        }
        tracing::info!("uploader stopped ({} entries left queued)", self.queue.len());
    }

    /// Resolve once the tasks have been told to stop, by `stop` or by a
    /// fatal error.
    pub async fn stopped(&self) {
        self.shutdown.wait().await;
    }

    /// Queue an upload of a finished file.
    ///
    /// The timestamp is taken from a numeric file name when present, else
    /// from the clock.
    pub fn enqueue_upload(&self, path: impl AsRef<Path>, data_kind: DataKind, delete_on_success: bool) -> Uuid {
        let path = path.as_ref();
        let timestamp = timestamp_from_file_name(path).unwrap_or_else(|| self.clock.now());
        let handler = Arc::new(UploadHandler::new(self.file_store.clone(), delete_on_success));
        let entry = QueueEntry::upload(self.device.node_id(), path, data_kind, timestamp, handler);
        self.queue.push_back(entry)
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::{LocalFileStore, ManualClock, StaticDeviceInfo};
    use crate::domain::value_objects::NodeId;
    use crate::error::UplinkError;
    use crate::wire::messages::{Opcode, Request};
    use std::time::Duration;

    fn uploader(config: Config) -> Result<Uploader> {
        Uploader::new(
            config,
            Arc::new(ManualClock::new(1_700_000_999)),
            Arc::new(StaticDeviceInfo::new(NodeId::new([1, 2, 3, 4, 5, 6]))),
            Arc::new(LocalFileStore::new()),
        )
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = uploader(Config {
            server_port: 0,
            ..Config::default()
        });
        assert!(matches!(result, Err(UplinkError::Config(_))));
    }

    #[test]
    fn test_new_bootstraps_directory() {
        let up = uploader(Config {
            server_host: "10.0.0.5".to_string(),
            server_port: 6000,
            ..Config::default()
        })
        .unwrap();
        let endpoints = up.directory().endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].addr(), "10.0.0.5:6000");
        assert!(up.queue().is_empty());
    }

    #[test]
    fn test_enqueue_upload() {
        let up = uploader(Config::default()).unwrap();
        let a = up.enqueue_upload("/tmp/1700000000.wav", DataKind::Wav, true);
        let b = up.enqueue_upload("/tmp/summary.csv", DataKind::Csv, false);

        assert_eq!(up.queue().len(), 2);
        let head = up.queue().pop_front().unwrap();
        assert_eq!(head.id, a);
        match &head.request {
            Request::Data(d) => assert_eq!(d.timestamp, 1_700_000_000),
            other => panic!("unexpected request {:?}", other),
        }

        let next = up.queue().pop_front().unwrap();
        assert_eq!(next.id, b);
        match &next.request {
            Request::Data(d) => {
                assert_eq!(d.timestamp, 1_700_000_999);
                assert_eq!(d.data_kind, DataKind::Csv);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_queues_config_refresh_and_stop_joins() {
        let root = tempfile::tempdir().unwrap();
        let up = uploader(Config {
            landing_dir: root.path().join("store"),
            staging_dir: root.path().join("queue"),
            server_port: 1,
            idle_wait_secs: 1,
            ..Config::default()
        })
        .unwrap();

        up.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(up.queue().contains_opcode(Opcode::ConfigQuery));
        assert!(root.path().join("queue").is_dir());

        tokio::time::timeout(Duration::from_secs(5), up.stop())
            .await
            .unwrap();
        assert!(!up.is_fatal());
    }
}
