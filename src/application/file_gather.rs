//! File Gather Task
//!
//! Moves finished files from the landing directory into the staging
//! directory and queues an upload for each, keeping the queue under a cap.
//! Scans are held back until the server-assigned send timeslot.

use crate::application::queue_entry::{timestamp_from_file_name, EntryHandler, QueueEntry, UploadHandler};
use crate::application::work_queue::WorkQueue;
use crate::domain::ports::{Clock, DeviceInfo, FileStore};
use crate::domain::services::ServerDirectory;
use crate::domain::value_objects::DataKind;
use crate::infrastructure::ShutdownController;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatherSettings {
    pub landing_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub queue_cap: usize,
    pub interval: Duration,
    pub delete_on_success: bool,
}

pub struct FileGather {
    queue: Arc<WorkQueue>,
    directory: Arc<ServerDirectory>,
    clock: Arc<dyn Clock>,
    device: Arc<dyn DeviceInfo>,
    file_store: Arc<dyn FileStore>,
    handler: Arc<dyn EntryHandler>,
    settings: GatherSettings,
}

impl FileGather {
    pub fn new(
        queue: Arc<WorkQueue>,
        directory: Arc<ServerDirectory>,
        clock: Arc<dyn Clock>,
        device: Arc<dyn DeviceInfo>,
        file_store: Arc<dyn FileStore>,
        settings: GatherSettings,
    ) -> Self {
        let handler = Arc::new(UploadHandler::new(file_store.clone(), settings.delete_on_success));
        Self {
            queue,
            directory,
            clock,
            device,
            file_store,
            handler,
            settings,
        }
    }

    fn enqueue_staged(&self, path: &Path, data_kind: DataKind) {
        let timestamp = timestamp_from_file_name(path).unwrap_or_else(|| self.clock.now());
        let entry = QueueEntry::upload(
            self.device.node_id(),
            path,
            data_kind,
            timestamp,
            self.handler.clone(),
        );
        self.queue.push_back(entry);
    }

    /// Re-queue files left in the staging directory by a previous run.
    pub async fn recover_staged(&self) -> io::Result<usize> {
        let mut recovered = 0;
        for path in self.file_store.list_files(&self.settings.staging_dir).await? {
            let Some(kind) = DataKind::from_path(&path) else {
                tracing::debug!("ignoring staged file {}", path.display());
                continue;
            };
            self.enqueue_staged(&path, kind);
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!("recovered {} staged files", recovered);
        }
        Ok(recovered)
    }

    /// First free staging path for `landing`. A name already staged (and so
    /// possibly still queued) gets a `-N` suffix on its stem.
    async fn staging_target(&self, landing: &Path) -> io::Result<Option<PathBuf>> {
        let (Some(name), Some(stem), Some(ext)) = (landing.file_name(), landing.file_stem(), landing.extension())
        else {
            return Ok(None);
        };

        let mut target = self.settings.staging_dir.join(name);
        let mut n = 1u32;
        while self.file_store.exists(&target).await? {
            let mut renamed = stem.to_os_string();
            renamed.push(format!("-{}.", n));
            renamed.push(ext);
            target = self.settings.staging_dir.join(renamed);
            n += 1;
        }
        Ok(Some(target))
    }

    /// Stage and queue landing files until the queue reaches its cap.
    pub async fn gather_once(&self) -> io::Result<usize> {
        let mut gathered = 0;
        for path in self.file_store.list_files(&self.settings.landing_dir).await? {
            if self.queue.len() >= self.settings.queue_cap {
                tracing::debug!("queue full ({}), deferring remaining files", self.settings.queue_cap);
                break;
            }

            let Some(kind) = DataKind::from_path(&path) else {
                tracing::debug!("skipping {}: unknown data kind", path.display());
                continue;
            };
            let staged = match self.staging_target(&path).await {
                Ok(Some(staged)) => staged,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("failed to check staging for {}: {}", path.display(), e);
                    continue;
                }
            };
            if staged.file_name() != path.file_name() {
                tracing::debug!("{} already staged, using {}", path.display(), staged.display());
            }
            if let Err(e) = self.file_store.move_file(&path, &staged).await {
                tracing::warn!("failed to stage {}: {}", path.display(), e);
                continue;
            }

            self.enqueue_staged(&staged, kind);
            gathered += 1;
        }

        if gathered > 0 {
            tracing::info!("gathered {} files ({} queued)", gathered, self.queue.len());
        }
        Ok(gathered)
    }

    pub async fn run(self: Arc<Self>, shutdown: ShutdownController) {
        for dir in [&self.settings.landing_dir, &self.settings.staging_dir] {
            if let Err(e) = self.file_store.ensure_dir(dir).await {
                tracing::warn!("failed to create {}: {}", dir.display(), e);
            }
        }
        if let Err(e) = self.recover_staged().await {
            tracing::warn!("failed to scan staging directory: {}", e);
        }

        tracing::info!(
            "file gather started: {} -> {}",
            self.settings.landing_dir.display(),
            self.settings.staging_dir.display()
        );

        while !shutdown.is_shutdown() {
            let now = self.clock.now();
            let timeslot = self.directory.next_send_timeslot();
            if timeslot > now {
                tracing::debug!("waiting {}s for send timeslot", timeslot - now);
                // re-checked each interval; a config reply may move it earlier
                let wait = Duration::from_secs(timeslot - now).min(self.settings.interval);
                if !shutdown.sleep(wait).await {
                    break;
                }
                continue;
            }

            if let Err(e) = self.gather_once().await {
                tracing::warn!("failed to scan {}: {}", self.settings.landing_dir.display(), e);
            }

            if !shutdown.sleep(self.settings.interval).await {
                break;
            }
        }

        tracing::info!("file gather stopped");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::{LocalFileStore, ManualClock, StaticDeviceInfo};
    use crate::domain::value_objects::NodeId;
    use crate::wire::messages::Request;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        landing: PathBuf,
        staging: PathBuf,
        queue: Arc<WorkQueue>,
        directory: Arc<ServerDirectory>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let landing = root.path().join("store");
        let staging = root.path().join("queue");
        std::fs::create_dir_all(&landing).unwrap();
        std::fs::create_dir_all(&staging).unwrap();
        Fixture {
            landing,
            staging,
            _root: root,
            queue: Arc::new(WorkQueue::new()),
            directory: Arc::new(ServerDirectory::with_initial("127.0.0.1", 5000)),
            clock: Arc::new(ManualClock::new(1_700_000_500)),
        }
    }

    fn gather(f: &Fixture, cap: usize) -> FileGather {
        FileGather::new(
            f.queue.clone(),
            f.directory.clone(),
            f.clock.clone(),
            Arc::new(StaticDeviceInfo::new(NodeId::new([1, 2, 3, 4, 5, 6]))),
            Arc::new(LocalFileStore::new()),
            GatherSettings {
                landing_dir: f.landing.clone(),
                staging_dir: f.staging.clone(),
                queue_cap: cap,
                interval: Duration::from_millis(20),
                delete_on_success: true,
            },
        )
    }

    fn data_of(entry: &QueueEntry) -> (u64, DataKind) {
        match &entry.request {
            Request::Data(d) => (d.timestamp, d.data_kind),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gather_moves_and_queues() {
        let f = fixture();
        std::fs::write(f.landing.join("1700000000.wav"), b"riff").unwrap();
        std::fs::write(f.landing.join("1700000100.csv"), b"a,b").unwrap();

        let n = gather(&f, 20).gather_once().await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(f.queue.len(), 2);
        assert!(!f.landing.join("1700000000.wav").exists());
        assert!(f.staging.join("1700000000.wav").exists());

        let head = f.queue.pop_front().unwrap();
        assert_eq!(data_of(&head), (1_700_000_000, DataKind::Wav));
        assert_eq!(head.source_file.as_deref(), Some(f.staging.join("1700000000.wav").as_path()));

        let next = f.queue.pop_front().unwrap();
        assert_eq!(data_of(&next), (1_700_000_100, DataKind::Csv));
    }

    #[tokio::test]
    async fn test_gather_respects_queue_cap() {
        let f = fixture();
        for i in 0..5 {
            std::fs::write(f.landing.join(format!("17000000{:02}.wav", i)), b"x").unwrap();
        }

        let n = gather(&f, 3).gather_once().await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(f.queue.len(), 3);
        assert_eq!(std::fs::read_dir(&f.landing).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_gather_skips_unknown_kinds_and_uses_clock_fallback() {
        let f = fixture();
        std::fs::write(f.landing.join("notes.txt"), b"skip me").unwrap();
        std::fs::write(f.landing.join("reading.csv"), b"1,2").unwrap();

        let n = gather(&f, 20).gather_once().await.unwrap();
        assert_eq!(n, 1);
        assert!(f.landing.join("notes.txt").exists());

        let head = f.queue.pop_front().unwrap();
        assert_eq!(data_of(&head), (1_700_000_500, DataKind::Csv));
    }

    #[tokio::test]
    async fn test_gather_same_name_twice_keeps_both_files() {
        let f = fixture();
        let g = gather(&f, 20);

        std::fs::write(f.landing.join("reading.csv"), b"first").unwrap();
        assert_eq!(g.gather_once().await.unwrap(), 1);
        std::fs::write(f.landing.join("reading.csv"), b"second").unwrap();
        assert_eq!(g.gather_once().await.unwrap(), 1);

        let first = f.queue.pop_front().unwrap();
        let second = f.queue.pop_front().unwrap();
        let first_path = first.source_file.clone().unwrap();
        let second_path = second.source_file.clone().unwrap();
        assert_ne!(first_path, second_path);
        assert_eq!(first_path, f.staging.join("reading.csv"));
        assert_eq!(second_path, f.staging.join("reading-1.csv"));
        assert_eq!(std::fs::read(&first_path).unwrap(), b"first");
        assert_eq!(std::fs::read(&second_path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_gather_suffixed_name_keeps_timestamp() {
        let f = fixture();
        std::fs::write(f.staging.join("1700000000.wav"), b"old").unwrap();
        std::fs::write(f.staging.join("1700000000-1.wav"), b"older").unwrap();
        std::fs::write(f.landing.join("1700000000.wav"), b"new").unwrap();

        assert_eq!(gather(&f, 20).gather_once().await.unwrap(), 1);
        let head = f.queue.pop_front().unwrap();
        assert_eq!(head.source_file.as_deref(), Some(f.staging.join("1700000000-2.wav").as_path()));
        assert_eq!(data_of(&head), (1_700_000_000, DataKind::Wav));
        assert_eq!(std::fs::read(f.staging.join("1700000000.wav")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_recover_staged() {
        let f = fixture();
        std::fs::write(f.staging.join("1700000000.wav"), b"riff").unwrap();
        std::fs::write(f.staging.join("partial.tmp"), b"").unwrap();

        let n = gather(&f, 20).recover_staged().await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(f.queue.len(), 1);
        assert!(f.staging.join("1700000000.wav").exists());
    }

    #[tokio::test]
    async fn test_run_waits_for_timeslot() {
        let f = fixture();
        std::fs::write(f.landing.join("1700000000.wav"), b"riff").unwrap();
        f.directory.set_next_timeslot(f.clock.now() + 3_600);

        let shutdown = ShutdownController::new();
        let handle = tokio::spawn(Arc::new(gather(&f, 20)).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.queue.len(), 0);
        assert!(f.landing.join("1700000000.wav").exists());

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_notices_earlier_timeslot() {
        let f = fixture();
        std::fs::write(f.landing.join("1700000000.wav"), b"riff").unwrap();
        f.directory.set_next_timeslot(f.clock.now() + 3_600);

        let shutdown = ShutdownController::new();
        let handle = tokio::spawn(Arc::new(gather(&f, 20)).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.queue.len(), 0);

        // a later config reply opens the timeslot now
        f.directory.set_next_timeslot(0);
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(f.staging.join("1700000000.wav").exists());

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_gathers_when_timeslot_open() {
        let f = fixture();
        std::fs::write(f.landing.join("1700000000.wav"), b"riff").unwrap();

        let shutdown = ShutdownController::new();
        let handle = tokio::spawn(Arc::new(gather(&f, 20)).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(f.queue.len(), 1);

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
