//! Application Layer
//!
//! The upload engine's use cases: the work queue and its entries, the
//! exchange state machine, and the background tasks that feed it.

pub mod config_sync;
pub mod exchange_engine;
pub mod file_gather;
pub mod queue_entry;
pub mod uploader;
pub mod work_queue;

pub use config_sync::{ConfigRefreshHandler, ConfigSync};
pub use exchange_engine::{EngineSettings, ExchangeEngine, ExchangeOutcome, ExchangeState};
pub use file_gather::{FileGather, GatherSettings};
pub use queue_entry::{Completion, EntryHandler, QueueEntry, UploadHandler};
pub use uploader::Uploader;
pub use work_queue::WorkQueue;
