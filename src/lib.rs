//! field-uplink Library
//!
//! Upload protocol engine for field sensing devices: moves finished data
//! files to one of several collection servers over a length-prefixed binary
//! protocol, tolerating intermittent connectivity and busy servers.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod wire;

// Re-export commonly used types
pub use application::{EntryHandler, ExchangeEngine, ExchangeOutcome, QueueEntry, Uploader, WorkQueue};
pub use config::{load_config, Config};
pub use domain::entities::Endpoint;
pub use domain::ports::{Clock, DeviceInfo, FileStore};
pub use domain::services::ServerDirectory;
pub use domain::value_objects::{DataKind, NodeId};
pub use error::{ProtocolError, UplinkError};
pub use infrastructure::ShutdownController;
