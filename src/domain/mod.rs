//! Domain Layer
//!
//! Entities, value objects, outbound ports and pure services. Nothing in here
//! performs network I/O.

pub mod entities;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use entities::Endpoint;
pub use services::ServerDirectory;
pub use value_objects::{DataKind, NodeId};
