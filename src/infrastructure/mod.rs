//! Infrastructure Layer
//!
//! Cross-cutting concerns shared by the background tasks.

pub mod shutdown;

pub use shutdown::{shutdown_signal, ShutdownController};
