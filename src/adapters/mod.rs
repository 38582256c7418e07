//! Adapters Layer
//!
//! Implementations of the domain ports against the local machine.

pub mod outbound;
