//! Domain Entities - Core business objects
//!
//! These entities represent the upstream collection servers the device
//! talks to. They have no I/O and contain only business logic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An upstream collection server.
///
/// `available_from` is a soft lease in unix seconds: the endpoint is only
/// eligible for selection once the current time reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// IPv4 address or hostname
    pub host: String,
    /// TCP port of the collection service
    pub port: u16,
    /// Unix seconds from which this endpoint may be selected
    pub available_from: u64,
}

impl Endpoint {
    /// Create an endpoint that is available immediately.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            available_from: 0,
        }
    }

    /// Whether the endpoint may be selected at `now`.
    pub fn is_available(&self, now: u64) -> bool {
        self.available_from <= now
    }

    /// Whether `other` names the same server (host and port).
    pub fn same_address(&self, other: &Endpoint) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// `host:port` form suitable for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
