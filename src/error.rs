//! Error Types
//!
//! Failure taxonomy for the upload engine. Transport and protocol failures are
//! retried against the same queue head; an empty server directory is fatal.

use crate::config::ConfigError;
use std::path::PathBuf;

/// Errors raised while decoding or validating wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame length cannot be zero")]
    ZeroLengthFrame,
    #[error("frame length {length} exceeds max {limit}")]
    FrameTooLarge { length: usize, limit: usize },
    #[error("frame length mismatch: declared {declared} bytes, actual payload {actual} bytes")]
    FrameLengthMismatch { declared: usize, actual: usize },
    #[error("{field} truncated: need {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown data kind {0:#04x}")]
    UnknownDataKind(u8),
    #[error("{count} trailing bytes after {opcode:#04x} payload")]
    TrailingBytes { opcode: u8, count: usize },
    #[error("unexpected response {opcode:#04x} to request {request:#04x}")]
    UnexpectedResponse { opcode: u8, request: u8 },
}

/// Top-level error for the uplink engine.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    /// Connect, send or receive failure, including short reads and timeouts.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Every known endpoint is currently leased out.
    #[error("no server available")]
    NoServerAvailable,

    /// The server directory has no endpoints at all.
    #[error("server directory is empty")]
    EmptyDirectory,

    #[error("source file {path}: {source}")]
    SourceFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl UplinkError {
    /// Wrap an I/O error raised while reading the file being uploaded.
    pub fn source_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::SourceFile {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UplinkError::EmptyDirectory)
    }
}

pub type Result<T> = std::result::Result<T, UplinkError>;
