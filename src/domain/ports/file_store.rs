//! File Store Port
//!
//! Defines the filesystem operations the gather task and upload entries need.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// Access to the landing and staging directories.
///
/// This is an outbound port that abstracts the local storage. The engine
/// never copies files: staging is an atomic rename and completion is a delete.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// List regular files directly inside `dir`, sorted by name.
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Whether a file or directory exists at `path`.
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Rename `from` to `to`. Callers pick a `to` that is not taken.
    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete the file at `path`.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Create `dir` and its parents if missing.
    async fn ensure_dir(&self, dir: &Path) -> io::Result<()>;
}
