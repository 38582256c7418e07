//! Local File Store
//!
//! Implements FileStore on the local filesystem using tokio::fs.

use crate::domain::ports::FileStore;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn move_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn ensure_dir(&self, dir: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_sorted_and_regular_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.wav"), b"").unwrap();
        std::fs::write(dir.path().join("a.wav"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let files = LocalFileStore::new().list_files(dir.path()).await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.wav", "b.wav"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalFileStore::new().list_files(&dir.path().join("missing")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_move_file_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        let from = dir.path().join("from.wav");
        let to = dir.path().join("sub").join("to.wav");
        std::fs::write(&from, b"riff").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        assert!(!store.exists(&to).await.unwrap());
        store.move_file(&from, &to).await.unwrap();
        assert!(!store.exists(&from).await.unwrap());
        assert!(store.exists(&to).await.unwrap());
        assert_eq!(std::fs::read(&to).unwrap(), b"riff");
    }

    #[tokio::test]
    async fn test_remove_and_ensure_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();

        let nested = dir.path().join("a/b");
        store.ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());

        let file = nested.join("x.csv");
        std::fs::write(&file, b"1").unwrap();
        store.remove_file(&file).await.unwrap();
        assert!(!file.exists());
    }
}
