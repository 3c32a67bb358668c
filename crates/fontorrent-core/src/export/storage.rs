//! Host storage capability.
//!
//! Exports write through three traits so hosts with a directory picker, a
//! sandboxed file API or a plain filesystem can all serve as targets:
//!
//! - [`StorageHost`] grants a directory, or reports it cannot
//! - [`DirectoryHandle`] opens child directories and creates files
//! - [`FileWriteHandle`] receives content and is closed once
//!
//! [`LocalStorage`] is the local-filesystem host.

use std::future::Future;
use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::GrantError;

/// Something that can grant a writable directory.
pub trait StorageHost: Send + Sync {
    /// Directory handle type.
    type Directory: DirectoryHandle;

    /// Whether the host can grant directories at all.
    fn is_supported(&self) -> bool;

    /// Ask for a directory. May wait for a user decision.
    fn pick_directory(&self) -> impl Future<Output = Result<Self::Directory, GrantError>> + Send;
}

/// A granted directory.
pub trait DirectoryHandle: Clone + Send + Sync + Sized {
    /// Writer type for files in this directory.
    type Writer: FileWriteHandle;

    /// Open the child directory `name`, creating it if missing.
    fn directory(&self, name: &str) -> impl Future<Output = io::Result<Self>> + Send;

    /// Create (or truncate) the file `name` for writing.
    fn create_file(&self, name: &str) -> impl Future<Output = io::Result<Self::Writer>> + Send;
}

/// An open file being written.
pub trait FileWriteHandle: Send {
    /// Append `data`.
    fn write(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Flush and close the file.
    fn close(self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Storage host backed by a directory on the local filesystem.
///
/// A host without a root reports itself unsupported.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    root: Option<PathBuf>,
}

impl LocalStorage {
    /// Grant `root` (created on first use) to every export.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// A host that cannot grant directories.
    #[must_use]
    pub fn unsupported() -> Self {
        Self { root: None }
    }

    /// The granted root, if any.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }
}

impl StorageHost for LocalStorage {
    type Directory = LocalDirectory;

    fn is_supported(&self) -> bool {
        self.root.is_some()
    }

    async fn pick_directory(&self) -> Result<LocalDirectory, GrantError> {
        let root = self.root.as_ref().ok_or(GrantError::Unsupported)?;
        tokio::fs::create_dir_all(root).await?;
        tracing::debug!("Granted export directory {}", root.display());
        Ok(LocalDirectory { path: root.clone() })
    }
}

/// A directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    /// Path of this directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn child(&self, name: &str) -> io::Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.path.join(name)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{name}' is not a single path segment"),
            )),
        }
    }
}

impl DirectoryHandle for LocalDirectory {
    type Writer = LocalFileWriter;

    async fn directory(&self, name: &str) -> io::Result<Self> {
        let path = self.child(name)?;
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    async fn create_file(&self, name: &str) -> io::Result<LocalFileWriter> {
        let path = self.child(name)?;
        let file = File::create(&path).await?;
        Ok(LocalFileWriter { path, file })
    }
}

/// A file on the local filesystem being written.
#[derive(Debug)]
pub struct LocalFileWriter {
    path: PathBuf,
    file: File,
}

impl LocalFileWriter {
    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileWriteHandle for LocalFileWriter {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    async fn close(mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}
