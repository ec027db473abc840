//! Durable key/value collaborator used for salts and the header allowlist
//!
//! The audit core only needs `get`, `put`, `delete` and `list`. An in-memory
//! implementation backs tests; [`FileStorage`] keeps salts across CLI runs and
//! servers plug in their own backend.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::context::AuditContext;
use crate::error::{Error, Result};

/// A stored key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Entry key
    pub key: String,
    /// Raw entry bytes
    pub value: Vec<u8>,
}

impl StorageEntry {
    /// Create an entry
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Minimal durable key/value interface
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch an entry, `Ok(None)` when absent
    async fn get(&self, ctx: &AuditContext, key: &str) -> Result<Option<StorageEntry>>;

    /// Insert or replace an entry
    async fn put(&self, ctx: &AuditContext, entry: StorageEntry) -> Result<()>;

    /// Remove an entry; removing a missing key succeeds
    async fn delete(&self, ctx: &AuditContext, key: &str) -> Result<()>;

    /// List keys directly under `prefix`
    async fn list(&self, ctx: &AuditContext, prefix: &str) -> Result<Vec<String>>;
}

/// In-process storage backed by a concurrent map
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, ctx: &AuditContext, key: &str) -> Result<Option<StorageEntry>> {
        ctx.check()?;
        Ok(self
            .entries
            .get(key)
            .map(|v| StorageEntry::new(key, v.value().clone())))
    }

    async fn put(&self, ctx: &AuditContext, entry: StorageEntry) -> Result<()> {
        ctx.check()?;
        self.entries.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, ctx: &AuditContext, key: &str) -> Result<()> {
        ctx.check()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, ctx: &AuditContext, prefix: &str) -> Result<Vec<String>> {
        ctx.check()?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter_map(|e| e.key().strip_prefix(prefix).map(str::to_string))
            .map(|rest| match rest.find('/') {
                Some(idx) => rest[..=idx].to_string(),
                None => rest,
            })
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// A view over another [`Storage`] that prefixes every key
///
/// Each device gets its own view so salts never collide between devices.
#[derive(Clone)]
pub struct StorageView {
    inner: Arc<dyn Storage>,
    prefix: String,
}

impl std::fmt::Debug for StorageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageView")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl StorageView {
    /// Create a view rooted at `prefix`
    pub fn new(inner: Arc<dyn Storage>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Derive a nested view
    pub fn sub_view(&self, prefix: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            prefix: format!("{}{}", self.prefix, prefix),
        }
    }

    /// The key prefix of this view
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn expand(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Storage for StorageView {
    async fn get(&self, ctx: &AuditContext, key: &str) -> Result<Option<StorageEntry>> {
        let entry = self.inner.get(ctx, &self.expand(key)).await?;
        Ok(entry.map(|e| StorageEntry::new(key, e.value)))
    }

    async fn put(&self, ctx: &AuditContext, entry: StorageEntry) -> Result<()> {
        let key = self.expand(&entry.key);
        self.inner.put(ctx, StorageEntry::new(key, entry.value)).await
    }

    async fn delete(&self, ctx: &AuditContext, key: &str) -> Result<()> {
        self.inner.delete(ctx, &self.expand(key)).await
    }

    async fn list(&self, ctx: &AuditContext, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(ctx, &self.expand(prefix)).await
    }
}

/// Storage rooted at a directory, one file per key
///
/// Keys map onto relative paths, so `audit/file/salt` lives at
/// `<root>/audit/file/salt`. Keys that escape the root are rejected.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Create a store rooted at `root`; the directory is created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, op: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::invalid_parameter(
                op,
                format!("invalid storage key {key:?}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

fn io_error(op: &str, message: &str, err: std::io::Error) -> Error {
    Error::new(op, message, crate::error::ErrorKind::Persistence).with_upstream(err)
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, ctx: &AuditContext, key: &str) -> Result<Option<StorageEntry>> {
        const OP: &str = "storage.FileStorage.get";
        ctx.check()?;
        let path = self.resolve(OP, key)?;
        match tokio::fs::read(&path).await {
            Ok(value) => Ok(Some(StorageEntry::new(key, value))),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(OP, "unable to read entry", e)),
        }
    }

    async fn put(&self, ctx: &AuditContext, entry: StorageEntry) -> Result<()> {
        const OP: &str = "storage.FileStorage.put";
        ctx.check()?;
        let path = self.resolve(OP, &entry.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(OP, "unable to create directory", e))?;
        }
        tokio::fs::write(&path, &entry.value)
            .await
            .map_err(|e| io_error(OP, "unable to write entry", e))
    }

    async fn delete(&self, ctx: &AuditContext, key: &str) -> Result<()> {
        const OP: &str = "storage.FileStorage.delete";
        ctx.check()?;
        let path = self.resolve(OP, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(OP, "unable to delete entry", e)),
        }
    }

    async fn list(&self, ctx: &AuditContext, prefix: &str) -> Result<Vec<String>> {
        const OP: &str = "storage.FileStorage.list";
        ctx.check()?;
        let dir = self.resolve(OP, prefix)?;
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(OP, "unable to list entries", e)),
        };

        let mut keys = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_error(OP, "unable to list entries", e))?
        {
            let name = item.file_name().to_string_lossy().into_owned();
            let is_dir = item
                .file_type()
                .await
                .map_err(|e| io_error(OP, "unable to list entries", e))?
                .is_dir();
            keys.push(if is_dir { format!("{name}/") } else { name });
        }
        keys.sort();
        Ok(keys)
    }
}
