//! File sink
//!
//! Appends formatted entries to a file. The handle is opened when the sink is
//! created so bad paths fail at configuration time, and reopened on reload so
//! external log rotation works. A failed write closes the handle, reopens it
//! and retries once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{formatted_bytes, NoopSink, Sink, StdoutSink};
use crate::audit::event::{Format, PipelineEvent};
use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, Result};

/// Magic path that writes to standard output
pub const STDOUT_PATH: &str = "stdout";

/// Magic path that discards everything
pub const DISCARD_PATH: &str = "discard";

/// Default permissions of a newly created log file
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// File sink configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkConfig {
    /// Target path, or one of the magic values `stdout` and `discard`
    pub path: String,
    /// File mode; zero keeps whatever mode the file already has
    pub mode: u32,
    /// Format of the bytes to write
    pub format: Format,
}

impl FileSinkConfig {
    /// Parse the `file_path` (or `path`) and `mode` options
    pub fn from_options(options: &HashMap<String, String>, format: Format) -> Result<Self> {
        const OP: &str = "audit.FileSinkConfig.from_options";

        let path = options
            .get("file_path")
            .or_else(|| options.get("path"))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::external_options(OP, "file_path is required"))?;

        let mode = match options.get("mode").map(|m| m.trim()) {
            Some(m) if !m.is_empty() => u32::from_str_radix(m, 8).map_err(|e| {
                Error::external_options(OP, format!("unable to parse 'mode' {m:?} as octal"))
                    .with_upstream(e)
            })?,
            _ => DEFAULT_FILE_MODE,
        };

        Ok(Self { path, mode, format })
    }
}

/// Build the sink named by a file configuration
///
/// `stdout` and `discard` never touch the filesystem.
pub async fn new_file_sink(config: FileSinkConfig) -> Result<Arc<dyn Sink>> {
    match config.path.to_lowercase().as_str() {
        STDOUT_PATH => Ok(Arc::new(StdoutSink::new(config.format))),
        DISCARD_PATH => Ok(Arc::new(NoopSink::new())),
        _ => Ok(Arc::new(FileSink::new(config).await?)),
    }
}

/// Appends formatted entries to a file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    mode: u32,
    format: Format,
    file: Mutex<Option<File>>,
}

impl FileSink {
    /// Create the sink and sanity-open the file
    pub async fn new(config: FileSinkConfig) -> Result<Self> {
        let sink = Self {
            path: PathBuf::from(&config.path),
            mode: config.mode,
            format: config.format,
            file: Mutex::new(None),
        };

        let file = sink.open().await?;
        *sink.file.lock().await = Some(file);
        Ok(sink)
    }

    /// Path being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<File> {
        const OP: &str = "audit.FileSink.open";

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::internal_error(OP, format!("unable to create file {:?}", self.path))
                    .with_upstream(e)
            })?;
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            let create_mode = if self.mode == 0 { DEFAULT_FILE_MODE } else { self.mode };
            options.mode(create_mode);
        }

        let file = options.open(&self.path).await.map_err(|e| {
            Error::internal_error(OP, format!("unable to open file for sink {:?}", self.path))
                .with_upstream(e)
        })?;

        #[cfg(unix)]
        if self.mode != 0 {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(self.mode);
            tokio::fs::set_permissions(&self.path, permissions)
                .await
                .map_err(|e| {
                    Error::internal_error(OP, format!("unable to change file permissions {:?}", self.path))
                        .with_upstream(e)
                })?;
        }

        Ok(file)
    }

    async fn write(&self, slot: &mut Option<File>, bytes: &[u8]) -> std::io::Result<()> {
        if slot.is_none() {
            let opened = self
                .open()
                .await
                .map_err(|e| std::io::Error::other(e.internal()))?;
            *slot = Some(opened);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(bytes).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        const OP: &str = "audit.FileSink.Process";
        ctx.check()?;
        let bytes = formatted_bytes(OP, event, self.format)?;

        let mut slot = self.file.lock().await;
        if let Err(first) = self.write(&mut slot, bytes).await {
            tracing::warn!(path = ?self.path, error = %first, "audit file write failed, reopening");
            *slot = None;
            self.write(&mut slot, bytes).await.map_err(|e| {
                *slot = None;
                Error::internal_error(OP, format!("unable to write to file {:?}", self.path))
                    .with_upstream(e)
            })?;
        }
        Ok(())
    }

    async fn reopen(&self) -> Result<()> {
        let mut slot = self.file.lock().await;
        if let Some(mut file) = slot.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(path = ?self.path, error = %e, "failed to flush audit file before reopen");
            }
        }
        *slot = Some(self.open().await.map_err(|e| {
            Error::new("audit.FileSink.Reopen", "unable to reopen file", ErrorKind::Internal)
                .with_wrapped(e)
        })?);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut slot = self.file.lock().await;
        if let Some(mut file) = slot.take() {
            file.flush().await.map_err(|e| {
                Error::internal_error("audit.FileSink.Close", "unable to flush file").with_upstream(e)
            })?;
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "file"
    }
}
