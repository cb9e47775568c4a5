//! Scratch directory for the ffmpeg runtime.
//!
//! ffmpeg reads its inputs from disk, so in-memory sources are written to a
//! [`Workspace`] first, once per buffer. The directory and everything in it
//! is removed when the workspace is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use fp_core::{SourceLocation, SourceMedia};
use tempfile::TempDir;
use tokio::sync::Mutex;

/// Temporary directory owned by one runtime.
pub struct Workspace {
    temp_dir: TempDir,
    counter: AtomicUsize,
    /// Buffers already on disk. Holding the `Bytes` keeps the allocation
    /// alive, so its address identifies it.
    materialized: Mutex<Vec<(Bytes, PathBuf)>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.temp_dir.path())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    pub fn new() -> fp_core::Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("framepress-")
            .tempdir()
            .map_err(|e| fp_core::Error::tool("workspace", format!("failed to create temp dir: {e}")))?;
        Ok(Self {
            temp_dir,
            counter: AtomicUsize::new(0),
            materialized: Mutex::new(Vec::new()),
        })
    }

    /// Path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A unique path inside the workspace ending in `name`.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let safe: String = name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.temp_dir.path().join(format!("{n:04}-{safe}"))
    }

    /// A filesystem path ffmpeg can read `source` from.
    ///
    /// File-backed sources are used in place. An in-memory source is written
    /// to the workspace on its first load; later loads of the same buffer
    /// reuse that file.
    pub async fn materialize(&self, source: &SourceMedia) -> fp_core::Result<PathBuf> {
        match source.location() {
            SourceLocation::Path(path) => Ok(path.clone()),
            SourceLocation::Memory(data) => {
                let mut materialized = self.materialized.lock().await;
                if let Some((_, path)) = materialized
                    .iter()
                    .find(|(held, _)| held.as_ptr() == data.as_ptr() && held.len() == data.len())
                {
                    return Ok(path.clone());
                }
                let path = self.temp_file(source.name());
                tokio::fs::write(&path, data).await?;
                tracing::debug!(path = %path.display(), bytes = data.len(), "materialized in-memory source");
                materialized.push((data.clone(), path.clone()));
                Ok(path)
            }
        }
    }
}
