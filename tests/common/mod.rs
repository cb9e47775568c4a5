//! Shared fixtures for integration tests.
//!
//! Sources are sparse files: their size drives the orchestrator, while the
//! simulated runtime supplies the decoded content.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use fp_compress::{Compressor, CompressorSettings, ProgressSender};
use fp_core::SourceMedia;
use fp_media::sim::SimRuntime;
use parking_lot::Mutex;
use tempfile::TempDir;

/// A scratch directory holding sparse source files.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    /// Create `name` with a size of `mb` MiB without writing its contents.
    pub fn sparse_file(&self, name: &str, mb: u64) -> PathBuf {
        let path = self.dir.path().join(name);
        let file = std::fs::File::create(&path).expect("failed to create source");
        file.set_len(mb * 1024 * 1024).expect("failed to size source");
        path
    }

    pub async fn source(&self, name: &str, mb: u64) -> SourceMedia {
        let path = self.sparse_file(name, mb);
        SourceMedia::from_path(&path)
            .await
            .expect("failed to open source")
    }
}

pub fn compressor(rt: &SimRuntime) -> Compressor {
    Compressor::new(Arc::new(rt.clone()), CompressorSettings::default())
}

/// A progress sender plus the values it received.
pub fn recording_progress() -> (ProgressSender, Arc<Mutex<Vec<f64>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    (ProgressSender::new(move |pct, _| sink.lock().push(pct)), log)
}
