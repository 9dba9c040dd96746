//! Snapshot file persistence.
//!
//! The file holds a pretty-printed JSON array of wire-format metrics and
//! is always rewritten in full: the new content goes to a sibling
//! `.tmp` file which is then renamed over the target.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use pulse_core::Metric;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreResult;

/// A snapshot file on disk. Writes are serialized.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with `metrics`. An empty slice is a no-op so an
    /// empty table never creates or truncates the file. Returns whether
    /// anything was written.
    pub async fn write(&self, metrics: &[Metric]) -> StoreResult<bool> {
        if metrics.is_empty() {
            return Ok(false);
        }
        let body = serde_json::to_vec_pretty(metrics)?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = ?self.path, metrics = metrics.len(), bytes = body.len(), "snapshot written");
        Ok(true)
    }

    /// Read the file back. A missing file reads as empty.
    pub async fn read(&self) -> StoreResult<Vec<Metric>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&body)?)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
