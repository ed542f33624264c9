//! Last-run bookkeeping.
//!
//! The orchestrator works on an in-memory [`RunState`]; [`MarkerFile`] maps
//! it to the modification time of a single file on disk.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

/// When fixes were last run to completion on this clone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Marker file whose mtime stores [`RunState::last_run_at`].
#[derive(Debug, Clone)]
pub struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Modification time of the marker, or `None` if it does not exist.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn last_fixed_all(&self) -> Result<Option<DateTime<Utc>>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("marker absent");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to stat marker file: {}", self.path.display())
                })
            }
        };

        let modified = meta
            .modified()
            .with_context(|| format!("marker mtime unavailable: {}", self.path.display()))?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }

    /// Create the marker if it is missing.  An existing marker keeps its
    /// timestamp.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn mark_fixed_all(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || create_marker(&path))
            .await
            .context("blocking task panicked")?
    }

    pub async fn load(&self) -> Result<RunState> {
        Ok(RunState {
            last_run_at: self.last_fixed_all().await?,
        })
    }

    /// Persist `state`: the marker is created if needed and its mtime set to
    /// `state.last_run_at`.  A state without a timestamp leaves the disk
    /// untouched.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn save(&self, state: &RunState) -> Result<()> {
        let Some(at) = state.last_run_at else {
            return Ok(());
        };

        if self.last_fixed_all().await? == Some(at) {
            debug!("marker already current");
            return Ok(());
        }

        self.mark_fixed_all().await?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || set_mtime(&path, SystemTime::from(at)))
            .await
            .context("blocking task panicked")??;

        debug!(%at, "marker updated");
        Ok(())
    }
}

/// Create `path` and its parent directories if missing.  Opening in append
/// mode leaves an existing file's content and mtime alone.
fn create_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open marker file: {}", path.display()))?;
    Ok(())
}

fn set_mtime(path: &Path, modified: SystemTime) -> Result<()> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .and_then(|file| file.set_modified(modified))
        .with_context(|| format!("failed to set marker mtime: {}", path.display()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
