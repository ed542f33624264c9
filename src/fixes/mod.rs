//! Fix discovery and execution against a fetched remote branch.
//!
//! A run is pinned to the tip commit resolved right after the fetch
//! ([`RemoteState`]); everything listed, diffed and executed comes from that
//! commit, never from the working tree.

pub mod discovery;
pub mod execute;
pub mod sync;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::ExitStatus;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::Config;
use crate::git::GitBackend;
use crate::state::RunState;

pub use sync::sync_remote;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Base file name of a fix script inside the fixes directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixName(String);

impl FixName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FixName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The tracked branch as seen at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteState {
    /// Symbolic remote-tracking ref, e.g. `origin/master`.
    pub tracking_ref: String,
    /// Commit id the tracking ref pointed at once the fetch finished.
    pub tip: String,
}

/// Result of executing one fix.
#[derive(Debug)]
pub struct FixOutcome {
    pub name: FixName,
    pub status: ExitStatus,
}

/// Fixes executed by one [`FixRunner::run_fixes`] call, in execution order.
#[derive(Debug, Default)]
pub struct RunReport {
    pub executed: Vec<FixOutcome>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &FixOutcome> {
        self.executed.iter().filter(|o| !o.status.success())
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Discovers and runs fixes for one repository at one remote snapshot.
pub struct FixRunner<'a, G: GitBackend + ?Sized> {
    git: &'a G,
    config: &'a Config,
    repo_root: &'a Path,
    remote: &'a RemoteState,
}

impl<'a, G: GitBackend + ?Sized> FixRunner<'a, G> {
    pub fn new(
        git: &'a G,
        config: &'a Config,
        repo_root: &'a Path,
        remote: &'a RemoteState,
    ) -> Self {
        Self {
            git,
            config,
            repo_root,
            remote,
        }
    }

    /// Run every pending fix (or every fix when `run_all`), writing progress
    /// lines to `out`.
    ///
    /// Returns the report together with the state to persist.  A fix that
    /// exits non-zero does not stop the run; failing to retrieve or spawn a
    /// fix does, and no new state is produced in that case.
    #[instrument(skip(self, out), fields(tip = %self.remote.tip))]
    pub async fn run_fixes(
        &self,
        state: RunState,
        run_all: bool,
        out: &mut dyn Write,
    ) -> Result<(RunReport, RunState)> {
        let started_at = Utc::now();
        let since = if run_all { None } else { state.last_run_at };

        let mut report = RunReport::default();
        match self.list_fixes(since).await? {
            None => {
                writeln!(out, "No fixes to run!")?;
            }
            Some(fixes) => {
                info!(count = fixes.len(), "running fixes");
                for fix in fixes {
                    writeln!(out, "Running fix {fix}")?;
                    // Scripts share the terminal with us.
                    out.flush()?;
                    report.executed.push(self.run_fix(&fix).await?);
                }
            }
        }

        Ok((report, self.next_state(state, run_all, started_at)))
    }

    fn next_state(&self, state: RunState, run_all: bool, started_at: DateTime<Utc>) -> RunState {
        if self.config.refresh_marker || (run_all && state.last_run_at.is_none()) {
            RunState {
                last_run_at: Some(started_at),
            }
        } else {
            state
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
