//! Git access behind the [`GitBackend`] trait.
//!
//! Discovery and execution only talk to git through this trait, so they can
//! be exercised against an in-memory history in tests.  The production
//! implementation, [`GitCli`], shells out to the `git` binary using
//! `tokio::process::Command`.

pub mod commands;
#[cfg(test)]
pub mod fake;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use commands::{discover_toplevel, GitCli};

/// Version-control operations needed to discover and retrieve fixes.
///
/// Revisions are plain strings: a ref name, a commit id, or anything else
/// `git rev-parse` understands.
#[async_trait::async_trait]
pub trait GitBackend: Send + Sync {
    /// Fetch `branch` from `remote`, updating the remote-tracking ref.
    async fn fetch(&self, remote: &str, branch: &str) -> Result<()>;

    /// Resolve `rev` to a full commit id.
    async fn resolve_commit(&self, rev: &str) -> Result<String>;

    /// Paths of the files tracked directly under `dir` at `rev`, in tree
    /// order.
    async fn list_tree(&self, rev: &str, dir: &str) -> Result<Vec<String>>;

    /// The oldest commit reachable from `rev` that touches `path` and was
    /// committed at or after `since`.
    async fn first_commit_since(
        &self,
        rev: &str,
        since: DateTime<Utc>,
        path: &str,
    ) -> Result<Option<String>>;

    /// First parent of `commit`, or `None` for a root commit.
    async fn first_parent(&self, commit: &str) -> Result<Option<String>>;

    /// Paths under `path` that differ between `from` and `to`.
    async fn diff_names(&self, from: &str, to: &str, path: &str) -> Result<Vec<String>>;

    /// Raw content of `path` as committed at `rev`.
    async fn show(&self, rev: &str, path: &str) -> Result<Vec<u8>>;
}
