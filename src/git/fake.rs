//! In-memory [`GitBackend`] used by tests.
//!
//! History is linear: each commit carries a full snapshot of the tree, and
//! the tracking ref points at the newest commit.

use std::collections::BTreeSet;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};

use super::GitBackend;

pub struct FakeCommit {
    pub id: String,
    pub committed_at: DateTime<Utc>,
    pub tree: Vec<(String, Vec<u8>)>,
}

pub struct FakeGit {
    tracking_ref: String,
    commits: Vec<FakeCommit>,
    fail_fetch: bool,
    calls: Mutex<Vec<String>>,
}

/// Seconds since the epoch as a UTC timestamp.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

impl FakeGit {
    pub fn new(tracking_ref: &str) -> Self {
        Self {
            tracking_ref: tracking_ref.to_string(),
            commits: Vec::new(),
            fail_fetch: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append a commit whose tree is exactly `tree`.
    pub fn commit(mut self, id: &str, committed_at: DateTime<Utc>, tree: &[(&str, &[u8])]) -> Self {
        self.commits.push(FakeCommit {
            id: id.to_string(),
            committed_at,
            tree: tree
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_vec()))
                .collect(),
        });
        self
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Every call made so far, formatted as `op arg...`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn index_of(&self, rev: &str) -> Result<usize> {
        if rev == self.tracking_ref {
            return self
                .commits
                .len()
                .checked_sub(1)
                .ok_or_else(|| anyhow!("{rev} has no commits"));
        }
        self.commits
            .iter()
            .position(|c| c.id == rev)
            .ok_or_else(|| anyhow!("unknown revision {rev}"))
    }

    fn tree_at(&self, index: Option<usize>) -> &[(String, Vec<u8>)] {
        match index {
            Some(i) => &self.commits[i].tree,
            None => &[],
        }
    }

    fn changed_under(&self, from: Option<usize>, to: Option<usize>, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let before = self.tree_at(from);
        let after = self.tree_at(to);
        let lookup = |tree: &[(String, Vec<u8>)], p: &str| {
            tree.iter().find(|(q, _)| q == p).map(|(_, c)| c.clone())
        };
        let paths: BTreeSet<&String> = before
            .iter()
            .chain(after.iter())
            .map(|(p, _)| p)
            .filter(|p| p.starts_with(&prefix))
            .collect();
        paths
            .into_iter()
            .filter(|p| lookup(before, p) != lookup(after, p))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl GitBackend for FakeGit {
    async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.record(format!("fetch {remote} {branch}"));
        if self.fail_fetch {
            bail!("git fetch failed (status exit status: 128): could not read from remote");
        }
        Ok(())
    }

    async fn resolve_commit(&self, rev: &str) -> Result<String> {
        self.record(format!("resolve_commit {rev}"));
        let index = self.index_of(rev)?;
        Ok(self.commits[index].id.clone())
    }

    async fn list_tree(&self, rev: &str, dir: &str) -> Result<Vec<String>> {
        self.record(format!("list_tree {rev} {dir}"));
        let index = self.index_of(rev)?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        Ok(self.commits[index]
            .tree
            .iter()
            .map(|(p, _)| p)
            .filter(|p| p.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .cloned()
            .collect())
    }

    async fn first_commit_since(
        &self,
        rev: &str,
        since: DateTime<Utc>,
        path: &str,
    ) -> Result<Option<String>> {
        self.record(format!("first_commit_since {rev} {} {path}", since.timestamp()));
        let tip = self.index_of(rev)?;
        Ok((0..=tip)
            .filter(|&i| self.commits[i].committed_at.timestamp() >= since.timestamp())
            .find(|&i| !self.changed_under(i.checked_sub(1), Some(i), path).is_empty())
            .map(|i| self.commits[i].id.clone()))
    }

    async fn first_parent(&self, commit: &str) -> Result<Option<String>> {
        self.record(format!("first_parent {commit}"));
        let index = self.index_of(commit)?;
        Ok(index.checked_sub(1).map(|i| self.commits[i].id.clone()))
    }

    async fn diff_names(&self, from: &str, to: &str, path: &str) -> Result<Vec<String>> {
        self.record(format!("diff_names {from} {to} {path}"));
        let from = self.index_of(from)?;
        let to = self.index_of(to)?;
        Ok(self.changed_under(Some(from), Some(to), path))
    }

    async fn show(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        self.record(format!("show {rev}:{path}"));
        let index = self.index_of(rev)?;
        self.commits[index]
            .tree
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| anyhow!("git show failed (status exit status: 128): fatal: path '{path}' does not exist in '{rev}'"))
    }
}
