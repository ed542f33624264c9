//! Which fixes a run should execute.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{FixName, FixRunner};
use crate::git::GitBackend;

/// Last component of a `/`-separated git path.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl<G: GitBackend + ?Sized> FixRunner<'_, G> {
    /// Fixes to run, in tree order, or `None` when there is nothing to do.
    ///
    /// Without `since` this is every fix at the tip.  With `since` it is the
    /// subset of those whose file changed in a commit made at or after
    /// `since`; the tip listing stays authoritative, so a fix changed and
    /// later deleted is not returned.
    #[instrument(skip(self))]
    pub async fn list_fixes(&self, since: Option<DateTime<Utc>>) -> Result<Option<Vec<FixName>>> {
        let filter = match since {
            None => None,
            Some(since) => match self.changed_since(since).await? {
                None => return Ok(None),
                Some(changed) => Some(changed),
            },
        };

        let fixes: Vec<FixName> = self
            .git
            .list_tree(&self.remote.tip, self.config.fixes_dir())
            .await?
            .iter()
            .map(|path| basename(path))
            .filter(|name| filter.as_ref().map_or(true, |f| f.contains(*name)))
            .map(FixName::new)
            .collect();

        debug!(count = fixes.len(), filtered = filter.is_some(), "fixes discovered");
        Ok((!fixes.is_empty()).then_some(fixes))
    }

    /// Base names of fixes touched since `since`, or `None` if the fixes
    /// directory has not changed.
    async fn changed_since(&self, since: DateTime<Utc>) -> Result<Option<HashSet<String>>> {
        let fixes_dir = self.config.fixes_dir();
        let Some(boundary) = self
            .git
            .first_commit_since(&self.remote.tip, since, fixes_dir)
            .await?
        else {
            debug!(%since, "no fix commits since last run");
            return Ok(None);
        };

        let changed: HashSet<String> = match self.git.first_parent(&boundary).await? {
            Some(parent) => self
                .git
                .diff_names(&parent, &self.remote.tip, fixes_dir)
                .await?
                .iter()
                .map(|path| basename(path).to_string())
                .collect(),
            // The boundary is a root commit, so everything at the tip is new.
            None => self
                .git
                .list_tree(&self.remote.tip, fixes_dir)
                .await?
                .iter()
                .map(|path| basename(path).to_string())
                .collect(),
        };

        debug!(%boundary, changed = changed.len(), "fix changes since last run");
        Ok((!changed.is_empty()).then_some(changed))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::Config;
    use crate::fixes::RemoteState;
    use crate::git::fake::{at, FakeGit};

    const V1: &[u8] = b"#!/bin/sh\necho v1\n";
    const V2: &[u8] = b"#!/bin/sh\necho v2\n";

    fn tip(id: &str) -> RemoteState {
        RemoteState {
            tracking_ref: "origin/master".to_string(),
            tip: id.to_string(),
        }
    }

    fn names(fixes: Option<Vec<FixName>>) -> Option<Vec<String>> {
        fixes.map(|f| f.into_iter().map(|n| n.to_string()).collect())
    }

    /// c1 (t=100) adds a, b; c2 (t=200) touches only docs; c3 (t=300) edits
    /// b and adds c; c4 (t=400) deletes a.
    fn history() -> FakeGit {
        FakeGit::new("origin/master")
            .commit(
                "c1",
                at(100),
                &[("fixit/fixes/a.sh", V1), ("fixit/fixes/b.sh", V1)],
            )
            .commit(
                "c2",
                at(200),
                &[
                    ("README.md", V1),
                    ("fixit/fixes/a.sh", V1),
                    ("fixit/fixes/b.sh", V1),
                ],
            )
            .commit(
                "c3",
                at(300),
                &[
                    ("README.md", V1),
                    ("fixit/fixes/a.sh", V1),
                    ("fixit/fixes/b.sh", V2),
                    ("fixit/fixes/c.sh", V1),
                ],
            )
            .commit(
                "c4",
                at(400),
                &[
                    ("README.md", V1),
                    ("fixit/fixes/b.sh", V2),
                    ("fixit/fixes/c.sh", V1),
                ],
            )
    }

    #[test]
    fn basename_of_nested_path() {
        assert_eq!(basename("fixit/fixes/a.sh"), "a.sh");
        assert_eq!(basename("a.sh"), "a.sh");
    }

    #[tokio::test]
    async fn unfiltered_lists_every_fix_at_tip() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        let fixes = runner.list_fixes(None).await.unwrap();

        assert_eq!(names(fixes), Some(vec!["b.sh".into(), "c.sh".into()]));
    }

    #[tokio::test]
    async fn unfiltered_ignores_files_outside_fixes_dir() {
        let git = FakeGit::new("origin/master").commit(
            "c1",
            at(100),
            &[
                ("README.md", V1),
                ("fixit/fixes/only.sh", V1),
                ("fixit/fixes/sub/nested.sh", V1),
            ],
        );
        let config = Config::default();
        let remote = tip("c1");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        let fixes = runner.list_fixes(None).await.unwrap();

        assert_eq!(names(fixes), Some(vec!["only.sh".into()]));
    }

    #[tokio::test]
    async fn empty_fixes_dir_is_no_fixes() {
        let git = FakeGit::new("origin/master").commit("c1", at(100), &[("README.md", V1)]);
        let config = Config::default();
        let remote = tip("c1");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        assert_eq!(runner.list_fixes(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn since_after_last_fix_commit_is_no_fixes() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        assert_eq!(runner.list_fixes(Some(at(401))).await.unwrap(), None);
        assert!(!git.calls().iter().any(|c| c.starts_with("diff_names")));
    }

    #[tokio::test]
    async fn since_includes_changes_of_boundary_commit() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        // c3 is the first fix commit at or after t=250; its own edits count.
        let fixes = runner.list_fixes(Some(at(250))).await.unwrap();

        assert_eq!(names(fixes), Some(vec!["b.sh".into(), "c.sh".into()]));
        assert!(git.calls().contains(&"diff_names c2 c4 fixit/fixes".to_string()));
    }

    #[tokio::test]
    async fn changed_then_deleted_fix_is_dropped() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        // Only c4 qualifies: it deletes a.sh, which no longer exists at tip.
        assert_eq!(runner.list_fixes(Some(at(350))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn since_before_root_commit_returns_full_listing() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        let fixes = runner.list_fixes(Some(at(0))).await.unwrap();

        assert_eq!(names(fixes), Some(vec!["b.sh".into(), "c.sh".into()]));
        assert!(git.calls().contains(&"first_parent c1".to_string()));
    }

    #[tokio::test]
    async fn filtered_result_is_subset_of_unfiltered() {
        let git = history();
        let config = Config::default();
        let remote = tip("c4");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);
        let all = runner.list_fixes(None).await.unwrap().unwrap();

        for secs in [0, 100, 150, 200, 250, 300, 350, 400, 450] {
            if let Some(filtered) = runner.list_fixes(Some(at(secs))).await.unwrap() {
                assert!(
                    filtered.iter().all(|f| all.contains(f)),
                    "since={secs} returned {filtered:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn discovery_is_scoped_to_resolved_tip() {
        let git = history();
        let config = Config::default();
        // Pinned to c3 even though the tracking ref now points at c4.
        let remote = tip("c3");
        let runner = FixRunner::new(&git, &config, Path::new("/repo"), &remote);

        let fixes = runner.list_fixes(None).await.unwrap();

        assert_eq!(
            names(fixes),
            Some(vec!["a.sh".into(), "b.sh".into(), "c.sh".into()])
        );
        assert!(git.calls().iter().all(|c| !c.contains("origin/master")));
    }
}
