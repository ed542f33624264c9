//! [`GitBackend`] implementation over the system `git` binary.
//!
//! Every command runs with `-C <repo_root>`, a closed stdin and
//! `GIT_TERMINAL_PROMPT=0`, so a missing credential fails the command instead
//! of blocking on a prompt.  Paths are requested NUL-terminated (`-z`) where
//! git supports it, so file names are never quoted.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::GitBackend;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Runs `git` inside one working repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repo_root);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

/// Spawn `cmd`, wait for it, and return its stdout.  A non-zero exit becomes
/// an error carrying git's stderr.
async fn checked_output(mut cmd: Command, what: &str) -> Result<Vec<u8>> {
    debug!("spawning {what}");

    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to spawn {what}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{what} failed (status {}): {}", output.status, stderr.trim());
    }

    Ok(output.stdout)
}

// ---------------------------------------------------------------------------
// Toplevel
// ---------------------------------------------------------------------------

/// Run `git rev-parse --show-toplevel` from `cwd` and return the root of the
/// enclosing working tree.
#[instrument(fields(cwd = %cwd.display()))]
pub async fn discover_toplevel(cwd: &Path) -> Result<PathBuf> {
    let mut cmd = Command::new("git");
    cmd.arg("rev-parse")
        .arg("--show-toplevel")
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let stdout = checked_output(cmd, "git rev-parse --show-toplevel").await?;
    let root = String::from_utf8(stdout).context("repository path is not valid UTF-8")?;
    let root = root.trim_end_matches(['\n', '\r']);
    if root.is_empty() {
        bail!("git rev-parse --show-toplevel printed nothing");
    }

    debug!(%root, "found repository root");
    Ok(PathBuf::from(root))
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl GitBackend for GitCli {
    /// `git fetch --quiet <remote> <branch>`; git updates `<remote>/<branch>`
    /// opportunistically.
    #[instrument(skip(self))]
    async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("fetch").arg("--quiet").arg(remote).arg(branch);
        checked_output(cmd, "git fetch").await?;
        debug!("git fetch complete");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_commit(&self, rev: &str) -> Result<String> {
        let mut cmd = self.command();
        cmd.arg("rev-parse")
            .arg("--verify")
            .arg("--quiet")
            .arg(format!("{rev}^{{commit}}"));
        let stdout = checked_output(cmd, "git rev-parse --verify").await?;
        first_line(&stdout).with_context(|| format!("git rev-parse printed no commit for {rev}"))
    }

    #[instrument(skip(self))]
    async fn list_tree(&self, rev: &str, dir: &str) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.arg("ls-tree")
            .arg("-z")
            .arg("--full-tree")
            .arg(rev)
            .arg("--")
            .arg(format!("{}/", dir.trim_end_matches('/')));
        let stdout = checked_output(cmd, "git ls-tree").await?;
        let paths = parse_ls_tree(&stdout);
        debug!(count = paths.len(), "git ls-tree complete");
        Ok(paths)
    }

    #[instrument(skip(self))]
    async fn first_commit_since(
        &self,
        rev: &str,
        since: DateTime<Utc>,
        path: &str,
    ) -> Result<Option<String>> {
        let mut cmd = self.command();
        cmd.arg("rev-list")
            .arg("--reverse")
            .arg(format!("--since={}", since.timestamp()))
            .arg(rev)
            .arg("--")
            .arg(path);
        let stdout = checked_output(cmd, "git rev-list").await?;
        Ok(first_line(&stdout))
    }

    #[instrument(skip(self))]
    async fn first_parent(&self, commit: &str) -> Result<Option<String>> {
        let mut cmd = self.command();
        cmd.arg("rev-list")
            .arg("--parents")
            .arg("--max-count=1")
            .arg(commit);
        let stdout = checked_output(cmd, "git rev-list --parents").await?;
        Ok(parse_first_parent(&stdout))
    }

    #[instrument(skip(self))]
    async fn diff_names(&self, from: &str, to: &str, path: &str) -> Result<Vec<String>> {
        let mut cmd = self.command();
        cmd.arg("diff")
            .arg("--name-only")
            .arg("-z")
            .arg(from)
            .arg(to)
            .arg("--")
            .arg(path);
        let stdout = checked_output(cmd, "git diff --name-only").await?;
        let paths = split_nul(&stdout);
        debug!(count = paths.len(), "git diff complete");
        Ok(paths)
    }

    #[instrument(skip(self))]
    async fn show(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        let mut cmd = self.command();
        cmd.arg("show").arg(format!("{rev}:{path}"));
        let content = checked_output(cmd, "git show").await?;
        debug!(bytes = content.len(), "git show complete");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Parse `git ls-tree -z` output into the paths of its blob entries.
///
/// Each record is `<mode> SP <type> SP <object> TAB <path> NUL`.
fn parse_ls_tree(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .split('\0')
        .filter_map(|record| {
            let (header, path) = record.split_once('\t')?;
            let kind = header.split_whitespace().nth(1)?;
            (kind == "blob").then(|| path.to_string())
        })
        .collect()
}

/// Split NUL-terminated output into non-empty entries.
fn split_nul(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn first_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// `git rev-list --parents` prints `<commit> [<parent>...]`.
fn parse_first_parent(stdout: &[u8]) -> Option<String> {
    first_line(stdout)?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
