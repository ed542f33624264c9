//! Bringing the remote-tracking ref up to date.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use super::RemoteState;
use crate::config::Config;
use crate::git::GitBackend;

/// Fetch the tracked branch and pin the run to the resulting tip.
///
/// A failed fetch is only a warning: the run continues against whatever the
/// tracking ref already points at.  A tracking ref that does not exist at all
/// is an error.
#[instrument(skip(git, config), fields(remote = %config.remote, branch = %config.branch))]
pub async fn sync_remote<G: GitBackend + ?Sized>(git: &G, config: &Config) -> Result<RemoteState> {
    if let Err(err) = git.fetch(&config.remote, &config.branch).await {
        warn!(error = %format!("{err:#}"), "fetch failed; using existing tracking ref");
    }

    let tracking_ref = config.tracking_ref();
    let tip = git
        .resolve_commit(&tracking_ref)
        .await
        .with_context(|| format!("cannot resolve {tracking_ref}; has it ever been fetched?"))?;

    info!(%tracking_ref, %tip, "remote state pinned");
    Ok(RemoteState { tracking_ref, tip })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
