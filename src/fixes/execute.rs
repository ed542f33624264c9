//! Materializing and running a single fix script.
//!
//! The script is copied out of the tip commit into a fresh temporary file
//! readable, writable and executable by the owner only, run from the
//! repository root, and removed again whatever the outcome.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{FixName, FixOutcome, FixRunner};
use crate::git::GitBackend;

const SCRIPT_MODE: u32 = 0o700;

/// Repository-relative git path of fix `name` under `fixes_dir`.
///
/// The path is normalized lexically; a name that is absolute or climbs out
/// of the repository root with `..` is rejected.
pub(crate) fn fix_repo_path(fixes_dir: &str, name: &FixName) -> Result<String> {
    let name_path = Path::new(name.as_str());
    if name.as_str().is_empty() || name_path.has_root() {
        bail!("invalid fix name: {name:?}");
    }

    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(fixes_dir).join(name_path).components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .with_context(|| format!("fix name is not valid UTF-8: {name:?}"))?
                    .to_string(),
            ),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    bail!("fix {name:?} resolves outside the repository root");
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("fix {name:?} resolves outside the repository root");
            }
        }
    }

    if parts.is_empty() {
        bail!("fix {name:?} resolves to the repository root");
    }
    Ok(parts.join("/"))
}

/// Write `content` to a new uniquely named file in `dir` (or the system temp
/// directory) and make it owner-only executable.
///
/// The returned [`TempPath`] deletes the file when dropped.  The write
/// handle is already closed, so the file can be executed directly.
pub(crate) fn materialize(content: &[u8], dir: Option<&Path>) -> Result<TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("fixit-");
    let mut file = match dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("failed to create temporary script file")?;

    file.write_all(content)
        .context("failed to write temporary script file")?;
    file.as_file()
        .sync_all()
        .context("failed to flush temporary script file")?;

    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(SCRIPT_MODE))
        .with_context(|| format!("failed to chmod {}", path.display()))?;
    Ok(path)
}

impl<G: GitBackend + ?Sized> FixRunner<'_, G> {
    /// Run fix `name` exactly as committed at the tip.
    ///
    /// A non-zero exit is logged and reported in the outcome; failing to
    /// retrieve or start the script is an error.
    #[instrument(skip(self), fields(tip = %self.remote.tip))]
    pub async fn run_fix(&self, name: &FixName) -> Result<FixOutcome> {
        let repo_path = fix_repo_path(self.config.fixes_dir(), name)?;

        let content = self
            .git
            .show(&self.remote.tip, &repo_path)
            .await
            .with_context(|| format!("failed to retrieve fix {name}"))?;

        let script = materialize(&content, self.config.script_dir.as_deref())?;
        debug!(script = %script.display(), "fix materialized");

        let script_path: PathBuf = script.to_path_buf();
        let status = Command::new(&script_path)
            .current_dir(self.repo_root)
            .status()
            .await
            .with_context(|| format!("failed to execute fix {name}"))?;

        // Removal errors are only logged: the fix has already run.
        if let Err(err) = script.close() {
            warn!(fix = %name, error = %err, "failed to remove temporary script");
        }

        if status.success() {
            info!(fix = %name, "fix completed");
        } else {
            warn!(fix = %name, %status, "fix exited with non-zero status");
        }

        Ok(FixOutcome {
            name: name.clone(),
            status,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
