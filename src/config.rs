use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Runtime configuration.  Every field has a default, so an empty YAML
/// document (or no config file at all) is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Remote the fixes are fetched from.
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Branch whose tip is the source of truth for which fixes exist.
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Repository-relative directory holding the fix scripts.
    #[serde(default = "default_fixes_dir")]
    pub fixes_dir: String,
    /// Repository-relative path of the marker file whose mtime records the
    /// last completed run.
    #[serde(default = "default_marker_path")]
    pub marker_path: String,
    /// Repository root.  When unset, `git rev-parse --show-toplevel` is used.
    #[serde(default)]
    pub repo_root: Option<PathBuf>,
    /// Directory in which fix scripts are materialized before execution.
    /// Defaults to the system temporary directory; set it when that
    /// directory is mounted `noexec`.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    /// Advance the marker after every successful run.  When `false` the
    /// marker is only created by the first `all` run and never moves.
    #[serde(default = "bool_true")]
    pub refresh_marker: bool,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_fixes_dir() -> String {
    "fixit/fixes".to_string()
}

fn default_marker_path() -> String {
    "fixit/.last_fixed".to_string()
}

fn bool_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            branch: default_branch(),
            fixes_dir: default_fixes_dir(),
            marker_path: default_marker_path(),
            repo_root: None,
            script_dir: None,
            refresh_marker: bool_true(),
        }
    }
}

impl Config {
    /// Remote-tracking ref updated by the fetch, e.g. `origin/master`.
    pub fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// The fixes directory as a git path without a trailing slash.
    pub fn fixes_dir(&self) -> &str {
        self.fixes_dir.trim_end_matches('/')
    }

    /// Absolute path of the marker file under `repo_root`.
    pub fn marker_file(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(&self.marker_path)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

fn parse_config(contents: &str) -> Result<Config> {
    // An empty file deserializes to `null`, not to an empty mapping.
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(!config.remote.trim().is_empty(), "remote must not be empty");
    anyhow::ensure!(!config.branch.trim().is_empty(), "branch must not be empty");
    anyhow::ensure!(
        !config.fixes_dir().is_empty(),
        "fixes_dir must not be empty"
    );
    anyhow::ensure!(
        is_plain_relative(Path::new(config.fixes_dir())),
        "fixes_dir must be a relative path without `..`: {}",
        config.fixes_dir
    );
    anyhow::ensure!(
        is_plain_relative(Path::new(&config.marker_path)),
        "marker_path must be a relative path without `..`: {}",
        config.marker_path
    );
    Ok(())
}

fn is_plain_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().next().is_some()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
