mod config;
mod fixes;
mod git;
mod state;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::fixes::{FixName, FixRunner};
use crate::git::GitCli;
use crate::state::MarkerFile;

const USAGE: &str = "Usage: fixit [all|<fix-name>]";
const USAGE_EXIT_CODE: i32 = 1;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fixit",
    about = "Run maintenance fixes committed to the shared remote branch",
    version
)]
struct Cli {
    /// Path to a YAML configuration file.  Built-in defaults are used when
    /// omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug).  `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit log lines as JSON.
    #[arg(long)]
    log_json: bool,

    /// Nothing to run pending fixes, `all` to run every fix, or a fix name.
    /// Names may start with `-`; options must come before them.
    #[arg(value_name = "all|FIX_NAME", allow_hyphen_values = true)]
    targets: Vec<String>,
}

/// What a command line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    /// Fixes changed since the last run.
    Pending,
    /// Every fix at the tip.
    All,
    /// One fix, by name.
    One(FixName),
}

impl Invocation {
    /// `None` means the command line is a usage error.
    fn from_args(args: &[String]) -> Option<Self> {
        match args {
            [] => Some(Self::Pending),
            [arg] if arg == "all" => Some(Self::All),
            [name] => Some(Self::One(FixName::new(name.as_str()))),
            _ => None,
        }
    }

    /// Like [`Invocation::from_args`], but a usage error prints the usage
    /// line to `err` and yields the exit code to leave with.
    fn from_command_line(args: &[String], err: &mut dyn Write) -> Result<Self, i32> {
        match Self::from_args(args) {
            Some(invocation) => Ok(invocation),
            None => {
                // Nothing useful to do if stderr is gone.
                let _ = writeln!(err, "{USAGE}");
                Err(USAGE_EXIT_CODE)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Logs go to stderr; stdout carries run progress and fix output.
fn init_tracing(verbose: u8, json: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

async fn repo_root(config: &Config) -> Result<PathBuf> {
    match &config.repo_root {
        Some(root) => Ok(root.clone()),
        None => {
            let cwd = std::env::current_dir().context("failed to read current directory")?;
            git::discover_toplevel(&cwd).await
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let invocation = match Invocation::from_command_line(&cli.targets, &mut std::io::stderr()) {
        Ok(invocation) => invocation,
        Err(code) => std::process::exit(code),
    };

    // ---- Config ----
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let repo_root = repo_root(&config).await?;
    tracing::info!(repo = %repo_root.display(), ?invocation, "starting fixit");

    // ---- Remote sync ----
    let git = GitCli::new(&repo_root);
    let remote = fixes::sync_remote(&git, &config).await?;
    tracing::debug!(tracking_ref = %remote.tracking_ref, tip = %remote.tip, "running against tip");
    let runner = FixRunner::new(&git, &config, git.repo_root(), &remote);

    // ---- Dispatch ----
    let run_all = match invocation {
        Invocation::One(name) => {
            let outcome = runner.run_fix(&name).await?;
            if !outcome.status.success() {
                std::process::exit(outcome.status.code().unwrap_or(1));
            }
            return Ok(());
        }
        Invocation::Pending => false,
        Invocation::All => true,
    };

    // ---- Run + persist marker ----
    let marker = MarkerFile::new(config.marker_file(&repo_root));
    let state = marker.load().await?;
    tracing::debug!(marker = %marker.path().display(), ?state, "loaded run state");

    let mut stdout = std::io::stdout();
    let (report, next) = runner.run_fixes(state, run_all, &mut stdout).await?;
    marker.save(&next).await?;

    let failed: Vec<&str> = report.failed().map(|o| o.name.as_str()).collect();
    tracing::info!(executed = report.executed.len(), ?failed, "run finished");

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
