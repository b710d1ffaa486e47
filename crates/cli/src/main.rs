//! megsync command-line tool.
//!
//! Provides subcommands for creating and cloning a working copy, running
//! pull/push/sync cycles, taking and releasing file locks, and editing the
//! role-based permission registry.

mod permissions;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use megsync_core::config::AppConfig;
use megsync_core::git::RepositoryEngine;
use megsync_core::models::{MergeKind, PullOutcome};
use megsync_core::{SyncController, SyncSettings};

use permissions::{RolesAction, UsersAction};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// megsync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "megsync",
    version,
    about = "Lock- and permission-aware sync for asset repositories"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `megsync_core=trace`. Overrides the
    /// configured level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter configuration file.
    InitConfig {
        /// Username to act as.
        #[arg(short, long)]
        username: String,

        /// Working copy path.
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Validate the configuration file.
    Validate,

    /// Create a repository and make the configured user its administrator.
    Init {
        /// Remote URL; defaults to `repository.url`.
        #[arg(long)]
        url: Option<String>,
    },

    /// Clone the remote into the configured path.
    Clone {
        /// Remote URL; defaults to `repository.url`.
        #[arg(long)]
        url: Option<String>,
    },

    /// Show the branch, local changes and locks.
    Status,

    /// Commit permitted local changes and integrate the remote branch.
    Pull {
        /// Refuse to resolve a three-way merge.
        #[arg(long)]
        fail_on_conflict: bool,
    },

    /// Push the current branch.
    Push,

    /// Pull, then push.
    Sync,

    /// Lock a file.
    Lock {
        path: String,

        /// Only record the lock locally; the next sync publishes it.
        #[arg(long)]
        offline: bool,
    },

    /// Release a file lock.
    Unlock {
        path: String,

        /// Only release the lock locally; the next sync publishes it.
        #[arg(long)]
        offline: bool,
    },

    /// List active locks.
    Locks,

    /// Manage roles.
    Roles {
        #[command(subcommand)]
        action: RolesAction,
    },

    /// Manage user role assignments.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Grant a capability to a role, optionally only on one path.
    Allow {
        role: String,
        capability: String,
        #[arg(long)]
        path: Option<String>,
    },

    /// Revoke a capability from a role, optionally only on one path.
    Deny {
        role: String,
        capability: String,
        #[arg(long)]
        path: Option<String>,
    },

    /// Mark a file read-only, or writable again with `--off`.
    Readonly {
        path: String,
        #[arg(long)]
        off: bool,
    },

    /// Let one user write a file.
    FileGrant { user: String, path: String },

    /// Withdraw a per-file write grant from a user.
    FileRevoke { user: String, path: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(cli));
    // An abandoned repository task must not keep the process alive.
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Commands::InitConfig { username, path } => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init_config(&config_path, &username, &path)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(
                cli.log_level
                    .as_deref()
                    .unwrap_or(&config.logging.log_level),
            );
            debug!(config = %config_path.display(), "configuration loaded");

            match command {
                Commands::Init { url } => cmd_init(&config, url).await,
                Commands::Clone { url } => cmd_clone(&config, url).await,
                Commands::Status => cmd_status(&config).await,
                Commands::Pull { fail_on_conflict } => cmd_pull(&config, fail_on_conflict).await,
                Commands::Push => cmd_push(&config).await,
                Commands::Sync => cmd_sync(&config).await,
                Commands::Lock { path, offline } => cmd_lock(&config, path, offline).await,
                Commands::Unlock { path, offline } => cmd_unlock(&config, path, offline).await,
                Commands::Locks => cmd_locks(&config).await,
                Commands::Roles { action } => permissions::cmd_roles(&config, action).await,
                Commands::Users { action } => permissions::cmd_users(&config, action).await,
                Commands::Allow {
                    role,
                    capability,
                    path,
                } => permissions::cmd_capability(&config, role, capability, path, true).await,
                Commands::Deny {
                    role,
                    capability,
                    path,
                } => permissions::cmd_capability(&config, role, capability, path, false).await,
                Commands::Readonly { path, off } => {
                    permissions::cmd_readonly(&config, path, !off).await
                }
                Commands::FileGrant { user, path } => {
                    permissions::cmd_file_write(&config, user, path, true).await
                }
                Commands::FileRevoke { user, path } => {
                    permissions::cmd_file_write(&config, user, path, false).await
                }
                Commands::InitConfig { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(filter))
        .with_target(false)
        .without_time()
        .init();
}

/// `RUST_LOG` wins; otherwise `filter`, or `info` when it does not parse.
fn log_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Time a cancelled transfer gets to unwind before its task is abandoned.
const ABORT_GRACE: Duration = Duration::from_secs(2);

fn network_timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.sync.network_timeout_secs)
}

/// Controller settings whose transfers stop once the configured timeout
/// has elapsed.
fn sync_settings(config: &AppConfig) -> SyncSettings {
    SyncSettings {
        deadline: Some(Instant::now() + network_timeout(config)),
        ..SyncSettings::from_config(config)
    }
}

/// Run `f` on a blocking thread. If it has not returned within `limit`
/// plus [`ABORT_GRACE`] the task is abandoned and an error is returned;
/// `main` does not wait for abandoned tasks on exit.
async fn blocking<T, F>(limit: Duration, operation: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(limit + ABORT_GRACE, task).await {
        Ok(joined) => joined.with_context(|| format!("{operation} task failed"))?,
        Err(_) => anyhow::bail!(
            "{operation} timed out after {}s and was abandoned; run `megsync status` before retrying",
            limit.as_secs()
        ),
    }
}

/// Open the configured working copy and run `f` with it.
pub(crate) async fn with_controller<T, F>(
    config: &AppConfig,
    operation: &'static str,
    f: F,
) -> Result<T>
where
    F: FnOnce(&mut SyncController) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let path = config.repository.path.clone();
    let settings = sync_settings(config);
    blocking(network_timeout(config), operation, move || {
        let mut controller = SyncController::open(&path, settings)
            .with_context(|| format!("failed to open repository at {}", path.display()))?;
        f(&mut controller)
    })
    .await
}

fn remote_url(config: &AppConfig, url: Option<String>) -> Option<String> {
    url.or_else(|| config.repository.url.clone())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init_config(output: &Path, username: &str, path: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }

    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    std::fs::write(output, AppConfig::template(username, &path))
        .context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Set repository.url to the shared remote");
    println!(
        "  2. Create the repository with `megsync init` or join one with `megsync clone`"
    );
    println!(
        "  3. Validate with: megsync validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    let _ = config.resolve_env_vars();
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  User          : {}", config.user.username);
    println!("  Email         : {}", config.user.email());
    println!(
        "  Password      : {}",
        if config.user.password.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    println!("  Working copy  : {}", config.repository.path.display());
    println!("  Remote        : {}", config.repository.remote);
    println!(
        "  Remote URL    : {}",
        config.repository.url.as_deref().unwrap_or("not set")
    );
    println!("  Fallback      : {}", config.sync.fallback);
    println!("  Fail on merge : {}", config.sync.fail_on_conflict);
    println!();
    println!("Configuration is valid.");
    Ok(())
}

async fn cmd_init(config: &AppConfig, url: Option<String>) -> Result<()> {
    let url = remote_url(config, url);
    let path = config.repository.path.clone();
    let settings = sync_settings(config);

    blocking(network_timeout(config), "init", move || {
        let mut controller = SyncController::init(&path, url.as_deref(), settings)
            .with_context(|| format!("failed to initialize {}", path.display()))?;
        println!(
            "{}",
            style::success(&format!(
                "Initialized {} with {} as administrator",
                path.display(),
                controller.user()
            ))
        );
        if url.is_some() {
            let branch = controller.push().context("initial push failed")?;
            println!("{}", style::success(&format!("Pushed {branch}")));
        }
        Ok(())
    })
    .await
}

async fn cmd_clone(config: &AppConfig, url: Option<String>) -> Result<()> {
    let url = remote_url(config, url)
        .ok_or_else(|| anyhow::anyhow!("no remote URL: pass --url or set repository.url"))?;
    let path = config.repository.path.clone();
    let settings = sync_settings(config);

    blocking(network_timeout(config), "clone", move || {
        let controller = SyncController::clone(&url, &path, settings)
            .with_context(|| format!("failed to clone {url}"))?;
        println!(
            "{}",
            style::success(&format!(
                "Cloned {} into {} ({} locks)",
                url,
                path.display(),
                controller.locks().len()
            ))
        );
        Ok(())
    })
    .await
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    with_controller(config, "status", |c| {
        let branch = c.engine().current_branch()?;
        let head = c.engine().head()?;
        let pending = c.pending_changes()?;
        let user = c.user().to_string();

        println!("{}", style::header("megsync status"));
        println!();
        println!("  User     : {}", user);
        println!("  Roles    : {}", c.registry().get_roles_for_user(&user).join(", "));
        println!("  Branch   : {}", branch);
        println!(
            "  HEAD     : {}",
            head.as_deref().map(short).unwrap_or("none")
        );
        println!("  Locks    : {}", c.locks().len());
        println!();

        if pending.is_empty() {
            println!("{}", style::success("Working copy clean"));
            return Ok(());
        }

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Changed path", "Next sync"]);
        for change in &pending {
            let status = match &change.excluded {
                None => "will be committed".to_string(),
                Some(reason) => style::warn(&format!("held back: {reason}")),
            };
            table.add_row(vec![Cell::new(&change.path), Cell::new(status)]);
        }
        println!("{table}");
        Ok(())
    })
    .await
}

async fn cmd_pull(config: &AppConfig, fail_on_conflict: bool) -> Result<()> {
    let mut config = config.clone();
    config.sync.fail_on_conflict |= fail_on_conflict;
    with_controller(&config, "pull", |c| {
        let outcome = c.pull()?;
        print_outcome(&outcome);
        Ok(())
    })
    .await
}

async fn cmd_push(config: &AppConfig) -> Result<()> {
    with_controller(config, "push", |c| {
        let branch = c.push()?;
        println!("{}", style::success(&format!("Pushed {branch}")));
        Ok(())
    })
    .await
}

async fn cmd_sync(config: &AppConfig) -> Result<()> {
    with_controller(config, "sync", |c| {
        let report = c.sync()?;
        print_outcome(&report.pull);
        println!("{}", style::success(&format!("Pushed {}", report.branch)));
        Ok(())
    })
    .await
}

async fn cmd_lock(config: &AppConfig, path: String, offline: bool) -> Result<()> {
    let path = repo_path(&path);
    with_controller(config, "lock", move |c| {
        let entry = if offline {
            c.add_lock(&path)?
        } else {
            c.acquire_lock(&path)?
        };
        println!(
            "{}",
            style::success(&format!("Locked {} for {}", entry.path, entry.user))
        );
        if offline {
            println!("{}", style::dim("The lock is published by the next sync."));
        }
        Ok(())
    })
    .await
}

async fn cmd_unlock(config: &AppConfig, path: String, offline: bool) -> Result<()> {
    let path = repo_path(&path);
    with_controller(config, "unlock", move |c| {
        let removed = if offline {
            c.remove_lock(&path)?
        } else {
            c.release_lock(&path)?
        };
        match removed {
            Some(entry) => println!(
                "{}",
                style::success(&format!("Released {} (held by {})", entry.path, entry.user))
            ),
            None => println!("{}", style::dim(&format!("{path} was not locked"))),
        }
        Ok(())
    })
    .await
}

async fn cmd_locks(config: &AppConfig) -> Result<()> {
    with_controller(config, "locks", |c| {
        let locks = c.locks();
        if locks.is_empty() {
            println!("{}", style::success("No active locks"));
            return Ok(());
        }

        let me = c.user();
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Path", "Owner", "Since"]);
        for lock in &locks {
            table.add_row(vec![
                Cell::new(&lock.path),
                Cell::new(style::owner(&lock.user, me)),
                Cell::new(format_millis(lock.timestamp)),
            ]);
        }
        println!("{table}");
        println!();
        println!("{} lock(s)", locks.len());
        Ok(())
    })
    .await
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &PullOutcome) {
    if let Some(sha) = &outcome.own_commit {
        println!(
            "{}",
            style::success(&format!(
                "Committed {} local change(s) as {}",
                outcome.staged.len(),
                short(sha)
            ))
        );
    }
    for exclusion in &outcome.excluded {
        println!(
            "{}",
            style::warn(&format!("{} held back: {}", exclusion.path, exclusion.reason))
        );
    }
    println!("Remote: {}", outcome.merge);

    if let MergeKind::Merged { resolutions, .. } = &outcome.merge {
        if !resolutions.is_empty() {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Conflicted path", "Kept", "Rule"]);
            for r in resolutions {
                table.add_row(vec![
                    Cell::new(&r.path),
                    Cell::new(r.choice.to_string()),
                    Cell::new(r.rule.to_string()),
                ]);
            }
            println!("{table}");
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

/// Repository-relative form of a user-supplied path.
pub(crate) fn repo_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").trim_start_matches('/').to_string()
}

fn short(sha: &str) -> &str {
    &sha[..8.min(sha.len())]
}

fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_path() {
        assert_eq!(repo_path("./art/hero.psd"), "art/hero.psd");
        assert_eq!(repo_path("art\\hero.psd"), "art/hero.psd");
        assert_eq!(repo_path("hero.psd"), "hero.psd");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["megsync", "allow", "artist", "can_write", "--path", "a.psd"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Allow { ref role, ref path, .. } if role == "artist" && path.as_deref() == Some("a.psd")
        ));

        let cli = Cli::try_parse_from(["megsync", "readonly", "a.psd", "--off"]).unwrap();
        assert!(matches!(cli.command, Commands::Readonly { off: true, .. }));
    }

    #[test]
    fn test_log_filter_falls_back_on_bad_directive() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter("megsync_core=debug").to_string(), "megsync_core=debug");
        assert_eq!(log_filter("megsync_core=loud").to_string(), "info");
    }

    #[tokio::test]
    async fn test_blocking_abandons_stuck_task() {
        let started = Instant::now();
        let err = blocking(Duration::ZERO, "pull", || {
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("pull timed out"));
        assert!(started.elapsed() < Duration::from_millis(4500));
    }

    #[tokio::test]
    async fn test_blocking_returns_result() {
        let value = blocking(Duration::from_secs(5), "status", || Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_sync_settings_carry_deadline() {
        let config =
            AppConfig::from_toml_str(&AppConfig::template("alice", Path::new("/srv/assets"))).unwrap();
        let settings = sync_settings(&config);
        let deadline = settings.deadline.unwrap();
        assert!(deadline > Instant::now());
        assert!(deadline <= Instant::now() + network_timeout(&config));
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00");
    }
}
