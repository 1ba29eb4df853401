use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crew::agent::CommandAgent;
use crew::config::Config;
use crew::coordination::{
    Coordinator, ProgressSnapshot, SpecNumbering, WorktreeManager,
};
use crew::core::plan::Plan;
use crew::coordination::worktree::MergeOutcome;
use crew::{clog, Result};

/// Crew - parallel coding-agent coordinator over git worktrees
#[derive(Parser, Debug)]
#[command(name = "crew")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    CREW_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.crew/crew.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a plan's chunks with parallel workers
    Run {
        /// Path to the plan JSON file
        #[arg(long)]
        plan: PathBuf,

        /// Spec name (also the worktree and branch name)
        #[arg(long)]
        spec: String,

        /// Override the configured worker limit
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show active workers and claimed files from the progress snapshot
    Status,

    /// Merge a spec branch into the base branch in the main working copy
    Merge {
        /// Spec name to merge
        #[arg(long)]
        spec: String,

        /// Remove the spec worktree and branch after a clean merge
        #[arg(long)]
        delete: bool,
    },

    /// Show diff statistics for a spec worktree
    Info {
        /// Spec name to inspect
        #[arg(long)]
        spec: String,
    },

    /// Remove all worker worktrees and branches
    Cleanup,

    /// Print the next globally-unique spec number
    NextNumber,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    crew::log::init_with_debug(cli.debug);

    let project_root = std::env::current_dir()?;
    let config = Config::load(&project_root)?;

    match cli.command {
        Command::Run {
            plan,
            spec,
            workers,
        } => run_plan(config, project_root, plan, spec, workers).await,
        Command::Status => show_status(&config, &project_root),
        Command::Merge { spec, delete } => merge_spec(config, project_root, spec, delete).await,
        Command::Info { spec } => show_info(&config, &project_root, &spec),
        Command::Cleanup => cleanup(config, project_root).await,
        Command::NextNumber => next_number(&config, &project_root),
    }
}

async fn run_plan(
    mut config: Config,
    project_root: PathBuf,
    plan_path: PathBuf,
    spec: String,
    workers: Option<usize>,
) -> Result<()> {
    if let Some(n) = workers {
        config.max_workers = n;
    }

    let plan = Plan::load(&plan_path)?;
    let agent = CommandAgent::from_config(&config);
    agent.ensure_available()?;

    clog!(
        "Starting run for spec '{}' with {} workers",
        spec,
        config.max_workers
    );
    let coordinator = Coordinator::new(config, project_root, &spec, plan, agent)?
        .with_plan_path(plan_path);

    // Ctrl-c stops handing out work; in-flight workers are swept by the
    // run's final cleanup.
    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let summary = coordinator.run().await?;
    println!(
        "Run finished: {} completed, {} failed, {} skipped",
        summary.completed.len(),
        summary.failed.len(),
        summary.skipped.len()
    );
    for chunk in &summary.failed {
        println!("  failed: {}", chunk);
    }
    for chunk in &summary.skipped {
        println!("  skipped: {}", chunk);
    }
    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn show_status(config: &Config, project_root: &std::path::Path) -> Result<()> {
    let path = config.progress_path(project_root);
    if !path.exists() {
        println!("No progress snapshot found (no run in progress?)");
        return Ok(());
    }
    let snapshot = ProgressSnapshot::load(&path)?;
    println!(
        "Spec '{}' as of {}",
        snapshot.spec,
        snapshot.updated_at.format("%H:%M:%S")
    );
    if snapshot.workers.is_empty() {
        println!("No active workers");
    }
    for worker in &snapshot.workers {
        println!(
            "  worker {} phase {} chunk {} ({})",
            worker.worker,
            worker.phase,
            worker.chunk,
            worker.branch
        );
    }
    if !snapshot.claimed_files.is_empty() {
        println!("Claimed files:");
        for (file, worker) in &snapshot.claimed_files {
            println!("  {} -> {}", file, worker);
        }
    }
    Ok(())
}

async fn merge_spec(
    config: Config,
    project_root: PathBuf,
    spec: String,
    delete: bool,
) -> Result<()> {
    let manager = WorktreeManager::new(&project_root, &config)?;
    let outcome =
        crew::util::blocking(move || manager.merge_worktree(&spec, delete)).await?;
    match outcome {
        MergeOutcome::Merged { commit } => {
            println!("Merged: {}", commit);
            Ok(())
        }
        MergeOutcome::AbortedOnConflict { files } => {
            println!("Merge aborted on conflicts:");
            for file in files {
                println!("  {}", file);
            }
            std::process::exit(1);
        }
        MergeOutcome::NotFound { branch } => {
            println!("Branch not found: {}", branch);
            std::process::exit(1);
        }
    }
}

fn show_info(config: &Config, project_root: &std::path::Path, spec: &str) -> Result<()> {
    let manager = WorktreeManager::new(project_root, config)?;
    let info = manager.worktree_info(spec)?;
    println!("Spec:      {}", info.spec);
    println!("Branch:    {} (from {})", info.branch, info.base_branch);
    println!("Worktree:  {}", info.path.display());
    println!(
        "Changes:   {} commits, {} files, +{} -{}",
        info.stats.commits,
        info.stats.files_changed,
        info.stats.insertions,
        info.stats.deletions
    );
    Ok(())
}

async fn cleanup(config: Config, project_root: PathBuf) -> Result<()> {
    let manager = WorktreeManager::new(&project_root, &config)?;
    let removed = crew::util::blocking(move || Ok(manager.cleanup_all_workers())).await?;
    println!("Removed {} worker worktrees", removed);
    Ok(())
}

fn next_number(config: &Config, project_root: &std::path::Path) -> Result<()> {
    let mut numbering = SpecNumbering::new(
        &config.locks_dir(project_root),
        &config.specs_path(project_root),
        &config.worktrees_dir(project_root),
    );
    numbering.acquire(Duration::from_secs(config.lock_timeout_secs))?;
    let number = numbering.next_spec_number()?;
    numbering.release();
    println!("{:03}", number);
    Ok(())
}
