//! Command-line entry point: a thin clap surface over the `memvcs-*`
//! library crates. Grounded on `installer/metanode/src/main.rs`'s
//! `Cli`/`Commands` structuring and `init_logging` convention.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use memvcs_confidence::{ConfidenceCalculator, DecayKind, DecayModel};
use memvcs_crypto::{init_encryption, CryptoEnvelope, EncryptionConfig};
use memvcs_distill::{self, DistillConfig, DistillError};
use memvcs_integrity as integrity;
use memvcs_objects::Author;
use memvcs_repo::Repository;
use memvcs_session::{SessionConfig, SessionManager};
use memvcs_storage::LocalStorageAdapter;

const ENCRYPTION_PASSPHRASE_VAR: &str = "MEMVCS_ENCRYPTION_PASSPHRASE";

#[derive(Parser)]
#[command(name = "memvcs", version, about = "Version-control engine for agent memory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository root (defaults to the current directory).
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new repository at `--path` (or the current directory).
    Init {
        #[arg(long, default_value = "main")]
        branch: String,
        /// Enable encryption at rest; reads the passphrase from
        /// MEMVCS_ENCRYPTION_PASSPHRASE.
        #[arg(long)]
        encrypt: bool,
    },
    /// Stage a file or directory.
    Add {
        paths: Vec<String>,
    },
    /// Record a commit of the currently staged changes.
    Commit {
        #[arg(short, long)]
        message: String,
        #[arg(long, default_value = "agent")]
        author_name: String,
        #[arg(long, default_value = "agent@memvcs.local")]
        author_email: String,
    },
    /// Show commit history on the current branch.
    Log {
        #[arg(long)]
        max: Option<usize>,
        #[arg(long)]
        since: Option<String>,
    },
    /// Show staged/unstaged/untracked paths relative to HEAD.
    Status,
    /// Switch the working tree to a branch, tag, or commit hash.
    Checkout {
        target: String,
        #[arg(short, long)]
        force: bool,
    },
    /// Diff two revisions.
    Diff {
        a: String,
        b: String,
    },
    /// Create or delete a branch.
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },
    /// Create a tag pointing at a revision.
    Tag {
        name: String,
        target: String,
    },
    /// Verify the Merkle snapshot of the working tree against disk.
    Verify,
    /// Run the episodic-to-semantic distillation pipeline.
    Distill {
        #[arg(long, default_value = "episodic")]
        source_dir: String,
        #[arg(long, default_value = "semantic/consolidated")]
        target_dir: String,
        #[arg(long)]
        use_dp: bool,
        #[arg(long, default_value_t = 1.0)]
        dp_epsilon: f64,
        #[arg(long, default_value = "agent")]
        author_name: String,
        #[arg(long, default_value = "agent@memvcs.local")]
        author_email: String,
    },
    /// Confidence scoring over semantic memory paths.
    Confidence {
        #[command(subcommand)]
        action: ConfidenceAction,
    },
    /// Session-scoped observation buffering and auto-commit.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    Create { name: String, at: String },
    Delete { name: String },
}

#[derive(Subcommand)]
enum ConfidenceAction {
    /// (Re)compute the score for a path.
    Score {
        path: String,
        #[arg(long)]
        source_id: Option<String>,
        #[arg(long)]
        created_at: Option<String>,
    },
    Show { path: String },
    Corroborate { path: String },
    Contradict { path: String },
    Access { path: String },
    /// List paths below a confidence threshold.
    Low {
        #[arg(long, default_value_t = 0.3)]
        threshold: f64,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    Start {
        #[arg(long)]
        context: Option<String>,
    },
    /// Record one observation into the active (or auto-started) session.
    Observe {
        tool_name: String,
        #[arg(long, default_value = "{}")]
        arguments: String,
        #[arg(long)]
        result: Option<String>,
        #[arg(long, default_value = "agent")]
        author_name: String,
        #[arg(long, default_value = "agent@memvcs.local")]
        author_email: String,
    },
    End {
        #[arg(long, default_value = "agent")]
        author_name: String,
        #[arg(long, default_value = "agent@memvcs.local")]
        author_email: String,
    },
    Pause,
    Resume,
    Discard,
    Status,
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "memvcs=debug"
    } else {
        "memvcs=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .ok();
    Ok(())
}

/// Opens the repository rooted at `root`, wiring up the AEAD sealer from
/// `encryption.json` (if one was written at `init` time) so reads and
/// writes transparently decrypt/encrypt.
fn open_repo(root: &Path) -> Result<Repository> {
    let meta = Arc::new(LocalStorageAdapter::new(root.join(".mem"))?);
    let work = Arc::new(LocalStorageAdapter::new(root.join("current"))?);
    match EncryptionConfig::load(meta.as_ref())? {
        Some(config) => {
            let envelope = CryptoEnvelope::from_env(config, ENCRYPTION_PASSPHRASE_VAR);
            Ok(Repository::with_sealer(meta, work, envelope))
        }
        None => Ok(Repository::new(meta, work)),
    }
}

fn author(name: String, email: String) -> Author {
    Author { name, email }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose).ok();
    let root = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));
    match run(cli, &root) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if err.downcast_ref::<DistillError>().map(|e| matches!(e, DistillError::PrivacyBudgetExceeded)).unwrap_or(false) {
                eprintln!("error: {err:#}");
                std::process::exit(2);
            }
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli, root: &Path) -> Result<()> {
    match cli.command {
        Commands::Init { branch, encrypt } => cmd_init(root, &branch, encrypt),
        Commands::Add { paths } => cmd_add(root, &paths),
        Commands::Commit { message, author_name, author_email } => {
            cmd_commit(root, &message, author(author_name, author_email))
        }
        Commands::Log { max, since } => cmd_log(root, max, since.as_deref()),
        Commands::Status => cmd_status(root),
        Commands::Checkout { target, force } => cmd_checkout(root, &target, force),
        Commands::Diff { a, b } => cmd_diff(root, &a, &b),
        Commands::Branch { action } => cmd_branch(root, action),
        Commands::Tag { name, target } => cmd_tag(root, &name, &target),
        Commands::Verify => cmd_verify(root),
        Commands::Distill { source_dir, target_dir, use_dp, dp_epsilon, author_name, author_email } => {
            cmd_distill(root, source_dir, target_dir, use_dp, dp_epsilon, author(author_name, author_email))
        }
        Commands::Confidence { action } => cmd_confidence(root, action),
        Commands::Session { action } => cmd_session(root, action),
    }
}

fn cmd_init(root: &Path, branch: &str, encrypt: bool) -> Result<()> {
    let meta = Arc::new(LocalStorageAdapter::new(root.join(".mem"))?);
    let work = Arc::new(LocalStorageAdapter::new(root.join("current"))?);
    if encrypt {
        init_encryption(meta.as_ref(), 3, 65536, 4).context("initializing encryption config")?;
    }
    Repository::init(meta, work, branch)?;
    println!("initialized empty repository at {} (default branch '{branch}')", root.display());
    Ok(())
}

fn cmd_add(root: &Path, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        bail!("add requires at least one path");
    }
    let repo = open_repo(root)?;
    for p in paths {
        if repo.work_storage().is_dir(p).unwrap_or(false) {
            let added = repo.add_directory(p)?;
            for a in added {
                println!("added {a}");
            }
        } else {
            repo.add(p)?;
            println!("added {p}");
        }
    }
    Ok(())
}

fn cmd_commit(root: &Path, message: &str, who: Author) -> Result<()> {
    let repo = open_repo(root)?;
    match repo.commit(message, who, Default::default())? {
        Some(hash) => println!("[{}] {message}", &hash[..12.min(hash.len())]),
        None => println!("nothing staged, commit skipped"),
    }
    Ok(())
}

fn cmd_log(root: &Path, max: Option<usize>, since: Option<&str>) -> Result<()> {
    let repo = open_repo(root)?;
    for record in repo.log(max, since)? {
        println!("commit {}", record.hash);
        println!("Author: {} <{}>", record.commit.author.name, record.commit.author.email);
        println!("Date:   {}", record.commit.timestamp);
        println!();
        println!("    {}", record.commit.message);
        println!();
    }
    Ok(())
}

fn cmd_status(root: &Path) -> Result<()> {
    let repo = open_repo(root)?;
    let report = repo.status()?;
    println!("staged:");
    for e in &report.staged {
        println!("  {e}");
    }
    println!("modified:");
    for p in &report.modified {
        println!("  {p}");
    }
    println!("untracked:");
    for p in &report.untracked {
        println!("  {p}");
    }
    println!("deleted:");
    for p in &report.deleted {
        println!("  {p}");
    }
    Ok(())
}

fn cmd_checkout(root: &Path, target: &str, force: bool) -> Result<()> {
    let repo = open_repo(root)?;
    let hash = repo.checkout(target, force)?;
    println!("checked out {target} ({hash})");
    Ok(())
}

fn cmd_diff(root: &Path, a: &str, b: &str) -> Result<()> {
    let repo = open_repo(root)?;
    let diff = repo.diff(a, b)?;
    for added in &diff.added {
        println!("+ {added}");
    }
    for deleted in &diff.deleted {
        println!("- {deleted}");
    }
    for modified in &diff.modified {
        println!("~ {modified}");
    }
    Ok(())
}

fn cmd_branch(root: &Path, action: BranchAction) -> Result<()> {
    let repo = open_repo(root)?;
    match action {
        BranchAction::Create { name, at } => {
            repo.create_branch(&name, &at)?;
            println!("created branch {name} at {at}");
        }
        BranchAction::Delete { name } => {
            repo.delete_branch(&name)?;
            println!("deleted branch {name}");
        }
    }
    Ok(())
}

fn cmd_tag(root: &Path, name: &str, target: &str) -> Result<()> {
    let repo = open_repo(root)?;
    repo.tag(name, target)?;
    println!("tagged {target} as {name}");
    Ok(())
}

fn cmd_verify(root: &Path) -> Result<()> {
    let repo = open_repo(root)?;
    let report = integrity::verify(repo.work_storage().as_ref(), "")?;
    if report.verified {
        println!("merkle snapshot verified, no drift detected");
    } else {
        println!("merkle verification FAILED:");
        for path in &report.modified {
            println!("  modified: {path}");
        }
        for path in &report.added {
            println!("  added: {path}");
        }
        for path in &report.deleted {
            println!("  deleted: {path}");
        }
        bail!("integrity check failed");
    }
    Ok(())
}

fn cmd_distill(
    root: &Path,
    source_dir: String,
    target_dir: String,
    use_dp: bool,
    dp_epsilon: f64,
    who: Author,
) -> Result<()> {
    let repo = open_repo(root)?;
    let config = DistillConfig {
        source_dir,
        target_dir,
        use_dp,
        dp_epsilon,
        ..Default::default()
    };
    let result = memvcs_distill::run(&repo, &config, None, who)?;
    println!("{}", result.message);
    if let Some(branch) = &result.branch_created {
        println!("safety branch: {branch}");
    }
    if let Some(hash) = &result.commit_hash {
        println!("commit: {hash}");
    }
    Ok(())
}

fn cmd_confidence(root: &Path, action: ConfidenceAction) -> Result<()> {
    let repo = open_repo(root)?;
    let storage = repo.meta_storage().as_ref();
    let decay_model = DecayModel::new(DecayKind::Exponential, 30.0);
    let mut calc = ConfidenceCalculator::load(storage, decay_model)?;
    match action {
        ConfidenceAction::Score { path, source_id, created_at } => {
            let score = calc.calculate_score(storage, &path, source_id.as_deref(), created_at.as_deref())?;
            println!("{path}: {:.3}", score.score);
        }
        ConfidenceAction::Show { path } => match calc.get_score(&path) {
            Some(score) => println!("{path}: {:.3}", score.score),
            None => println!("{path}: no score recorded"),
        },
        ConfidenceAction::Corroborate { path } => {
            calc.add_corroboration(storage, &path)?;
            println!("recorded corroboration for {path}");
        }
        ConfidenceAction::Contradict { path } => {
            calc.add_contradiction(storage, &path)?;
            println!("recorded contradiction for {path}");
        }
        ConfidenceAction::Access { path } => {
            calc.record_access(storage, &path)?;
            println!("recorded access for {path}");
        }
        ConfidenceAction::Low { threshold } => {
            for (path, score) in calc.get_low_confidence_memories(threshold) {
                println!("{path}: {score:.3}");
            }
        }
    }
    Ok(())
}

fn cmd_session(root: &Path, action: SessionAction) -> Result<()> {
    let repo = open_repo(root)?;
    let mut manager = SessionManager::new(&repo, SessionConfig::default())?;
    match action {
        SessionAction::Start { context } => {
            let session = manager.start_session(context)?;
            println!("session {} started", session.id);
        }
        SessionAction::Observe { tool_name, arguments, result, author_name, author_email } => {
            let args: serde_json::Value = serde_json::from_str(&arguments)
                .map_err(|e| anyhow!("invalid --arguments JSON: {e}"))?;
            let (id, committed) = manager.add_observation(&tool_name, args, result, author(author_name, author_email))?;
            println!("observed {id}");
            if let Some(hash) = committed {
                println!("auto-committed: {hash}");
            }
        }
        SessionAction::End { author_name, author_email } => {
            match manager.end_session(true, author(author_name, author_email))? {
                Some(hash) => println!("session ended, committed {hash}"),
                None => println!("session ended, nothing to commit"),
            }
        }
        SessionAction::Pause => {
            manager.pause_session()?;
            println!("session paused");
        }
        SessionAction::Resume => match manager.resume_session()? {
            Some(session) => println!("session {} resumed", session.id),
            None => println!("no paused session to resume"),
        },
        SessionAction::Discard => {
            manager.discard_session()?;
            println!("session discarded");
        }
        SessionAction::Status => {
            let report = manager.status();
            if report.active {
                println!("session {}: {} observations, {} topics", report.session_id.unwrap_or_default(), report.observation_count, report.topics.len());
            } else {
                println!("no active session");
            }
        }
    }
    Ok(())
}
