//! Operator CLI for the moderation queue.
//!
//! Inspection plus the moderation actions that do not require the
//! platform's save pipeline. Approve and merge are absent on purpose:
//! replaying a change needs the save path, which only exists inside the
//! platform process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use modqueue_core::{
    ApprovalEngine, ChangeId, LiveConsequenceManager, LoggingNotifier, ModerationConfig,
    ModerationRepository, NewestPendingStamp, PassthroughResolver, PendingChange, Reviewer,
    SqliteRepository, UnavailableSavePipeline, UserRef,
};

/// Moderation queue operator tool
#[derive(Parser, Debug)]
#[command(name = "modqueue")]
#[command(about = "Inspect and act on the pending-change moderation queue", long_about = None)]
struct Cli {
    /// Path to the moderation database (or MODQUEUE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List queued changes
    List(ListArgs),
    /// Show one queued change in full
    Show(ShowArgs),
    /// Reject a queued change
    Reject(RejectArgs),
    /// Reject every pending change by an author
    RejectAll(RejectAllArgs),
    /// Put an author under a standing moderation block
    Block(AuthorArgs),
    /// Lift a standing moderation block
    Unblock(AuthorArgs),
    /// Print the audit log
    Audit,
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Include rejected and merged rows
    #[arg(long)]
    all: bool,
}

#[derive(Parser, Debug)]
struct ShowArgs {
    /// Queue row id
    id: i64,
}

#[derive(Parser, Debug)]
struct RejectArgs {
    /// Queue row id
    id: i64,

    /// Reviewer name recorded in the audit log
    #[arg(long)]
    reviewer: String,
}

#[derive(Parser, Debug)]
struct RejectAllArgs {
    /// Author whose pending changes are rejected
    author: String,

    /// Reviewer name recorded in the audit log
    #[arg(long)]
    reviewer: String,
}

#[derive(Parser, Debug)]
struct AuthorArgs {
    /// Author the block applies to
    author: String,

    /// Reviewer name recorded in the audit log
    #[arg(long)]
    reviewer: String,
}

fn db_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = &cli.db {
        return Ok(path.clone());
    }
    std::env::var("MODQUEUE_DB_PATH")
        .map(PathBuf::from)
        .context("pass --db or set MODQUEUE_DB_PATH")
}

fn engine(repository: Arc<SqliteRepository>) -> Result<ApprovalEngine> {
    let manager = Arc::new(LiveConsequenceManager::new(
        repository.clone(),
        Arc::new(UnavailableSavePipeline),
        Arc::new(LoggingNotifier),
        Arc::new(NewestPendingStamp::new()),
    ));
    let config = ModerationConfig::from_env()?;
    Ok(ApprovalEngine::new(
        repository,
        manager,
        Arc::new(PassthroughResolver),
        config,
    ))
}

fn cli_reviewer(name: &str) -> Reviewer {
    Reviewer::new(UserRef::anonymous(name), false)
}

fn describe_state(change: &PendingChange) -> String {
    if let Some(revision) = change.state.merged_into {
        return format!("merged into r{}", revision);
    }
    if change.state.conflict {
        return "conflict".to_string();
    }
    if change.state.rejected {
        return if change.state.rejected_automatically {
            "rejected (automatic)".to_string()
        } else {
            "rejected".to_string()
        };
    }
    "pending".to_string()
}

fn print_row(change: &PendingChange) {
    println!(
        "{:>6}  {:<7} {:<22} {:<20} {}",
        change.id.0,
        change.kind.name(),
        change.target.to_string(),
        change.author.name,
        describe_state(change),
    );
}

async fn run(cli: Cli) -> Result<()> {
    let repository = Arc::new(
        SqliteRepository::new(&db_path(&cli)?).context("failed to open moderation database")?,
    );

    match cli.command {
        Commands::List(args) => {
            let rows = repository.list_all().await?;
            for change in rows.iter().filter(|change| {
                args.all || (!change.state.rejected && !change.state.is_merged())
            }) {
                print_row(change);
            }
        }

        Commands::Show(args) => {
            let id = ChangeId(args.id);
            match repository.get(id).await? {
                None => anyhow::bail!("change {} not found", args.id),
                Some(change) => {
                    println!("id:        {}", change.id);
                    println!("kind:      {}", change.kind.name());
                    println!("author:    {}", change.author.name);
                    println!("target:    {}", change.target);
                    println!("state:     {}", describe_state(&change));
                    println!("summary:   {}", change.summary);
                    println!("received:  {}", change.received_at.to_rfc3339());
                    println!("length:    {} -> {}", change.old_len, change.new_len);
                    println!();
                    println!("{}", change.content);
                }
            }
        }

        Commands::Reject(args) => {
            let engine = engine(repository)?;
            engine
                .reject(ChangeId(args.id), &cli_reviewer(&args.reviewer))
                .await?;
            println!("rejected change {}", args.id);
        }

        Commands::RejectAll(args) => {
            let engine = engine(repository)?;
            let count = engine
                .reject_all(&args.author, &cli_reviewer(&args.reviewer))
                .await?;
            println!("rejected {} change(s) by {}", count, args.author);
        }

        Commands::Block(args) => {
            let engine = engine(repository)?;
            let outcome = engine
                .block(&UserRef::anonymous(&args.author), &cli_reviewer(&args.reviewer))
                .await?;
            if outcome.noop {
                println!("{} was already blocked", args.author);
            } else {
                println!("blocked {}", args.author);
            }
        }

        Commands::Unblock(args) => {
            let engine = engine(repository)?;
            let outcome = engine
                .unblock(&UserRef::anonymous(&args.author), &cli_reviewer(&args.reviewer))
                .await?;
            if outcome.noop {
                println!("{} was not blocked", args.author);
            } else {
                println!("unblocked {}", args.author);
            }
        }

        Commands::Audit => {
            for entry in repository.list_audit().await? {
                let target = entry
                    .target
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                let subject = entry
                    .subject
                    .as_ref()
                    .map(|u| u.name.clone())
                    .unwrap_or_default();
                println!(
                    "{}  {:<16} by {:<16} {:<22} {}",
                    entry.at.to_rfc3339(),
                    entry.action.name(),
                    entry.performed_by.name,
                    target,
                    subject,
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    run(Cli::parse()).await
}
