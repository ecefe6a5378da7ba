use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram::cli;
use engram::config::EngramConfig;
use engram::error::EngramError;
use engram::graph::RelationType;
use engram::scheduler::Grade;
use engram::store::types::Scope;

#[derive(Parser)]
#[command(name = "engram", version, about = "Local-first knowledge memory engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consolidate a session transcript into memories
    Consolidate {
        /// Path to the JSONL transcript
        transcript: String,
        /// Project to file new memories under (defaults to config)
        #[arg(long)]
        project: Option<String>,
        /// Session id (defaults to the transcript file stem)
        #[arg(long)]
        session: Option<String>,
        /// Also run LLM extraction (requires llm_enabled)
        #[arg(long)]
        llm: bool,
    },
    /// Run the daily maintenance pipeline
    Maintenance {
        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Override the memory directory
        #[arg(long)]
        memory_dir: Option<String>,
    },
    /// Weekly freshness review over stale memories
    Freshness {
        /// Mark a memory as refreshed (reinforces it)
        #[arg(long)]
        refresh: Option<String>,
        /// Archive a stale memory
        #[arg(long)]
        archive: Option<String>,
        /// Scan with a custom staleness threshold (read-only)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Hybrid search over the memory corpus
    Search {
        query: String,
        #[arg(long)]
        project: Option<String>,
        /// Filter by tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        min_importance: Option<f64>,
        /// Filter by scope: project or global
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Spaced-repetition review queue
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Link two memories in the relationship graph
    Relate {
        from: String,
        to: String,
        /// causal, contradicts, supports, requires, or related
        relationship_type: String,
        #[arg(long, default_value_t = 0.5)]
        strength: f64,
        #[arg(long)]
        evidence: Option<String>,
    },
    /// Host-facing hooks (JSON payload on stdin)
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
    /// Run the background queue consumer
    Worker {
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },
    /// Rebuild the derived index and embedding caches from the files
    Reindex,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// Show memories due for review
    Next {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        project: Option<String>,
    },
    /// Record a review outcome: FAIL, HARD, GOOD, or EASY
    Record { memory_id: String, grade: String },
}

#[derive(Subcommand)]
enum HookAction {
    /// Session-end: enqueue the transcript for async consolidation
    SessionEnd,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the cache directory
    Download,
}

#[tokio::main]
async fn main() {
    // Usage errors exit 1 per the interface contract.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() { 1 } else { 0 };
            std::process::exit(code);
        }
    };

    let config = match EngramConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    // Log to stderr so stdout stays clean for command output and the hook.
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit = run(cli, config).await;
    std::process::exit(exit);
}

async fn run(cli: Cli, config: EngramConfig) -> i32 {
    let result: Result<(), EngramError> = match cli.command {
        Command::Consolidate {
            transcript,
            project,
            session,
            llm,
        } => cli::consolidate::run(
            &config,
            &transcript,
            project.as_deref(),
            session.as_deref(),
            llm,
        ),
        Command::Maintenance { dry_run, memory_dir } => {
            cli::maintenance::daily(&config, dry_run, memory_dir.as_deref())
        }
        Command::Freshness {
            refresh,
            archive,
            days,
        } => cli::maintenance::freshness(&config, refresh.as_deref(), archive.as_deref(), days),
        Command::Search {
            query,
            project,
            tags,
            min_importance,
            scope,
            limit,
        } => {
            let scope = match scope.as_deref().map(str::parse::<Scope>).transpose() {
                Ok(scope) => scope,
                Err(e) => return usage_error(&e),
            };
            cli::search::run(
                &config,
                &query,
                project.as_deref(),
                &tags,
                min_importance,
                scope,
                limit,
            )
        }
        Command::Review { action } => match action {
            ReviewAction::Next { limit, project } => {
                cli::review::next(&config, limit, project.as_deref())
            }
            ReviewAction::Record { memory_id, grade } => {
                match grade.parse::<Grade>() {
                    Ok(grade) => cli::review::record(&config, &memory_id, grade),
                    Err(e) => return usage_error(&e),
                }
            }
        },
        Command::Relate {
            from,
            to,
            relationship_type,
            strength,
            evidence,
        } => match relationship_type.parse::<RelationType>() {
            Ok(rtype) => cli::relate::run(&config, &from, &to, rtype, strength, evidence.as_deref()),
            Err(e) => return usage_error(&e),
        },
        Command::Hook { action } => match action {
            HookAction::SessionEnd => {
                return engram::hook::session_end(&config, &mut std::io::stdin());
            }
        },
        Command::Worker { once } => cli::worker::run(&config, once).await,
        Command::Reindex => cli::reindex::run(&config),
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding)
                .await
                .map_err(EngramError::Other),
        },
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

fn usage_error(e: &EngramError) -> i32 {
    eprintln!("error: {e}");
    1
}
