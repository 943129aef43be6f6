use std::path::PathBuf;

use badge_award::badges::{progress_view, BadgeId, BadgeStore, LearnerId, RepositoryError};
use badge_award::config::AppConfig;
use badge_award::error::AppError;
use badge_award::telemetry;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::demo::{run_demo, DemoArgs};
use crate::infra::{import_badges, load_facts, open_store, review_instant, run_pass};
use crate::watch;

#[derive(Parser, Debug)]
#[command(
    name = "Badge Reviewer",
    about = "Configure badges and issue awards whose criteria learners have met",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Review badges on a fixed interval until interrupted (default command)
    Watch(WatchArgs),
    /// Run a single review pass and print the report
    Run(RunArgs),
    /// Create badges and criteria from a JSON definition file
    Import(ImportArgs),
    /// Show a learner's progress towards one badge
    Progress(ProgressArgs),
    /// Walk through the award scenarios against an in-memory store
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub(crate) struct SourceArgs {
    /// SQLite database holding badges and awards (defaults to APP_DATABASE_PATH)
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
    /// JSON facts snapshot (defaults to APP_FACTS_PATH)
    #[arg(long)]
    pub(crate) facts: Option<PathBuf>,
    /// Completion export (CSV) merged over the snapshot before reviewing
    #[arg(long)]
    pub(crate) completions: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct WatchArgs {
    #[command(flatten)]
    pub(crate) sources: SourceArgs,
    /// Seconds between passes (defaults to APP_REVIEW_INTERVAL_SECS)
    #[arg(long)]
    pub(crate) interval_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    #[command(flatten)]
    pub(crate) sources: SourceArgs,
    /// Review as of this date (YYYY-MM-DD) instead of now
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Print the report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// JSON file with one badge definition or a list of them
    pub(crate) definitions: PathBuf,
    /// SQLite database to write to (defaults to APP_DATABASE_PATH)
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct ProgressArgs {
    #[arg(long)]
    pub(crate) badge: i64,
    #[arg(long)]
    pub(crate) learner: i64,
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Watch(WatchArgs::default()));

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    info!(environment = ?config.environment, "badge reviewer starting");

    match command {
        Command::Watch(args) => watch::run(&config, args).await,
        Command::Run(args) => {
            let store = open_store(&config, args.sources.database.as_deref())?;
            let facts = load_facts(&config, &args.sources)?;
            let report = run_pass(store, facts, review_instant(args.as_of))?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.summary());
                for failure in &report.failures {
                    match failure.learner_id {
                        Some(learner) => println!(
                            "  badge {} learner {}: {}",
                            failure.badge_id, learner, failure.message
                        ),
                        None => println!("  badge {}: {}", failure.badge_id, failure.message),
                    }
                }
            }
            Ok(())
        }
        Command::Import(args) => {
            let store = open_store(&config, args.database.as_deref())?;
            let badges = import_badges(store.as_ref(), &args.definitions)?;
            for badge in &badges {
                println!(
                    "{} [{}] {} criteria, {}",
                    badge.name,
                    badge.id,
                    badge.criteria.len(),
                    badge.status.label()
                );
            }
            Ok(())
        }
        Command::Progress(args) => {
            let store = open_store(&config, args.database.as_deref())?;
            let badge = store
                .badge(BadgeId(args.badge))?
                .ok_or(RepositoryError::NotFound)?;
            let view = progress_view(store.as_ref(), &badge, LearnerId(args.learner))?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Command::Demo(args) => run_demo(args),
    }
}
