use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use badge_award::badges::{
    import_definitions, Badge, BatchReviewer, FactsSnapshot, ReviewPassReport, SqliteBadgeStore,
    TracingNotifier,
};
use badge_award::config::{AppConfig, ConfigError};
use badge_award::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::cli::SourceArgs;

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Noon UTC on the given date, or the current time.
pub(crate) fn review_instant(date: Option<NaiveDate>) -> DateTime<Utc> {
    date.and_then(|date| date.and_hms_opt(12, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

pub(crate) fn open_store(
    config: &AppConfig,
    database: Option<&Path>,
) -> Result<Arc<SqliteBadgeStore>, AppError> {
    let path = database.unwrap_or(config.storage.database_path.as_path());
    let store = SqliteBadgeStore::open(path)?;
    info!(database = %path.display(), "badge store opened");
    Ok(Arc::new(store))
}

/// Load the snapshot named on the command line or in configuration, then merge any completion
/// export over it.
pub(crate) fn load_facts(
    config: &AppConfig,
    sources: &SourceArgs,
) -> Result<Arc<FactsSnapshot>, AppError> {
    let path = sources
        .facts
        .as_deref()
        .or(config.review.facts_path.as_deref())
        .ok_or(ConfigError::MissingFactsPath)?;
    let mut snapshot = FactsSnapshot::from_path(path)?;

    if let Some(completions) = &sources.completions {
        let applied = snapshot.import_completions_csv(File::open(completions)?)?;
        info!(rows = applied, file = %completions.display(), "completion export merged");
    }

    Ok(Arc::new(snapshot))
}

pub(crate) fn import_badges(
    store: &SqliteBadgeStore,
    definitions: &Path,
) -> Result<Vec<Badge>, AppError> {
    let file = File::open(definitions)?;
    Ok(import_definitions(store, file)?)
}

pub(crate) fn run_pass(
    store: Arc<SqliteBadgeStore>,
    facts: Arc<FactsSnapshot>,
    now: DateTime<Utc>,
) -> Result<ReviewPassReport, AppError> {
    let reviewer = BatchReviewer::new(store, facts, Arc::new(TracingNotifier));
    Ok(reviewer.run_review_pass(now)?)
}
