use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use badge_award::badges::{FactsSnapshot, SqliteBadgeStore};
use badge_award::config::AppConfig;
use badge_award::error::AppError;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::cli::WatchArgs;
use crate::infra::{load_facts, open_store, run_pass};

/// Run review passes back to back on a fixed interval until Ctrl-C.
///
/// Facts are reloaded before every pass. A pass that fails is logged and retried on the next tick.
pub(crate) async fn run(config: &AppConfig, args: WatchArgs) -> Result<(), AppError> {
    let store = open_store(config, args.sources.database.as_deref())?;
    let period = args
        .interval_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(config.review.interval);

    // Fail fast on a missing snapshot rather than on the first tick.
    load_facts(config, &args.sources)?;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Single listener for the whole loop; a signal sent mid-pass must still end it.
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!(interval_secs = period.as_secs(), "periodic badge review started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("shutdown requested; stopping badge review");
                return Ok(());
            }
        }

        let facts = match load_facts(config, &args.sources) {
            Ok(facts) => facts,
            Err(err) => {
                warn!(error = %err, "could not load learner facts; skipping pass");
                continue;
            }
        };

        if review_until_shutdown(store.clone(), facts, &mut shutdown).await == Tick::Shutdown {
            info!("shutdown requested; stopping after the running pass");
            return Ok(());
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Tick {
    Reviewed,
    Shutdown,
}

/// Run one pass on the blocking pool while still listening for `shutdown`.
///
/// On shutdown the pass in flight is left to finish on the pool.
async fn review_until_shutdown<S>(
    store: Arc<SqliteBadgeStore>,
    facts: Arc<FactsSnapshot>,
    shutdown: &mut std::pin::Pin<&mut S>,
) -> Tick
where
    S: Future,
{
    let pass = tokio::task::spawn_blocking(move || run_pass(store, facts, Utc::now()));

    tokio::select! {
        biased;
        _ = shutdown.as_mut() => Tick::Shutdown,
        joined = pass => {
            match joined {
                Ok(Ok(report)) => info!(summary = %report.summary(), "review pass complete"),
                Ok(Err(err)) => error!(error = %err, "review pass aborted"),
                Err(err) => error!(error = %err, "review pass task failed"),
            }
            Tick::Reviewed
        }
    }
}
