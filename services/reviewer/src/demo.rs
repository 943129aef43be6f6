use std::collections::BTreeMap;
use std::sync::Arc;

use badge_award::badges::definitions::create_badge;
use badge_award::badges::{
    progress_view, Aggregation, Badge, BadgeDefinition, BadgeExpiry, BadgeOwner, BadgeStore,
    BatchReviewer, CompletionState, CourseId, CriterionRecord, FactsSnapshot, LearnerId,
    MemoryBadgeStore, ModuleId, TracingNotifier,
};
use badge_award::error::AppError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Args;

use crate::infra::review_instant;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Review date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
}

fn overall(method: Aggregation) -> CriterionRecord {
    CriterionRecord {
        criterion_type: "overall".to_string(),
        method,
        description: None,
        params: BTreeMap::new(),
    }
}

fn activity(module: i64, by_date: Option<DateTime<Utc>>) -> CriterionRecord {
    let mut params = BTreeMap::new();
    params.insert(format!("module_{module}"), module.to_string());
    if let Some(cutoff) = by_date {
        params.insert(format!("bydate_{module}"), cutoff.timestamp().to_string());
    }
    CriterionRecord {
        criterion_type: "activity".to_string(),
        method: Aggregation::All,
        description: None,
        params,
    }
}

fn definition(name: &str, owner: BadgeOwner, criteria: Vec<CriterionRecord>) -> BadgeDefinition {
    BadgeDefinition {
        name: name.to_string(),
        owner,
        expiry: BadgeExpiry::Never,
        activate: true,
        criteria,
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let now = review_instant(args.today);
    let cutoff = now - Duration::days(10);
    let course = CourseId(2);

    let store = Arc::new(MemoryBadgeStore::new());
    let badges: Vec<Badge> = [
        definition(
            "Orientation complete",
            BadgeOwner::Course(course),
            vec![overall(Aggregation::All), activity(7, Some(cutoff))],
        ),
        definition(
            "Either quiz",
            BadgeOwner::Site,
            vec![
                overall(Aggregation::Any),
                activity(3, None),
                activity(4, None),
            ],
        ),
        definition(
            "Retired lab",
            BadgeOwner::Site,
            vec![overall(Aggregation::All), activity(99, None)],
        ),
    ]
    .into_iter()
    .map(|definition| create_badge(store.as_ref(), definition))
    .collect::<Result<_, _>>()?;

    let mut facts = FactsSnapshot::default()
        .with_course(course, Some(now - Duration::days(60)))
        .with_activity(ModuleId(7), course)
        .with_activity(ModuleId(3), course)
        .with_activity(ModuleId(4), course)
        .complete_activity(
            ModuleId(7),
            LearnerId(21),
            CompletionState::Complete,
            cutoff - Duration::days(1),
        )
        .complete_activity(
            ModuleId(7),
            LearnerId(22),
            CompletionState::Complete,
            cutoff + Duration::days(1),
        )
        .complete_activity(
            ModuleId(4),
            LearnerId(23),
            CompletionState::CompletePass,
            now - Duration::days(3),
        )
        .complete_activity(
            ModuleId(99),
            LearnerId(23),
            CompletionState::Complete,
            now - Duration::days(3),
        );
    for learner in [21, 22, 23] {
        facts = facts
            .with_site_learner(LearnerId(learner))
            .enrol(course, LearnerId(learner));
    }

    println!("Badge award review demo ({})", now.format("%Y-%m-%d"));
    println!("Orientation cutoff: {}", cutoff.format("%Y-%m-%d"));

    let reviewer = BatchReviewer::new(store.clone(), Arc::new(facts), Arc::new(TracingNotifier));
    let first = reviewer.run_review_pass(now)?;
    println!("\nFirst pass: {}", first.summary());
    let second = reviewer.run_review_pass(now + Duration::hours(1))?;
    println!("Second pass: {}", second.summary());

    for badge in &badges {
        let stored = store.badge(badge.id)?.unwrap_or_else(|| badge.clone());
        println!("\n{} [{}] ({})", stored.name, stored.id, stored.status.label());
        for learner in [21, 22, 23] {
            let view = progress_view(store.as_ref(), &stored, LearnerId(learner))?;
            println!(
                "  learner {}: {} ({}/{} criteria met){}",
                learner,
                view.status,
                view.criteria_met,
                view.criteria_total,
                view.token
                    .map(|token| format!(" token {}", &token[..12]))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}
