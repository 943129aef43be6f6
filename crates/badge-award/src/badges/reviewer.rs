use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::aggregator::{AwardAggregator, ReviewError, ReviewFailure};
use super::domain::{Badge, BadgeOwner};
use super::notifier::AwardNotifier;
use super::repository::BadgeStore;
use super::sources::{LearnerFacts, SourceError};

/// Totals reported by one review pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReviewPassReport {
    pub badges_reviewed: usize,
    pub learners_evaluated: usize,
    /// Awards issued during this pass; awards that already existed are not counted.
    pub awards_issued: usize,
    pub failures: Vec<ReviewFailure>,
}

impl ReviewPassReport {
    pub fn summary(&self) -> String {
        format!(
            "reviewed {} badge(s) for {} learner(s): {} award(s) issued, {} failure(s)",
            self.badges_reviewed,
            self.learners_evaluated,
            self.awards_issued,
            self.failures.len()
        )
    }
}

/// Periodic driver that reviews every active badge for its candidate learners.
pub struct BatchReviewer<S, F, N> {
    store: Arc<S>,
    facts: Arc<F>,
    aggregator: AwardAggregator<S, F, N>,
}

impl<S, F, N> BatchReviewer<S, F, N>
where
    S: BadgeStore + 'static,
    F: LearnerFacts + 'static,
    N: AwardNotifier + 'static,
{
    pub fn new(store: Arc<S>, facts: Arc<F>, notifier: Arc<N>) -> Self {
        let aggregator = AwardAggregator::new(store.clone(), facts.clone(), notifier);
        Self {
            store,
            facts,
            aggregator,
        }
    }

    /// Run one pass over all reviewable badges.
    ///
    /// Only a failure to list badges aborts the pass; everything else is recorded in the report
    /// and the pass moves on. Re-running after a partial failure is safe.
    pub fn run_review_pass(&self, now: DateTime<Utc>) -> Result<ReviewPassReport, ReviewError> {
        let mut report = ReviewPassReport::default();

        for badge in self.store.badges()? {
            match self.is_reviewable(&badge, now) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(badge_id = %badge.id, error = %err, "could not check badge owner");
                    report.failures.push(ReviewFailure {
                        badge_id: badge.id,
                        learner_id: None,
                        message: err.to_string(),
                    });
                    continue;
                }
            }

            let learners = match self.facts.candidates(&badge) {
                Ok(learners) => learners,
                Err(err) => {
                    warn!(badge_id = %badge.id, error = %err, "could not list candidate learners");
                    report.failures.push(ReviewFailure {
                        badge_id: badge.id,
                        learner_id: None,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            report.badges_reviewed += 1;
            let review = self.aggregator.review_badge(&badge, learners, now);
            if review.awards_issued > 0 {
                info!(
                    badge_id = %badge.id,
                    issued = review.awards_issued,
                    "badge review issued awards"
                );
            }
            report.learners_evaluated += review.learners_evaluated;
            report.awards_issued += review.awards_issued;
            report.failures.extend(review.failures);
        }

        info!(
            badges = report.badges_reviewed,
            learners = report.learners_evaluated,
            issued = report.awards_issued,
            failures = report.failures.len(),
            "badge review pass finished"
        );
        Ok(report)
    }

    /// Active badges with criteria whose course, if any, is visible and has started.
    fn is_reviewable(&self, badge: &Badge, now: DateTime<Utc>) -> Result<bool, SourceError> {
        if !badge.status.is_active() || !badge.has_criteria() {
            return Ok(false);
        }

        match badge.owner {
            BadgeOwner::Site => Ok(true),
            BadgeOwner::Course(course) => Ok(self
                .facts
                .course(course)?
                .is_some_and(|info| info.visible && info.has_started(now))),
        }
    }
}
