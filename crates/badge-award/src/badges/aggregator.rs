use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::criteria::ReviewContext;
use super::domain::{Award, Badge, BadgeId, BadgeStatus, LearnerId};
use super::notifier::{AwardNotice, AwardNotifier};
use super::repository::{BadgeStore, RepositoryError};
use super::sources::{LearnerFacts, SourceError};

/// Result of reviewing one learner against one badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LearnerReview {
    /// Issued during this review.
    Awarded(Award),
    /// Some criteria are still unmet.
    Pending { met: usize, total: usize },
    /// An award existed before this review, or a concurrent pass inserted it first.
    AlreadyAwarded,
}

impl LearnerReview {
    pub fn is_new_award(&self) -> bool {
        matches!(self, LearnerReview::Awarded(_))
    }
}

/// Failure isolated to one badge or one (badge, learner) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFailure {
    pub badge_id: BadgeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learner_id: Option<LearnerId>,
    pub message: String,
}

/// Outcome of reviewing a badge for a batch of learners.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BadgeReview {
    pub learners_evaluated: usize,
    pub awards_issued: usize,
    pub failures: Vec<ReviewFailure>,
}

/// Combines the criteria of a badge into an award decision and issues the award once.
pub struct AwardAggregator<S, F, N> {
    store: Arc<S>,
    facts: Arc<F>,
    notifier: Arc<N>,
}

impl<S, F, N> AwardAggregator<S, F, N>
where
    S: BadgeStore + 'static,
    F: LearnerFacts + 'static,
    N: AwardNotifier + 'static,
{
    pub fn new(store: Arc<S>, facts: Arc<F>, notifier: Arc<N>) -> Self {
        Self {
            store,
            facts,
            notifier,
        }
    }

    /// Review every criterion of `badge` for `learner` and issue the badge when complete.
    ///
    /// Phase one evaluates the non-overall criteria and persists a met record for each one that
    /// holds. Phase two evaluates the overall criterion against those persisted records.
    pub fn review_learner(
        &self,
        badge: &Badge,
        learner: LearnerId,
        now: DateTime<Utc>,
    ) -> Result<LearnerReview, ReviewError> {
        if self.store.award(badge.id, learner)?.is_some() {
            return Ok(LearnerReview::AlreadyAwarded);
        }

        let overall = badge
            .overall()
            .ok_or(ReviewError::MissingOverall(badge.id))?;
        let ctx = ReviewContext {
            store: self.store.as_ref(),
            facts: self.facts.as_ref(),
            badge,
        };

        let mut met = 0;
        let mut total = 0;
        for criterion in badge.requirements() {
            total += 1;
            if self.store.criterion_met(criterion.id, learner)?.is_some() {
                met += 1;
                continue;
            }
            if criterion.review(&ctx, learner)? {
                criterion.mark_complete(self.store.as_ref(), learner, now)?;
                debug!(
                    badge_id = %badge.id,
                    criterion_id = %criterion.id,
                    learner_id = %learner,
                    "criterion met"
                );
                met += 1;
            }
        }

        if !overall.review(&ctx, learner)? {
            return Ok(LearnerReview::Pending { met, total });
        }
        overall.mark_complete(self.store.as_ref(), learner, now)?;

        self.issue(badge, learner, now)
    }

    /// Review a badge for each learner, isolating failures per learner.
    pub fn review_badge<I>(&self, badge: &Badge, learners: I, now: DateTime<Utc>) -> BadgeReview
    where
        I: IntoIterator<Item = LearnerId>,
    {
        let mut review = BadgeReview::default();
        for learner in learners {
            review.learners_evaluated += 1;
            match self.review_learner(badge, learner, now) {
                Ok(outcome) if outcome.is_new_award() => review.awards_issued += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        badge_id = %badge.id,
                        learner_id = %learner,
                        error = %err,
                        "badge review failed for learner"
                    );
                    review.failures.push(ReviewFailure {
                        badge_id: badge.id,
                        learner_id: Some(learner),
                        message: err.to_string(),
                    });
                }
            }
        }
        review
    }

    fn issue(
        &self,
        badge: &Badge,
        learner: LearnerId,
        now: DateTime<Utc>,
    ) -> Result<LearnerReview, ReviewError> {
        let award = Award::issue(badge, learner, now);
        if !self.store.insert_award(award.clone())? {
            debug!(badge_id = %badge.id, learner_id = %learner, "award already present");
            return Ok(LearnerReview::AlreadyAwarded);
        }

        info!(badge_id = %badge.id, learner_id = %learner, "badge awarded");

        // The award row is already committed here.
        if let Err(err) = self.lock_after_award(badge.id) {
            warn!(badge_id = %badge.id, error = %err, "could not lock awarded badge");
        }

        let notice = AwardNotice {
            badge_id: badge.id,
            badge_name: badge.name.clone(),
            learner_id: learner,
            issued_at: award.issued_at,
            expires_at: award.expires_at,
            token: award.token.clone(),
        };
        if let Err(err) = self.notifier.notify(&notice) {
            warn!(
                badge_id = %badge.id,
                learner_id = %learner,
                error = %err,
                "award notification failed"
            );
        }

        Ok(LearnerReview::Awarded(award))
    }

    /// Lock criteria editing on the first award. Reads the stored status so later awards in the
    /// same pass leave an already locked badge alone.
    fn lock_after_award(&self, badge_id: BadgeId) -> Result<(), RepositoryError> {
        let Some(mut stored) = self.store.badge(badge_id)? else {
            return Ok(());
        };
        if stored.status != BadgeStatus::Active {
            return Ok(());
        }
        let status = stored.lock();
        self.store.set_status(badge_id, status)?;
        debug!(badge_id = %badge_id, status = status.label(), "badge locked after first award");
        Ok(())
    }
}

/// Error raised while reviewing a badge.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("badge {0} has no overall criterion")]
    MissingOverall(BadgeId),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
