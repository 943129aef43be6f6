use serde::Serialize;

use super::criteria::{Criterion, CriterionError, CriterionRecord, CriterionType};
use super::domain::{
    Award, Badge, BadgeId, BadgeStatus, CriterionId, CriterionMetRecord, LearnerId, ManualAward,
    NewBadge, RoleId,
};

/// Storage abstraction so the aggregator and reviewer can be exercised in isolation.
///
/// Implementations must enforce uniqueness of awards per (badge, learner) and of met records per
/// (criterion, learner) themselves; the boolean-returning inserts report `false` instead of an
/// error when the row already exists.
pub trait BadgeStore: Send + Sync {
    fn insert_badge(&self, badge: NewBadge) -> Result<Badge, RepositoryError>;
    fn badge(&self, id: BadgeId) -> Result<Option<Badge>, RepositoryError>;
    fn badges(&self) -> Result<Vec<Badge>, RepositoryError>;
    fn set_status(&self, id: BadgeId, status: BadgeStatus) -> Result<(), RepositoryError>;
    /// Removes the badge with its criteria, met records, manual awards and awards.
    fn delete_badge(&self, id: BadgeId) -> Result<(), RepositoryError>;

    fn add_criterion(
        &self,
        badge: BadgeId,
        record: CriterionRecord,
    ) -> Result<Criterion, RepositoryError>;
    /// Removes the criterion with its met records.
    fn delete_criterion(&self, id: CriterionId) -> Result<(), RepositoryError>;

    fn criterion_met(
        &self,
        criterion: CriterionId,
        learner: LearnerId,
    ) -> Result<Option<CriterionMetRecord>, RepositoryError>;
    fn met_records(
        &self,
        badge: BadgeId,
        learner: LearnerId,
    ) -> Result<Vec<CriterionMetRecord>, RepositoryError>;
    fn mark_criterion_met(&self, record: CriterionMetRecord) -> Result<bool, RepositoryError>;

    fn record_manual_award(&self, award: ManualAward) -> Result<bool, RepositoryError>;
    fn manual_award_exists(
        &self,
        badge: BadgeId,
        learner: LearnerId,
        role: RoleId,
    ) -> Result<bool, RepositoryError>;

    fn award(&self, badge: BadgeId, learner: LearnerId) -> Result<Option<Award>, RepositoryError>;
    fn awards(&self, badge: BadgeId) -> Result<Vec<Award>, RepositoryError>;
    fn insert_award(&self, award: Award) -> Result<bool, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("badge {0} is locked or archived; its criteria can no longer change")]
    Locked(BadgeId),
    #[error(transparent)]
    Criterion(#[from] CriterionError),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Status summary of a learner's progress on one badge.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub badge_id: BadgeId,
    pub learner_id: LearnerId,
    pub status: &'static str,
    pub criteria_met: usize,
    pub criteria_total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Summarize a learner's persisted progress for reporting.
pub fn progress_view<S>(
    store: &S,
    badge: &Badge,
    learner: LearnerId,
) -> Result<ProgressView, RepositoryError>
where
    S: BadgeStore + ?Sized,
{
    let award = store.award(badge.id, learner)?;
    let met = store.met_records(badge.id, learner)?;
    let criteria_met = badge
        .requirements()
        .filter(|criterion| met.iter().any(|record| record.criterion_id == criterion.id))
        .count();

    Ok(ProgressView {
        badge_id: badge.id,
        learner_id: learner,
        status: if award.is_some() {
            "awarded"
        } else {
            "in_progress"
        },
        criteria_met,
        criteria_total: badge.requirements().count(),
        token: award.map(|award| award.token),
    })
}

/// Validate a new criterion against the badge it is being attached to.
pub(crate) fn prepare_criterion(
    badge: &Badge,
    id: CriterionId,
    record: &CriterionRecord,
) -> Result<Criterion, RepositoryError> {
    if !badge.can_edit_criteria() {
        return Err(RepositoryError::Locked(badge.id));
    }

    let criterion = Criterion::from_record(id, badge.id, record)?;
    if criterion.criterion_type() == CriterionType::Overall && badge.overall().is_some() {
        return Err(RepositoryError::Conflict);
    }

    Ok(criterion)
}
