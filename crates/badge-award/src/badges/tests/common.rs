use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::badges::criteria::{Aggregation, CriterionRecord, ProfileField};
use crate::badges::domain::{
    Award, Badge, BadgeExpiry, BadgeId, BadgeOwner, BadgeStatus, CourseId, CriterionId,
    CriterionMetRecord, LearnerId, ManualAward, ModuleId, NewBadge, RoleId,
};
use crate::badges::memory::MemoryBadgeStore;
use crate::badges::notifier::{AwardNotice, AwardNotifier, NotifyError};
use crate::badges::repository::{BadgeStore, RepositoryError};
use crate::badges::snapshot::FactsSnapshot;
use crate::badges::sources::{
    ActivityCompletion, ActivityInfo, CourseInfo, LearnerFacts, SourceError,
};
use crate::badges::Criterion;

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn now() -> DateTime<Utc> {
    at(2024, 6, 1)
}

pub(super) fn overall_record(method: Aggregation) -> CriterionRecord {
    CriterionRecord {
        criterion_type: "overall".to_string(),
        method,
        description: None,
        params: BTreeMap::new(),
    }
}

pub(super) fn record(
    criterion_type: &str,
    method: Aggregation,
    params: &[(&str, String)],
) -> CriterionRecord {
    CriterionRecord {
        criterion_type: criterion_type.to_string(),
        method,
        description: None,
        params: params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    }
}

/// Activity criterion over `modules`, each optionally with a completion cutoff.
pub(super) fn activity_record(
    method: Aggregation,
    modules: &[(i64, Option<DateTime<Utc>>)],
) -> CriterionRecord {
    let mut params = Vec::new();
    for (module, by_date) in modules {
        params.push((format!("module_{module}"), module.to_string()));
        if let Some(cutoff) = by_date {
            params.push((format!("bydate_{module}"), cutoff.timestamp().to_string()));
        }
    }
    CriterionRecord {
        criterion_type: "activity".to_string(),
        method,
        description: None,
        params: params.into_iter().collect(),
    }
}

/// Insert a badge with the given criteria and activate it.
pub(super) fn active_badge<S>(store: &S, owner: BadgeOwner, records: Vec<CriterionRecord>) -> Badge
where
    S: BadgeStore + ?Sized,
{
    let created = store
        .insert_badge(NewBadge {
            name: "Quick starter".to_string(),
            owner,
            expiry: BadgeExpiry::Never,
        })
        .expect("badge inserted");
    for record in records {
        store
            .add_criterion(created.id, record)
            .expect("criterion added");
    }
    let mut badge = store
        .badge(created.id)
        .expect("badge lookup")
        .expect("badge present");
    let status = badge.activate().expect("badge activates");
    store.set_status(badge.id, status).expect("status stored");
    badge
}

pub(super) fn learner(id: i64) -> LearnerId {
    LearnerId(id)
}

pub(super) fn module(id: i64) -> ModuleId {
    ModuleId(id)
}

pub(super) fn course(id: i64) -> CourseId {
    CourseId(id)
}

pub(super) fn criterion_of(badge: &Badge, index: usize) -> &Criterion {
    badge
        .requirements()
        .nth(index)
        .expect("badge has requirement at index")
}

/// Facts wrapper that records lookups and can fail on demand for one learner.
pub(super) struct RecordingFacts {
    pub(super) inner: FactsSnapshot,
    pub(super) failing_learner: Option<LearnerId>,
    pub(super) failing_candidates: BTreeSet<BadgeId>,
    activity_lookups: Mutex<Vec<ModuleId>>,
    course_lookups: Mutex<Vec<CourseId>>,
}

impl RecordingFacts {
    pub(super) fn new(inner: FactsSnapshot) -> Self {
        Self {
            inner,
            failing_learner: None,
            failing_candidates: BTreeSet::new(),
            activity_lookups: Mutex::new(Vec::new()),
            course_lookups: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn failing_for(mut self, learner: LearnerId) -> Self {
        self.failing_learner = Some(learner);
        self
    }

    pub(super) fn failing_candidates_for(mut self, badge: BadgeId) -> Self {
        self.failing_candidates.insert(badge);
        self
    }

    pub(super) fn activity_lookups(&self) -> Vec<ModuleId> {
        self.activity_lookups
            .lock()
            .expect("facts mutex poisoned")
            .clone()
    }

    pub(super) fn course_lookups(&self) -> Vec<CourseId> {
        self.course_lookups
            .lock()
            .expect("facts mutex poisoned")
            .clone()
    }

    fn check(&self, learner: LearnerId) -> Result<(), SourceError> {
        if self.failing_learner == Some(learner) {
            return Err(SourceError::Unavailable {
                source_name: "completion",
                reason: "connection reset".to_string(),
            });
        }
        Ok(())
    }
}

impl LearnerFacts for RecordingFacts {
    fn activity(&self, module: ModuleId) -> Result<Option<ActivityInfo>, SourceError> {
        self.activity_lookups
            .lock()
            .expect("facts mutex poisoned")
            .push(module);
        self.inner.activity(module)
    }

    fn activity_completion(
        &self,
        module: ModuleId,
        learner: LearnerId,
    ) -> Result<Option<ActivityCompletion>, SourceError> {
        self.check(learner)?;
        self.inner.activity_completion(module, learner)
    }

    fn course(&self, course: CourseId) -> Result<Option<CourseInfo>, SourceError> {
        self.course_lookups
            .lock()
            .expect("facts mutex poisoned")
            .push(course);
        self.inner.course(course)
    }

    fn course_completion(
        &self,
        course: CourseId,
        learner: LearnerId,
    ) -> Result<Option<DateTime<Utc>>, SourceError> {
        self.check(learner)?;
        self.inner.course_completion(course, learner)
    }

    fn course_grade(
        &self,
        course: CourseId,
        learner: LearnerId,
    ) -> Result<Option<f64>, SourceError> {
        self.check(learner)?;
        self.inner.course_grade(course, learner)
    }

    fn role_exists(&self, role: RoleId) -> Result<bool, SourceError> {
        self.inner.role_exists(role)
    }

    fn profile_field_exists(&self, field: &ProfileField) -> Result<bool, SourceError> {
        self.inner.profile_field_exists(field)
    }

    fn profile_value(
        &self,
        field: &ProfileField,
        learner: LearnerId,
    ) -> Result<Option<String>, SourceError> {
        self.check(learner)?;
        self.inner.profile_value(field, learner)
    }

    fn social_connected(&self, network: &str, learner: LearnerId) -> Result<bool, SourceError> {
        self.check(learner)?;
        self.inner.social_connected(network, learner)
    }

    fn candidates(&self, badge: &Badge) -> Result<Vec<LearnerId>, SourceError> {
        if self.failing_candidates.contains(&badge.id) {
            return Err(SourceError::Unavailable {
                source_name: "enrolment",
                reason: "timeout".to_string(),
            });
        }
        self.inner.candidates(badge)
    }
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    notices: Mutex<Vec<AwardNotice>>,
}

impl RecordingNotifier {
    pub(super) fn notices(&self) -> Vec<AwardNotice> {
        self.notices.lock().expect("notifier mutex poisoned").clone()
    }
}

impl AwardNotifier for RecordingNotifier {
    fn notify(&self, notice: &AwardNotice) -> Result<(), NotifyError> {
        self.notices
            .lock()
            .expect("notifier mutex poisoned")
            .push(notice.clone());
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl AwardNotifier for FailingNotifier {
    fn notify(&self, _notice: &AwardNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp refused".to_string()))
    }
}

/// Memory store with switchable faults.
#[derive(Default)]
pub(super) struct FaultyStore {
    pub(super) inner: MemoryBadgeStore,
    /// Award lookups always miss, as a second pass racing the first would see them. Only the
    /// insert-time uniqueness check stands between such a pass and a duplicate award.
    stale_award_reads: bool,
    failing_status_writes: AtomicBool,
    status_writes: AtomicUsize,
}

impl FaultyStore {
    pub(super) fn with_stale_award_reads() -> Self {
        Self {
            stale_award_reads: true,
            ..Self::default()
        }
    }

    pub(super) fn fail_status_writes(&self) {
        self.failing_status_writes.store(true, Ordering::SeqCst);
    }

    /// Successful status writes so far, setup included.
    pub(super) fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

impl BadgeStore for FaultyStore {
    fn insert_badge(&self, badge: NewBadge) -> Result<Badge, RepositoryError> {
        self.inner.insert_badge(badge)
    }

    fn badge(&self, id: BadgeId) -> Result<Option<Badge>, RepositoryError> {
        self.inner.badge(id)
    }

    fn badges(&self) -> Result<Vec<Badge>, RepositoryError> {
        self.inner.badges()
    }

    fn set_status(&self, id: BadgeId, status: BadgeStatus) -> Result<(), RepositoryError> {
        if self.failing_status_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("status write refused".to_string()));
        }
        self.inner.set_status(id, status)?;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_badge(&self, id: BadgeId) -> Result<(), RepositoryError> {
        self.inner.delete_badge(id)
    }

    fn add_criterion(
        &self,
        badge: BadgeId,
        record: CriterionRecord,
    ) -> Result<Criterion, RepositoryError> {
        self.inner.add_criterion(badge, record)
    }

    fn delete_criterion(&self, id: CriterionId) -> Result<(), RepositoryError> {
        self.inner.delete_criterion(id)
    }

    fn criterion_met(
        &self,
        criterion: CriterionId,
        learner: LearnerId,
    ) -> Result<Option<CriterionMetRecord>, RepositoryError> {
        self.inner.criterion_met(criterion, learner)
    }

    fn met_records(
        &self,
        badge: BadgeId,
        learner: LearnerId,
    ) -> Result<Vec<CriterionMetRecord>, RepositoryError> {
        self.inner.met_records(badge, learner)
    }

    fn mark_criterion_met(&self, record: CriterionMetRecord) -> Result<bool, RepositoryError> {
        self.inner.mark_criterion_met(record)
    }

    fn record_manual_award(&self, award: ManualAward) -> Result<bool, RepositoryError> {
        self.inner.record_manual_award(award)
    }

    fn manual_award_exists(
        &self,
        badge: BadgeId,
        learner: LearnerId,
        role: RoleId,
    ) -> Result<bool, RepositoryError> {
        self.inner.manual_award_exists(badge, learner, role)
    }

    fn award(&self, badge: BadgeId, learner: LearnerId) -> Result<Option<Award>, RepositoryError> {
        if self.stale_award_reads {
            return Ok(None);
        }
        self.inner.award(badge, learner)
    }

    fn awards(&self, badge: BadgeId) -> Result<Vec<Award>, RepositoryError> {
        self.inner.awards(badge)
    }

    fn insert_award(&self, award: Award) -> Result<bool, RepositoryError> {
        self.inner.insert_award(award)
    }
}
