use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::criteria::{Criterion, CriterionRecord};
use super::domain::{
    Award, Badge, BadgeId, BadgeStatus, CriterionId, CriterionMetRecord, LearnerId, ManualAward,
    NewBadge, RoleId,
};
use super::repository::{prepare_criterion, BadgeStore, RepositoryError};

/// Mutex-guarded in-process store. Every check-then-insert runs under a single lock.
#[derive(Debug, Default)]
pub struct MemoryBadgeStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_badge: i64,
    next_criterion: i64,
    badges: BTreeMap<BadgeId, Badge>,
    met: BTreeMap<(CriterionId, LearnerId), CriterionMetRecord>,
    manual: BTreeMap<(BadgeId, LearnerId, RoleId), ManualAward>,
    awards: BTreeMap<(BadgeId, LearnerId), Award>,
}

impl MemoryBadgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("badge store mutex poisoned".to_string()))
    }
}

impl BadgeStore for MemoryBadgeStore {
    fn insert_badge(&self, badge: NewBadge) -> Result<Badge, RepositoryError> {
        let mut guard = self.lock()?;
        guard.next_badge += 1;
        let stored = Badge {
            id: BadgeId(guard.next_badge),
            name: badge.name,
            owner: badge.owner,
            status: BadgeStatus::Draft,
            expiry: badge.expiry,
            criteria: Vec::new(),
        };
        guard.badges.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn badge(&self, id: BadgeId) -> Result<Option<Badge>, RepositoryError> {
        Ok(self.lock()?.badges.get(&id).cloned())
    }

    fn badges(&self) -> Result<Vec<Badge>, RepositoryError> {
        Ok(self.lock()?.badges.values().cloned().collect())
    }

    fn set_status(&self, id: BadgeId, status: BadgeStatus) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        let badge = guard.badges.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        badge.status = status;
        Ok(())
    }

    fn delete_badge(&self, id: BadgeId) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        if guard.badges.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        guard.met.retain(|_, record| record.badge_id != id);
        guard.manual.retain(|(badge, _, _), _| *badge != id);
        guard.awards.retain(|(badge, _), _| *badge != id);
        Ok(())
    }

    fn add_criterion(
        &self,
        badge: BadgeId,
        record: CriterionRecord,
    ) -> Result<Criterion, RepositoryError> {
        let mut guard = self.lock()?;
        let id = CriterionId(guard.next_criterion + 1);
        let stored = guard.badges.get(&badge).ok_or(RepositoryError::NotFound)?;
        let criterion = prepare_criterion(stored, id, &record)?;

        guard.next_criterion = id.0;
        if let Some(stored) = guard.badges.get_mut(&badge) {
            stored.criteria.push(criterion.clone());
        }
        Ok(criterion)
    }

    fn delete_criterion(&self, id: CriterionId) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        let badge = guard
            .badges
            .values_mut()
            .find(|badge| badge.criteria.iter().any(|criterion| criterion.id == id))
            .ok_or(RepositoryError::NotFound)?;
        if !badge.can_edit_criteria() {
            return Err(RepositoryError::Locked(badge.id));
        }
        badge.criteria.retain(|criterion| criterion.id != id);
        guard.met.retain(|(criterion, _), _| *criterion != id);
        Ok(())
    }

    fn criterion_met(
        &self,
        criterion: CriterionId,
        learner: LearnerId,
    ) -> Result<Option<CriterionMetRecord>, RepositoryError> {
        Ok(self.lock()?.met.get(&(criterion, learner)).cloned())
    }

    fn met_records(
        &self,
        badge: BadgeId,
        learner: LearnerId,
    ) -> Result<Vec<CriterionMetRecord>, RepositoryError> {
        Ok(self
            .lock()?
            .met
            .values()
            .filter(|record| record.badge_id == badge && record.learner_id == learner)
            .cloned()
            .collect())
    }

    fn mark_criterion_met(&self, record: CriterionMetRecord) -> Result<bool, RepositoryError> {
        let mut guard = self.lock()?;
        let known = guard.badges.get(&record.badge_id).is_some_and(|badge| {
            badge
                .criteria
                .iter()
                .any(|criterion| criterion.id == record.criterion_id)
        });
        if !known {
            return Err(RepositoryError::NotFound);
        }
        let key = (record.criterion_id, record.learner_id);
        if guard.met.contains_key(&key) {
            return Ok(false);
        }
        guard.met.insert(key, record);
        Ok(true)
    }

    fn record_manual_award(&self, award: ManualAward) -> Result<bool, RepositoryError> {
        let mut guard = self.lock()?;
        if !guard.badges.contains_key(&award.badge_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (award.badge_id, award.recipient, award.issuer_role);
        if guard.manual.contains_key(&key) {
            return Ok(false);
        }
        guard.manual.insert(key, award);
        Ok(true)
    }

    fn manual_award_exists(
        &self,
        badge: BadgeId,
        learner: LearnerId,
        role: RoleId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.lock()?.manual.contains_key(&(badge, learner, role)))
    }

    fn award(&self, badge: BadgeId, learner: LearnerId) -> Result<Option<Award>, RepositoryError> {
        Ok(self.lock()?.awards.get(&(badge, learner)).cloned())
    }

    fn awards(&self, badge: BadgeId) -> Result<Vec<Award>, RepositoryError> {
        Ok(self
            .lock()?
            .awards
            .values()
            .filter(|award| award.badge_id == badge)
            .cloned()
            .collect())
    }

    fn insert_award(&self, award: Award) -> Result<bool, RepositoryError> {
        let mut guard = self.lock()?;
        if !guard.badges.contains_key(&award.badge_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (award.badge_id, award.learner_id);
        if guard.awards.contains_key(&key) {
            return Ok(false);
        }
        guard.awards.insert(key, award);
        Ok(true)
    }
}
