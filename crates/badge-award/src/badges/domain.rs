use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::{Criterion, CriterionType};
use super::token::verification_token;

/// Identifier wrapper for badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BadgeId(pub i64);

/// Identifier wrapper for criteria attached to a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CriterionId(pub i64);

/// Identifier wrapper for learners (platform users).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub i64);

/// Course module (activity) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub i64);

impl fmt::Display for BadgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CriterionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a badge. Locked states are entered once the badge has been awarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeStatus {
    Draft,
    Active,
    DraftLocked,
    ActiveLocked,
    Archived,
}

impl BadgeStatus {
    pub const fn code(self) -> u8 {
        match self {
            BadgeStatus::Draft => 0,
            BadgeStatus::Active => 1,
            BadgeStatus::DraftLocked => 2,
            BadgeStatus::ActiveLocked => 3,
            BadgeStatus::Archived => 4,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BadgeStatus::Draft),
            1 => Some(BadgeStatus::Active),
            2 => Some(BadgeStatus::DraftLocked),
            3 => Some(BadgeStatus::ActiveLocked),
            4 => Some(BadgeStatus::Archived),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            BadgeStatus::Draft => "draft",
            BadgeStatus::Active => "active",
            BadgeStatus::DraftLocked => "draft_locked",
            BadgeStatus::ActiveLocked => "active_locked",
            BadgeStatus::Archived => "archived",
        }
    }

    /// Available to learners and picked up by the periodic review.
    pub const fn is_active(self) -> bool {
        matches!(self, BadgeStatus::Active | BadgeStatus::ActiveLocked)
    }

    pub const fn is_locked(self) -> bool {
        matches!(self, BadgeStatus::DraftLocked | BadgeStatus::ActiveLocked)
    }

    /// Status the badge moves to once it has been issued for the first time.
    pub const fn locked(self) -> Self {
        match self {
            BadgeStatus::Draft => BadgeStatus::DraftLocked,
            BadgeStatus::Active => BadgeStatus::ActiveLocked,
            other => other,
        }
    }
}

/// Whether a badge belongs to the whole site or to one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeOwner {
    Site,
    Course(CourseId),
}

/// Expiry policy stamped onto every award of a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeExpiry {
    #[default]
    Never,
    OnDate(DateTime<Utc>),
    AfterPeriod {
        seconds: i64,
    },
}

impl BadgeExpiry {
    pub fn expires_at(self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            BadgeExpiry::Never => None,
            BadgeExpiry::OnDate(date) => Some(date),
            BadgeExpiry::AfterPeriod { seconds } => {
                issued_at.checked_add_signed(Duration::seconds(seconds))
            }
        }
    }
}

/// Badge definition together with its configured criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: BadgeId,
    pub name: String,
    pub owner: BadgeOwner,
    pub status: BadgeStatus,
    #[serde(default)]
    pub expiry: BadgeExpiry,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl Badge {
    pub fn overall(&self) -> Option<&Criterion> {
        self.criteria
            .iter()
            .find(|criterion| criterion.criterion_type() == CriterionType::Overall)
    }

    /// Criteria other than the overall one, in configuration order.
    pub fn requirements(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria
            .iter()
            .filter(|criterion| criterion.criterion_type() != CriterionType::Overall)
    }

    pub fn has_criteria(&self) -> bool {
        self.requirements().next().is_some()
    }

    pub fn can_edit_criteria(&self) -> bool {
        !self.status.is_locked() && self.status != BadgeStatus::Archived
    }

    /// Make the badge available to learners.
    pub fn activate(&mut self) -> Result<BadgeStatus, BadgeError> {
        if self.status == BadgeStatus::Archived {
            return Err(BadgeError::Archived(self.id));
        }

        let overall_count = self
            .criteria
            .iter()
            .filter(|criterion| criterion.criterion_type() == CriterionType::Overall)
            .count();
        if overall_count != 1 {
            return Err(BadgeError::MissingOverall(self.id));
        }
        if !self.has_criteria() {
            return Err(BadgeError::NoCriteria(self.id));
        }

        self.status = match self.status {
            BadgeStatus::Draft => BadgeStatus::Active,
            BadgeStatus::DraftLocked => BadgeStatus::ActiveLocked,
            other => other,
        };
        Ok(self.status)
    }

    pub fn deactivate(&mut self) -> BadgeStatus {
        self.status = match self.status {
            BadgeStatus::Active => BadgeStatus::Draft,
            BadgeStatus::ActiveLocked => BadgeStatus::DraftLocked,
            other => other,
        };
        self.status
    }

    pub fn lock(&mut self) -> BadgeStatus {
        self.status = self.status.locked();
        self.status
    }

    pub fn archive(&mut self) -> BadgeStatus {
        self.status = BadgeStatus::Archived;
        self.status
    }
}

/// Lifecycle violations raised while editing a badge.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BadgeError {
    #[error("badge {0} needs exactly one overall criterion before it can be activated")]
    MissingOverall(BadgeId),
    #[error("badge {0} has no criteria besides the overall criterion")]
    NoCriteria(BadgeId),
    #[error("badge {0} is archived")]
    Archived(BadgeId),
}

/// Fields supplied when a new badge is created; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBadge {
    pub name: String,
    pub owner: BadgeOwner,
    #[serde(default)]
    pub expiry: BadgeExpiry,
}

/// Audit row stating when a learner first satisfied a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionMetRecord {
    pub criterion_id: CriterionId,
    pub badge_id: BadgeId,
    pub learner_id: LearnerId,
    pub met_at: DateTime<Utc>,
}

/// A badge granted by hand by someone holding `issuer_role`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAward {
    pub badge_id: BadgeId,
    pub recipient: LearnerId,
    pub issuer: LearnerId,
    pub issuer_role: RoleId,
    pub awarded_at: DateTime<Utc>,
}

/// Issued badge. At most one exists per badge and learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub badge_id: BadgeId,
    pub learner_id: LearnerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub token: String,
    pub visible: bool,
}

impl Award {
    pub fn issue(badge: &Badge, learner_id: LearnerId, issued_at: DateTime<Utc>) -> Self {
        Self {
            badge_id: badge.id,
            learner_id,
            issued_at,
            expires_at: badge.expiry.expires_at(issued_at),
            token: verification_token(badge.id, learner_id, issued_at),
            visible: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}
