mod params;
mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::aggregator::ReviewError;
use super::domain::{
    Badge, BadgeId, CourseId, CriterionId, CriterionMetRecord, LearnerId, ModuleId, RoleId,
};
use super::repository::{BadgeStore, RepositoryError};
use super::sources::LearnerFacts;

/// How the individual conditions of a criterion (or the criteria of a badge) are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    All,
    Any,
}

impl Aggregation {
    pub const fn code(self) -> u8 {
        match self {
            Aggregation::All => 1,
            Aggregation::Any => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Aggregation::All),
            2 => Some(Aggregation::Any),
            _ => None,
        }
    }

    /// Combine lazily produced verdicts.
    ///
    /// `All` stops at the first `false`, `Any` at the first `true`; later checks are never run.
    /// An empty set of checks is never satisfied.
    pub fn evaluate<I, E>(self, checks: I) -> Result<bool, E>
    where
        I: IntoIterator<Item = Result<bool, E>>,
    {
        let mut evaluated = false;
        for check in checks {
            evaluated = true;
            let passed = check?;
            match self {
                Aggregation::All if !passed => return Ok(false),
                Aggregation::Any if passed => return Ok(true),
                _ => {}
            }
        }

        Ok(match self {
            Aggregation::All => evaluated,
            Aggregation::Any => false,
        })
    }
}

/// Closed set of criterion variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionType {
    Overall,
    Activity,
    Manual,
    Social,
    Course,
    CourseSet,
    Profile,
}

impl CriterionType {
    pub const ALL: [CriterionType; 7] = [
        CriterionType::Overall,
        CriterionType::Activity,
        CriterionType::Manual,
        CriterionType::Social,
        CriterionType::Course,
        CriterionType::CourseSet,
        CriterionType::Profile,
    ];

    pub const fn code(self) -> u8 {
        match self {
            CriterionType::Overall => 0,
            CriterionType::Activity => 1,
            CriterionType::Manual => 2,
            CriterionType::Social => 3,
            CriterionType::Course => 4,
            CriterionType::CourseSet => 5,
            CriterionType::Profile => 6,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CriterionType::Overall => "overall",
            CriterionType::Activity => "activity",
            CriterionType::Manual => "manual",
            CriterionType::Social => "social",
            CriterionType::Course => "course",
            CriterionType::CourseSet => "courseset",
            CriterionType::Profile => "profile",
        }
    }

    /// Accepts either the numeric storage code or the lowercase name.
    pub fn parse(tag: &str) -> Result<Self, CriterionError> {
        let tag = tag.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == tag || kind.code().to_string() == tag)
            .ok_or_else(|| CriterionError::UnknownType(tag.to_string()))
    }

    /// Parameter prefix every configured condition of this type carries.
    pub const fn required_param(self) -> Option<&'static str> {
        match self {
            CriterionType::Overall => None,
            CriterionType::Activity => Some("module"),
            CriterionType::Manual => Some("role"),
            CriterionType::Social => Some("social"),
            CriterionType::Course | CriterionType::CourseSet => Some("course"),
            CriterionType::Profile => Some("field"),
        }
    }

    pub const fn optional_params(self) -> &'static [&'static str] {
        match self {
            CriterionType::Activity => &["bydate"],
            CriterionType::Course | CriterionType::CourseSet => &["grade", "bydate"],
            _ => &[],
        }
    }
}

impl fmt::Display for CriterionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw criterion definition as entered by an editor: a type tag plus named parameters such as
/// `module_7 = 7` and `bydate_7 = <unix seconds>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionRecord {
    pub criterion_type: String,
    #[serde(default)]
    pub method: Aggregation,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Activity that must be completed, optionally before a cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRequirement {
    pub module: ModuleId,
    pub by_date: Option<DateTime<Utc>>,
}

/// Course that must be completed, optionally with a minimum grade and cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CourseRequirement {
    pub course: CourseId,
    pub min_grade: Option<f64>,
    pub by_date: Option<DateTime<Utc>>,
}

/// User profile field a learner must fill in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileField {
    /// Column of the user table, e.g. `email` or `picture`.
    Core(String),
    /// Custom profile field id.
    Custom(i64),
}

impl ProfileField {
    pub fn key(&self) -> String {
        match self {
            ProfileField::Core(name) => name.clone(),
            ProfileField::Custom(id) => id.to_string(),
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileField::Core(name) => write!(f, "{name}"),
            ProfileField::Custom(id) => write!(f, "custom field {id}"),
        }
    }
}

/// Typed parameters per criterion variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "lowercase")]
pub enum CriterionKind {
    Overall,
    Activity(Vec<ActivityRequirement>),
    Manual(Vec<RoleId>),
    Social(Vec<String>),
    Course(CourseRequirement),
    CourseSet(Vec<CourseRequirement>),
    Profile(Vec<ProfileField>),
}

impl CriterionKind {
    pub fn criterion_type(&self) -> CriterionType {
        match self {
            CriterionKind::Overall => CriterionType::Overall,
            CriterionKind::Activity(_) => CriterionType::Activity,
            CriterionKind::Manual(_) => CriterionType::Manual,
            CriterionKind::Social(_) => CriterionType::Social,
            CriterionKind::Course(_) => CriterionType::Course,
            CriterionKind::CourseSet(_) => CriterionType::CourseSet,
            CriterionKind::Profile(_) => CriterionType::Profile,
        }
    }
}

/// A configured award rule belonging to one badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: CriterionId,
    pub badge_id: BadgeId,
    pub method: Aggregation,
    pub description: Option<String>,
    pub kind: CriterionKind,
}

/// Explicit inputs for evaluating the criteria of one badge.
pub struct ReviewContext<'a, S: ?Sized, F: ?Sized> {
    pub store: &'a S,
    pub facts: &'a F,
    pub badge: &'a Badge,
}

impl Criterion {
    /// Build a typed criterion, rejecting unknown type tags and malformed parameters.
    pub fn from_record(
        id: CriterionId,
        badge_id: BadgeId,
        record: &CriterionRecord,
    ) -> Result<Self, CriterionError> {
        let criterion_type = CriterionType::parse(&record.criterion_type)?;
        let kind = params::parse_kind(criterion_type, &record.params)?;

        Ok(Self {
            id,
            badge_id,
            method: record.method,
            description: record.description.clone(),
            kind,
        })
    }

    pub fn to_record(&self) -> CriterionRecord {
        CriterionRecord {
            criterion_type: self.criterion_type().name().to_string(),
            method: self.method,
            description: self.description.clone(),
            params: params::render_kind(&self.kind),
        }
    }

    pub fn criterion_type(&self) -> CriterionType {
        self.kind.criterion_type()
    }

    /// Decide whether `learner` satisfies this criterion. Read-only.
    pub fn review<S, F>(
        &self,
        ctx: &ReviewContext<'_, S, F>,
        learner: LearnerId,
    ) -> Result<bool, ReviewError>
    where
        S: BadgeStore + ?Sized,
        F: LearnerFacts + ?Sized,
    {
        rules::review(self, ctx, learner)
    }

    /// Record that `learner` met this criterion. Returns `false` when a record already existed.
    pub fn mark_complete<S>(
        &self,
        store: &S,
        learner: LearnerId,
        met_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>
    where
        S: BadgeStore + ?Sized,
    {
        store.mark_criterion_met(CriterionMetRecord {
            criterion_id: self.id,
            badge_id: self.badge_id,
            learner_id: learner,
            met_at,
        })
    }
}

/// Configuration-time errors raised while building a criterion.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CriterionError {
    #[error("unknown criterion type '{0}'")]
    UnknownType(String),
    #[error("invalid parameter '{name}' for {criterion_type} criterion: {reason}")]
    InvalidParameter {
        criterion_type: CriterionType,
        name: String,
        reason: String,
    },
}
