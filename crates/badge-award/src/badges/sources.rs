use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::criteria::ProfileField;
use super::domain::{Badge, CourseId, LearnerId, ModuleId, RoleId};

/// Course module as known to the completion subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub module: ModuleId,
    pub course: CourseId,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub completion_tracked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    Incomplete,
    Complete,
    CompletePass,
    CompleteFail,
}

impl CompletionState {
    /// Failed attempts do not count as completion.
    pub const fn is_complete(self) -> bool {
        matches!(self, CompletionState::Complete | CompletionState::CompletePass)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCompletion {
    pub state: CompletionState,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub course: CourseId,
    #[serde(default = "default_true")]
    pub visible: bool,
    pub start: Option<DateTime<Utc>>,
}

impl CourseInfo {
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| start <= now)
    }
}

fn default_true() -> bool {
    true
}

/// Read-only view of completion, grade, role and profile state owned by other subsystems.
///
/// Deleted entities are reported as `None`/`false` by the lookup methods; `Err` is reserved for
/// failures of the collaborator itself.
pub trait LearnerFacts: Send + Sync {
    fn activity(&self, module: ModuleId) -> Result<Option<ActivityInfo>, SourceError>;
    fn activity_completion(
        &self,
        module: ModuleId,
        learner: LearnerId,
    ) -> Result<Option<ActivityCompletion>, SourceError>;
    fn course(&self, course: CourseId) -> Result<Option<CourseInfo>, SourceError>;
    fn course_completion(
        &self,
        course: CourseId,
        learner: LearnerId,
    ) -> Result<Option<DateTime<Utc>>, SourceError>;
    fn course_grade(&self, course: CourseId, learner: LearnerId)
        -> Result<Option<f64>, SourceError>;
    fn role_exists(&self, role: RoleId) -> Result<bool, SourceError>;
    fn profile_field_exists(&self, field: &ProfileField) -> Result<bool, SourceError>;
    fn profile_value(
        &self,
        field: &ProfileField,
        learner: LearnerId,
    ) -> Result<Option<String>, SourceError>;
    fn social_connected(&self, network: &str, learner: LearnerId) -> Result<bool, SourceError>;
    /// Learners the badge could be issued to: course participants or every site user.
    fn candidates(&self, badge: &Badge) -> Result<Vec<LearnerId>, SourceError>;
}

/// Failure raised by an external collaborator while answering a lookup.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{source_name} unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },
}
