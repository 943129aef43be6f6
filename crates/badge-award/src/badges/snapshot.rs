use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::criteria::ProfileField;
use super::domain::{Badge, BadgeOwner, CourseId, LearnerId, ModuleId, RoleId};
use super::sources::{
    ActivityCompletion, ActivityInfo, CompletionState, CourseInfo, LearnerFacts, SourceError,
};

/// Point-in-time copy of completion, grade, role and profile data.
///
/// Serialized as flat lists so exports from other systems can be dropped in as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactsSnapshot {
    pub activities: Vec<ActivityInfo>,
    pub activity_completions: Vec<ActivityCompletionEntry>,
    pub courses: Vec<CourseInfo>,
    pub course_completions: Vec<CourseCompletionEntry>,
    pub grades: Vec<GradeEntry>,
    pub roles: BTreeSet<RoleId>,
    pub profile_fields: BTreeSet<ProfileField>,
    pub profile_values: Vec<ProfileValueEntry>,
    pub social_connections: Vec<SocialConnection>,
    pub site_learners: BTreeSet<LearnerId>,
    pub enrolments: Vec<Enrolment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCompletionEntry {
    pub module: ModuleId,
    pub learner: LearnerId,
    pub state: CompletionState,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseCompletionEntry {
    pub course: CourseId,
    pub learner: LearnerId,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeEntry {
    pub course: CourseId,
    pub learner: LearnerId,
    pub grade: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileValueEntry {
    pub learner: LearnerId,
    pub field: ProfileField,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialConnection {
    pub learner: LearnerId,
    pub network: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrolment {
    pub course: CourseId,
    pub learner: LearnerId,
}

impl FactsSnapshot {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_activity(mut self, module: ModuleId, course: CourseId) -> Self {
        self.activities.push(ActivityInfo {
            module,
            course,
            name: format!("activity {module}"),
            completion_tracked: true,
        });
        self
    }

    pub fn with_course(mut self, course: CourseId, start: Option<DateTime<Utc>>) -> Self {
        self.courses.push(CourseInfo {
            course,
            visible: true,
            start,
        });
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_profile_field(mut self, field: ProfileField) -> Self {
        self.profile_fields.insert(field);
        self
    }

    pub fn with_site_learner(mut self, learner: LearnerId) -> Self {
        self.site_learners.insert(learner);
        self
    }

    pub fn enrol(mut self, course: CourseId, learner: LearnerId) -> Self {
        self.enrolments.push(Enrolment { course, learner });
        self
    }

    pub fn complete_activity(
        mut self,
        module: ModuleId,
        learner: LearnerId,
        state: CompletionState,
        completed_at: DateTime<Utc>,
    ) -> Self {
        self.record_activity_completion(ActivityCompletionEntry {
            module,
            learner,
            state,
            completed_at,
        });
        self
    }

    pub fn complete_course(
        mut self,
        course: CourseId,
        learner: LearnerId,
        completed_at: DateTime<Utc>,
    ) -> Self {
        self.record_course_completion(CourseCompletionEntry {
            course,
            learner,
            completed_at,
        });
        self
    }

    pub fn with_grade(mut self, course: CourseId, learner: LearnerId, grade: f64) -> Self {
        self.record_grade(GradeEntry {
            course,
            learner,
            grade,
        });
        self
    }

    pub fn with_profile_value(
        mut self,
        learner: LearnerId,
        field: ProfileField,
        value: impl Into<String>,
    ) -> Self {
        self.profile_values.retain(|entry| !(entry.learner == learner && entry.field == field));
        self.profile_values.push(ProfileValueEntry {
            learner,
            field,
            value: value.into(),
        });
        self
    }

    pub fn connect_social(mut self, learner: LearnerId, network: impl Into<String>) -> Self {
        self.social_connections.push(SocialConnection {
            learner,
            network: network.into().to_ascii_lowercase(),
        });
        self
    }

    /// Later entries replace earlier ones for the same module and learner.
    fn record_activity_completion(&mut self, entry: ActivityCompletionEntry) {
        self.activity_completions
            .retain(|existing| !(existing.module == entry.module && existing.learner == entry.learner));
        self.activity_completions.push(entry);
    }

    fn record_course_completion(&mut self, entry: CourseCompletionEntry) {
        self.course_completions
            .retain(|existing| !(existing.course == entry.course && existing.learner == entry.learner));
        self.course_completions.push(entry);
    }

    fn record_grade(&mut self, entry: GradeEntry) {
        self.grades
            .retain(|existing| !(existing.course == entry.course && existing.learner == entry.learner));
        self.grades.push(entry);
    }

    /// Merge a completion export into the snapshot, returning the number of rows applied.
    ///
    /// Expected columns: `kind,target,learner,state,completed_at,grade` where `kind` is
    /// `activity`, `course` or `grade`.
    pub fn import_completions_csv<R: Read>(&mut self, reader: R) -> Result<usize, SnapshotError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut applied = 0;

        for (index, row) in csv_reader.deserialize::<CompletionRow>().enumerate() {
            let row = row?;
            // Header is line 1.
            let line = index + 2;
            match row.kind.to_ascii_lowercase().as_str() {
                "activity" => {
                    let completed_at = row.require_completed_at(line)?;
                    let state = match row.state.as_deref() {
                        None => CompletionState::Complete,
                        Some(raw) => parse_state(raw).ok_or_else(|| SnapshotError::InvalidRow {
                            line,
                            reason: format!("unknown completion state '{raw}'"),
                        })?,
                    };
                    self.record_activity_completion(ActivityCompletionEntry {
                        module: ModuleId(row.target),
                        learner: LearnerId(row.learner),
                        state,
                        completed_at,
                    });
                }
                "course" => {
                    let completed_at = row.require_completed_at(line)?;
                    self.record_course_completion(CourseCompletionEntry {
                        course: CourseId(row.target),
                        learner: LearnerId(row.learner),
                        completed_at,
                    });
                }
                "grade" => {
                    let grade = row.grade.ok_or_else(|| SnapshotError::InvalidRow {
                        line,
                        reason: "grade rows need a grade".to_string(),
                    })?;
                    self.record_grade(GradeEntry {
                        course: CourseId(row.target),
                        learner: LearnerId(row.learner),
                        grade,
                    });
                }
                other => {
                    return Err(SnapshotError::InvalidRow {
                        line,
                        reason: format!("unknown row kind '{other}'"),
                    })
                }
            }
            applied += 1;
        }

        Ok(applied)
    }
}

fn parse_state(raw: &str) -> Option<CompletionState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "0" | "incomplete" => Some(CompletionState::Incomplete),
        "1" | "complete" => Some(CompletionState::Complete),
        "2" | "complete_pass" | "pass" => Some(CompletionState::CompletePass),
        "3" | "complete_fail" | "fail" => Some(CompletionState::CompleteFail),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct CompletionRow {
    kind: String,
    target: i64,
    learner: i64,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    state: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    completed_at: Option<String>,
    #[serde(default)]
    grade: Option<f64>,
}

impl CompletionRow {
    fn require_completed_at(&self, line: usize) -> Result<DateTime<Utc>, SnapshotError> {
        let raw = self
            .completed_at
            .as_deref()
            .ok_or_else(|| SnapshotError::InvalidRow {
                line,
                reason: "missing completed_at".to_string(),
            })?;
        parse_timestamp(raw).ok_or_else(|| SnapshotError::InvalidRow {
            line,
            reason: format!("could not parse completed_at '{raw}'"),
        })
    }
}

/// Accepts RFC 3339, plain dates, or unix seconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

impl LearnerFacts for FactsSnapshot {
    fn activity(&self, module: ModuleId) -> Result<Option<ActivityInfo>, SourceError> {
        Ok(self
            .activities
            .iter()
            .find(|activity| activity.module == module)
            .cloned())
    }

    fn activity_completion(
        &self,
        module: ModuleId,
        learner: LearnerId,
    ) -> Result<Option<ActivityCompletion>, SourceError> {
        Ok(self
            .activity_completions
            .iter()
            .find(|entry| entry.module == module && entry.learner == learner)
            .map(|entry| ActivityCompletion {
                state: entry.state,
                completed_at: entry.completed_at,
            }))
    }

    fn course(&self, course: CourseId) -> Result<Option<CourseInfo>, SourceError> {
        Ok(self.courses.iter().find(|info| info.course == course).cloned())
    }

    fn course_completion(
        &self,
        course: CourseId,
        learner: LearnerId,
    ) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self
            .course_completions
            .iter()
            .find(|entry| entry.course == course && entry.learner == learner)
            .map(|entry| entry.completed_at))
    }

    fn course_grade(
        &self,
        course: CourseId,
        learner: LearnerId,
    ) -> Result<Option<f64>, SourceError> {
        Ok(self
            .grades
            .iter()
            .find(|entry| entry.course == course && entry.learner == learner)
            .map(|entry| entry.grade))
    }

    fn role_exists(&self, role: RoleId) -> Result<bool, SourceError> {
        Ok(self.roles.contains(&role))
    }

    fn profile_field_exists(&self, field: &ProfileField) -> Result<bool, SourceError> {
        Ok(self.profile_fields.contains(field))
    }

    fn profile_value(
        &self,
        field: &ProfileField,
        learner: LearnerId,
    ) -> Result<Option<String>, SourceError> {
        Ok(self
            .profile_values
            .iter()
            .find(|entry| entry.learner == learner && &entry.field == field)
            .map(|entry| entry.value.clone()))
    }

    fn social_connected(&self, network: &str, learner: LearnerId) -> Result<bool, SourceError> {
        Ok(self
            .social_connections
            .iter()
            .any(|entry| entry.learner == learner && entry.network.eq_ignore_ascii_case(network)))
    }

    fn candidates(&self, badge: &Badge) -> Result<Vec<LearnerId>, SourceError> {
        let learners: BTreeSet<LearnerId> = match badge.owner {
            BadgeOwner::Site => self.site_learners.clone(),
            BadgeOwner::Course(course) => self
                .enrolments
                .iter()
                .filter(|enrolment| enrolment.course == course)
                .map(|enrolment| enrolment.learner)
                .collect(),
        };
        Ok(learners.into_iter().collect())
    }
}

/// Errors raised while loading a facts snapshot or completion export.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read facts snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid facts snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid completion CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("completion export line {line}: {reason}")]
    InvalidRow { line: usize, reason: String },
}

