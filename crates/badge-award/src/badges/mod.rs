//! Badge award criteria, the aggregator that turns met criteria into awards, and the periodic
//! batch review that drives it.
//!
//! Criteria are read-only predicates over a [`LearnerFacts`] view of completion, grade, role and
//! profile data. Met records and awards are persisted through a [`BadgeStore`], which is the
//! only place uniqueness is enforced.

pub mod aggregator;
pub mod criteria;
pub mod definitions;
pub mod domain;
pub mod memory;
pub mod notifier;
pub mod repository;
pub mod reviewer;
pub mod snapshot;
pub mod sources;
pub mod sqlite;
pub(crate) mod token;

#[cfg(test)]
mod tests;

pub use aggregator::{AwardAggregator, BadgeReview, LearnerReview, ReviewError, ReviewFailure};
pub use criteria::{
    ActivityRequirement, Aggregation, CourseRequirement, Criterion, CriterionError, CriterionKind,
    CriterionRecord, CriterionType, ProfileField, ReviewContext,
};
pub use definitions::{import_definitions, BadgeDefinition, DefinitionError};
pub use domain::{
    Award, Badge, BadgeError, BadgeExpiry, BadgeId, BadgeOwner, BadgeStatus, CourseId,
    CriterionId, CriterionMetRecord, LearnerId, ManualAward, ModuleId, NewBadge, RoleId,
};
pub use memory::MemoryBadgeStore;
pub use notifier::{AwardNotice, AwardNotifier, NotifyError, TracingNotifier};
pub use repository::{progress_view, BadgeStore, ProgressView, RepositoryError};
pub use reviewer::{BatchReviewer, ReviewPassReport};
pub use snapshot::{FactsSnapshot, SnapshotError};
pub use sources::{
    ActivityCompletion, ActivityInfo, CompletionState, CourseInfo, LearnerFacts, SourceError,
};
pub use sqlite::SqliteBadgeStore;
