use chrono::{DateTime, Utc};
use tracing::debug;

use super::super::aggregator::ReviewError;
use super::super::domain::LearnerId;
use super::super::repository::BadgeStore;
use super::super::sources::LearnerFacts;
use super::{
    ActivityRequirement, CourseRequirement, Criterion, CriterionKind, ProfileField, ReviewContext,
};

pub(super) fn review<S, F>(
    criterion: &Criterion,
    ctx: &ReviewContext<'_, S, F>,
    learner: LearnerId,
) -> Result<bool, ReviewError>
where
    S: BadgeStore + ?Sized,
    F: LearnerFacts + ?Sized,
{
    let method = criterion.method;
    match &criterion.kind {
        CriterionKind::Overall => method.evaluate(
            ctx.badge
                .requirements()
                .map(|sibling| -> Result<bool, ReviewError> {
                    Ok(ctx.store.criterion_met(sibling.id, learner)?.is_some())
                }),
        ),
        CriterionKind::Activity(requirements) => method.evaluate(
            requirements
                .iter()
                .map(|requirement| activity_met(ctx, requirement, learner)),
        ),
        CriterionKind::Course(requirement) => course_met(ctx, requirement, learner),
        CriterionKind::CourseSet(requirements) => method.evaluate(
            requirements
                .iter()
                .map(|requirement| course_met(ctx, requirement, learner)),
        ),
        CriterionKind::Manual(roles) => {
            method.evaluate(roles.iter().map(|role| -> Result<bool, ReviewError> {
                if !ctx.facts.role_exists(*role)? {
                    debug!(criterion_id = %criterion.id, role_id = %role, "role no longer exists");
                    return Ok(false);
                }
                Ok(ctx
                    .store
                    .manual_award_exists(criterion.badge_id, learner, *role)?)
            }))
        }
        CriterionKind::Profile(fields) => method.evaluate(
            fields
                .iter()
                .map(|field| profile_met(ctx, criterion, field, learner)),
        ),
        CriterionKind::Social(networks) => method.evaluate(
            networks
                .iter()
                .map(|network| -> Result<bool, ReviewError> {
                    Ok(ctx.facts.social_connected(network, learner)?)
                }),
        ),
    }
}

/// A cutoff applies to the moment the learner completed the work, not to when review runs.
fn within_cutoff(completed_at: DateTime<Utc>, by_date: Option<DateTime<Utc>>) -> bool {
    by_date.map_or(true, |cutoff| completed_at <= cutoff)
}

fn activity_met<S, F>(
    ctx: &ReviewContext<'_, S, F>,
    requirement: &ActivityRequirement,
    learner: LearnerId,
) -> Result<bool, ReviewError>
where
    S: BadgeStore + ?Sized,
    F: LearnerFacts + ?Sized,
{
    match ctx.facts.activity(requirement.module)? {
        Some(activity) if activity.completion_tracked => {}
        Some(_) => {
            debug!(module_id = %requirement.module, "activity no longer tracks completion");
            return Ok(false);
        }
        None => {
            debug!(module_id = %requirement.module, "activity no longer exists");
            return Ok(false);
        }
    }

    let Some(completion) = ctx.facts.activity_completion(requirement.module, learner)? else {
        return Ok(false);
    };

    Ok(completion.state.is_complete()
        && within_cutoff(completion.completed_at, requirement.by_date))
}

fn course_met<S, F>(
    ctx: &ReviewContext<'_, S, F>,
    requirement: &CourseRequirement,
    learner: LearnerId,
) -> Result<bool, ReviewError>
where
    S: BadgeStore + ?Sized,
    F: LearnerFacts + ?Sized,
{
    if ctx.facts.course(requirement.course)?.is_none() {
        debug!(course_id = %requirement.course, "course no longer exists");
        return Ok(false);
    }

    let Some(completed_at) = ctx.facts.course_completion(requirement.course, learner)? else {
        return Ok(false);
    };

    if let Some(min_grade) = requirement.min_grade {
        match ctx.facts.course_grade(requirement.course, learner)? {
            Some(grade) if grade >= min_grade => {}
            _ => return Ok(false),
        }
    }

    Ok(within_cutoff(completed_at, requirement.by_date))
}

fn profile_met<S, F>(
    ctx: &ReviewContext<'_, S, F>,
    criterion: &Criterion,
    field: &ProfileField,
    learner: LearnerId,
) -> Result<bool, ReviewError>
where
    S: BadgeStore + ?Sized,
    F: LearnerFacts + ?Sized,
{
    if !ctx.facts.profile_field_exists(field)? {
        debug!(criterion_id = %criterion.id, field = %field, "profile field no longer exists");
        return Ok(false);
    }

    let value = ctx.facts.profile_value(field, learner)?;
    let filled = match value.as_deref().map(str::trim) {
        None | Some("") => false,
        // An unset user picture is stored as zero.
        Some("0") => !matches!(field, ProfileField::Core(name) if name == "picture"),
        Some(_) => true,
    };
    Ok(filled)
}
