use super::common::*;
use crate::badges::criteria::{
    Aggregation, CriterionError, CriterionType, ProfileField, ReviewContext,
};
use crate::badges::domain::{BadgeOwner, LearnerId, ManualAward, RoleId};
use crate::badges::memory::MemoryBadgeStore;
use crate::badges::repository::{BadgeStore, RepositoryError};
use crate::badges::snapshot::FactsSnapshot;
use crate::badges::sources::CompletionState;
use crate::badges::Badge;

fn two_activities() -> FactsSnapshot {
    FactsSnapshot::default()
        .with_activity(module(3), course(1))
        .with_activity(module(7), course(1))
}

fn review_first(
    store: &MemoryBadgeStore,
    facts: &RecordingFacts,
    badge: &Badge,
    learner: LearnerId,
) -> bool {
    let ctx = ReviewContext {
        store,
        facts,
        badge,
    };
    criterion_of(badge, 0)
        .review(&ctx, learner)
        .expect("review succeeds")
}

fn badge_with(store: &MemoryBadgeStore, requirement: crate::badges::CriterionRecord) -> Badge {
    active_badge(
        store,
        BadgeOwner::Site,
        vec![overall_record(Aggregation::All), requirement],
    )
}

#[test]
fn all_stops_at_first_failing_parameter() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        activity_record(Aggregation::All, &[(3, None), (7, None)]),
    );
    let facts = RecordingFacts::new(two_activities().complete_activity(
        module(7),
        learner(1),
        CompletionState::Complete,
        at(2024, 5, 1),
    ));

    assert!(!review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.activity_lookups(), vec![module(3)]);
}

#[test]
fn all_holds_when_every_parameter_holds() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        activity_record(Aggregation::All, &[(3, None), (7, None)]),
    );
    let facts = RecordingFacts::new(
        two_activities()
            .complete_activity(module(3), learner(1), CompletionState::Complete, at(2024, 5, 1))
            .complete_activity(module(7), learner(1), CompletionState::CompletePass, at(2024, 5, 2)),
    );

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.activity_lookups(), vec![module(3), module(7)]);
}

#[test]
fn any_stops_at_first_passing_parameter() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        activity_record(Aggregation::Any, &[(3, None), (7, None)]),
    );
    let facts = RecordingFacts::new(two_activities().complete_activity(
        module(3),
        learner(1),
        CompletionState::Complete,
        at(2024, 5, 1),
    ));

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.activity_lookups(), vec![module(3)]);
}

#[test]
fn any_fails_when_no_parameter_holds() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        activity_record(Aggregation::Any, &[(3, None), (7, None)]),
    );
    let facts = RecordingFacts::new(two_activities().complete_activity(
        module(7),
        learner(1),
        CompletionState::CompleteFail,
        at(2024, 5, 1),
    ));

    assert!(!review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.activity_lookups(), vec![module(3), module(7)]);
}

#[test]
fn empty_parameter_set_is_unsatisfiable() {
    let no_checks = || std::iter::empty::<Result<bool, RepositoryError>>();

    assert!(!Aggregation::All.evaluate(no_checks()).expect("no error"));
    assert!(!Aggregation::Any.evaluate(no_checks()).expect("no error"));
}

#[test]
fn evaluation_error_stops_aggregation() {
    let checks = vec![
        Ok(true),
        Err(RepositoryError::Unavailable("disk".to_string())),
        Ok(true),
    ];

    let result = Aggregation::All.evaluate(checks);

    assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
}

#[test]
fn cutoff_compares_completion_time_not_review_time() {
    let store = MemoryBadgeStore::new();
    let cutoff = at(2024, 3, 1);
    let badge = badge_with(
        &store,
        activity_record(Aggregation::All, &[(7, Some(cutoff))]),
    );
    let facts = RecordingFacts::new(
        two_activities()
            .complete_activity(module(7), learner(1), CompletionState::Complete, at(2024, 2, 28))
            .complete_activity(module(7), learner(2), CompletionState::Complete, at(2024, 3, 2)),
    );

    assert!(now() > cutoff);
    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert!(!review_first(&store, &facts, &badge, learner(2)));
}

#[test]
fn deleted_activity_fails_only_its_own_parameter() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        activity_record(Aggregation::Any, &[(3, None), (7, None)]),
    );
    let facts = RecordingFacts::new(
        FactsSnapshot::default()
            .with_activity(module(7), course(1))
            .complete_activity(module(3), learner(1), CompletionState::Complete, at(2024, 5, 1))
            .complete_activity(module(7), learner(1), CompletionState::Complete, at(2024, 5, 1)),
    );

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.activity_lookups(), vec![module(3), module(7)]);
}

#[test]
fn untracked_activity_is_unsatisfiable() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(&store, activity_record(Aggregation::All, &[(7, None)]));
    let mut snapshot = two_activities().complete_activity(
        module(7),
        learner(1),
        CompletionState::Complete,
        at(2024, 5, 1),
    );
    for activity in &mut snapshot.activities {
        activity.completion_tracked = false;
    }
    let facts = RecordingFacts::new(snapshot);

    assert!(!review_first(&store, &facts, &badge, learner(1)));
}

#[test]
fn course_criterion_checks_grade_and_cutoff() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        record(
            "course",
            Aggregation::All,
            &[
                ("course_5", "5".to_string()),
                ("grade_5", "60".to_string()),
                ("bydate_5", at(2024, 4, 1).timestamp().to_string()),
            ],
        ),
    );
    let facts = RecordingFacts::new(
        FactsSnapshot::default()
            .with_course(course(5), None)
            .complete_course(course(5), learner(1), at(2024, 3, 20))
            .with_grade(course(5), learner(1), 72.5)
            .complete_course(course(5), learner(2), at(2024, 3, 20))
            .with_grade(course(5), learner(2), 55.0)
            .complete_course(course(5), learner(3), at(2024, 4, 2))
            .with_grade(course(5), learner(3), 90.0)
            .complete_course(course(5), learner(4), at(2024, 3, 1)),
    );

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert!(!review_first(&store, &facts, &badge, learner(2)), "grade below minimum");
    assert!(!review_first(&store, &facts, &badge, learner(3)), "completed after cutoff");
    assert!(!review_first(&store, &facts, &badge, learner(4)), "no grade recorded");
}

#[test]
fn courseset_any_skips_remaining_courses_once_satisfied() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        record(
            "courseset",
            Aggregation::Any,
            &[("course_2", "2".to_string()), ("course_4", "4".to_string())],
        ),
    );
    let facts = RecordingFacts::new(
        FactsSnapshot::default()
            .with_course(course(2), None)
            .with_course(course(4), None)
            .complete_course(course(2), learner(1), at(2024, 1, 10)),
    );

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert_eq!(facts.course_lookups(), vec![course(2)]);
}

#[test]
fn manual_criterion_needs_award_from_existing_role() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        record("manual", Aggregation::All, &[("role_3", "3".to_string())]),
    );
    store
        .record_manual_award(ManualAward {
            badge_id: badge.id,
            recipient: learner(1),
            issuer: learner(99),
            issuer_role: RoleId(3),
            awarded_at: at(2024, 5, 1),
        })
        .expect("manual award stored");

    let with_role = RecordingFacts::new(FactsSnapshot::default().with_role(RoleId(3)));
    assert!(review_first(&store, &with_role, &badge, learner(1)));
    assert!(!review_first(&store, &with_role, &badge, learner(2)));

    let role_deleted = RecordingFacts::new(FactsSnapshot::default());
    assert!(!review_first(&store, &role_deleted, &badge, learner(1)));
}

#[test]
fn profile_criterion_requires_filled_fields() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        record(
            "profile",
            Aggregation::All,
            &[
                ("field_email", "email".to_string()),
                ("field_picture", "picture".to_string()),
            ],
        ),
    );
    let email = ProfileField::Core("email".to_string());
    let picture = ProfileField::Core("picture".to_string());
    let snapshot = FactsSnapshot::default()
        .with_profile_field(email.clone())
        .with_profile_field(picture.clone())
        .with_profile_value(learner(1), email.clone(), "ada@example.org")
        .with_profile_value(learner(1), picture.clone(), "4512")
        .with_profile_value(learner(2), email.clone(), "grace@example.org")
        .with_profile_value(learner(2), picture.clone(), "0")
        .with_profile_value(learner(3), email.clone(), "   ")
        .with_profile_value(learner(3), picture, "88");
    let facts = RecordingFacts::new(snapshot.clone());

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert!(!review_first(&store, &facts, &badge, learner(2)), "unset picture");
    assert!(!review_first(&store, &facts, &badge, learner(3)), "blank email");

    let mut without_email = snapshot;
    without_email.profile_fields.remove(&email);
    let facts = RecordingFacts::new(without_email);
    assert!(!review_first(&store, &facts, &badge, learner(1)), "field deleted");
}

#[test]
fn social_criterion_checks_connected_networks() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(
        &store,
        record(
            "social",
            Aggregation::Any,
            &[
                ("social_mastodon", "mastodon".to_string()),
                ("social_linkedin", "linkedin".to_string()),
            ],
        ),
    );
    let facts = RecordingFacts::new(FactsSnapshot::default().connect_social(learner(1), "Mastodon"));

    assert!(review_first(&store, &facts, &badge, learner(1)));
    assert!(!review_first(&store, &facts, &badge, learner(2)));
}

#[test]
fn unknown_criterion_type_is_rejected_when_configured() {
    let store = MemoryBadgeStore::new();
    let badge = badge_with(&store, activity_record(Aggregation::All, &[(7, None)]));
    let err = store
        .add_criterion(badge.id, record("competency", Aggregation::All, &[]))
        .expect_err("unknown type");

    match err {
        RepositoryError::Criterion(CriterionError::UnknownType(tag)) => {
            assert_eq!(tag, "competency")
        }
        other => panic!("expected unknown type error, got {other:?}"),
    }
}

#[test]
fn criterion_types_parse_from_codes_and_names() {
    for kind in CriterionType::ALL {
        assert_eq!(CriterionType::parse(kind.name()), Ok(kind));
        assert_eq!(CriterionType::parse(&kind.code().to_string()), Ok(kind));
    }
    assert_eq!(CriterionType::CourseSet.required_param(), Some("course"));
    assert_eq!(CriterionType::Activity.optional_params(), &["bydate"]);
    assert!(CriterionType::Overall.required_param().is_none());
}

#[test]
fn stored_criteria_render_back_to_records() {
    let store = MemoryBadgeStore::new();
    let cutoff = at(2024, 3, 1);
    let original = activity_record(Aggregation::Any, &[(3, Some(cutoff)), (7, None)]);
    let badge = badge_with(&store, original.clone());

    let rendered = criterion_of(&badge, 0).to_record();

    assert_eq!(rendered, original);
}
