use crate::badges::definitions::{import_definitions, DefinitionError};
use crate::badges::domain::{BadgeError, BadgeOwner, BadgeStatus, CourseId};
use crate::badges::memory::MemoryBadgeStore;
use crate::badges::repository::{BadgeStore, RepositoryError};
use crate::badges::{CriterionError, CriterionType};

#[test]
fn imports_and_activates_definitions() {
    let store = MemoryBadgeStore::new();
    let json = r#"[
        {
            "name": "Lab safety",
            "owner": { "course": 4 },
            "activate": true,
            "criteria": [
                { "criterion_type": "overall", "method": "all" },
                { "criterion_type": "activity", "params": { "module_7": "7", "bydate_7": "1714521600" } },
                { "criterion_type": "4", "method": "all", "params": { "course_4": "4", "grade_4": "50" } }
            ]
        },
        { "name": "Site explorer", "owner": "site" }
    ]"#;

    let badges = import_definitions(&store, json.as_bytes()).expect("definitions import");

    assert_eq!(badges.len(), 2);
    let lab = &badges[0];
    assert_eq!(lab.owner, BadgeOwner::Course(CourseId(4)));
    assert_eq!(lab.status, BadgeStatus::Active);
    let types: Vec<CriterionType> = lab.criteria.iter().map(|c| c.criterion_type()).collect();
    assert_eq!(
        types,
        vec![
            CriterionType::Overall,
            CriterionType::Activity,
            CriterionType::Course
        ]
    );
    assert_eq!(
        store.badge(lab.id).expect("lookup").expect("present").status,
        BadgeStatus::Active
    );
    assert_eq!(badges[1].status, BadgeStatus::Draft);
}

#[test]
fn single_definition_document_is_accepted() {
    let store = MemoryBadgeStore::new();
    let json = r#"{ "name": "Welcome", "owner": "site" }"#;

    let badges = import_definitions(&store, json.as_bytes()).expect("definition imports");

    assert_eq!(badges.len(), 1);
    assert_eq!(store.badges().expect("list").len(), 1);
}

#[test]
fn activation_without_overall_fails() {
    let store = MemoryBadgeStore::new();
    let json = r#"{
        "name": "Broken",
        "owner": "site",
        "activate": true,
        "criteria": [{ "criterion_type": "activity", "params": { "module_7": "7" } }]
    }"#;

    let err = import_definitions(&store, json.as_bytes()).expect_err("cannot activate");

    assert!(matches!(
        err,
        DefinitionError::Badge(BadgeError::MissingOverall(_))
    ));
    assert!(store.badges().expect("list").is_empty());
}

#[test]
fn unknown_criterion_type_stops_import() {
    let store = MemoryBadgeStore::new();
    let json = r#"{
        "name": "Odd",
        "owner": "site",
        "criteria": [{ "criterion_type": "cohort", "params": { "cohort_2": "2" } }]
    }"#;

    let err = import_definitions(&store, json.as_bytes()).expect_err("unknown type");

    assert!(matches!(
        err,
        DefinitionError::Repository(RepositoryError::Criterion(CriterionError::UnknownType(_)))
    ));
}

#[test]
fn failed_definition_keeps_earlier_badges_only() {
    let store = MemoryBadgeStore::new();
    let json = r#"[
        { "name": "Welcome", "owner": "site" },
        {
            "name": "Half configured",
            "owner": "site",
            "criteria": [
                { "criterion_type": "overall", "method": "all" },
                { "criterion_type": "activity", "params": { "module_7": "7" } },
                { "criterion_type": "cohort", "params": { "cohort_2": "2" } }
            ]
        },
        { "name": "Never reached", "owner": "site" }
    ]"#;

    import_definitions(&store, json.as_bytes()).expect_err("third criterion is unknown");

    let names: Vec<String> = store
        .badges()
        .expect("list")
        .into_iter()
        .map(|badge| badge.name)
        .collect();
    assert_eq!(names, vec!["Welcome".to_string()]);
}
