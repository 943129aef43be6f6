use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::super::domain::{CourseId, ModuleId, RoleId};
use super::{
    ActivityRequirement, CourseRequirement, CriterionError, CriterionKind, CriterionType,
    ProfileField,
};

/// Parameter name split into its prefix and the entity it refers to, e.g. `bydate_7`.
struct ParamName<'a> {
    prefix: &'a str,
    target: &'a str,
}

fn split_name(name: &str) -> Option<ParamName<'_>> {
    let (prefix, target) = name.split_once('_')?;
    if prefix.is_empty() || target.is_empty() {
        return None;
    }
    Some(ParamName { prefix, target })
}

fn invalid(criterion_type: CriterionType, name: &str, reason: impl Into<String>) -> CriterionError {
    CriterionError::InvalidParameter {
        criterion_type,
        name: name.to_string(),
        reason: reason.into(),
    }
}

pub(super) fn parse_kind(
    criterion_type: CriterionType,
    params: &BTreeMap<String, String>,
) -> Result<CriterionKind, CriterionError> {
    let mut targets: Vec<(&str, &str)> = Vec::new();
    let mut optional: BTreeMap<(&str, &str), (&str, &str)> = BTreeMap::new();

    for (name, value) in params {
        let parsed =
            split_name(name).ok_or_else(|| invalid(criterion_type, name, "expected prefix_target"))?;

        if Some(parsed.prefix) == criterion_type.required_param() {
            targets.push((parsed.target, name.as_str()));
        } else if criterion_type.optional_params().contains(&parsed.prefix) {
            optional.insert((parsed.prefix, parsed.target), (name.as_str(), value.as_str()));
        } else {
            return Err(invalid(criterion_type, name, "not recognised for this criterion type"));
        }
    }

    let known: BTreeSet<&str> = targets.iter().map(|(target, _)| *target).collect();
    if let Some(((_, target), (name, _))) = optional
        .iter()
        .find(|((_, target), _)| !known.contains(target))
    {
        return Err(invalid(
            criterion_type,
            name,
            format!("refers to '{target}' which has no matching required parameter"),
        ));
    }

    let kind = match criterion_type {
        CriterionType::Overall => CriterionKind::Overall,
        CriterionType::Activity => {
            let mut requirements = Vec::with_capacity(targets.len());
            for (target, name) in &targets {
                let module = ModuleId(parse_id(criterion_type, name, target)?);
                let by_date = optional
                    .get(&("bydate", *target))
                    .map(|&(name, value)| parse_timestamp(criterion_type, name, value))
                    .transpose()?;
                requirements.push(ActivityRequirement { module, by_date });
            }
            CriterionKind::Activity(requirements)
        }
        CriterionType::Course | CriterionType::CourseSet => {
            let mut requirements = Vec::with_capacity(targets.len());
            for (target, name) in &targets {
                let course = CourseId(parse_id(criterion_type, name, target)?);
                let min_grade = optional
                    .get(&("grade", *target))
                    .map(|&(name, value)| parse_grade(criterion_type, name, value))
                    .transpose()?;
                let by_date = optional
                    .get(&("bydate", *target))
                    .map(|&(name, value)| parse_timestamp(criterion_type, name, value))
                    .transpose()?;
                requirements.push(CourseRequirement {
                    course,
                    min_grade,
                    by_date,
                });
            }

            if criterion_type == CriterionType::Course {
                match requirements.as_slice() {
                    [single] => CriterionKind::Course(*single),
                    _ => {
                        return Err(invalid(
                            criterion_type,
                            "course",
                            format!("expected exactly one course, found {}", requirements.len()),
                        ))
                    }
                }
            } else {
                CriterionKind::CourseSet(requirements)
            }
        }
        CriterionType::Manual => {
            let roles = targets
                .iter()
                .map(|(target, name)| parse_id(criterion_type, name, target).map(RoleId))
                .collect::<Result<Vec<_>, _>>()?;
            CriterionKind::Manual(roles)
        }
        CriterionType::Profile => {
            let fields = targets
                .iter()
                .map(|(target, name)| parse_field(criterion_type, name, target))
                .collect::<Result<Vec<_>, _>>()?;
            CriterionKind::Profile(fields)
        }
        CriterionType::Social => CriterionKind::Social(
            targets
                .iter()
                .map(|(target, _)| target.to_ascii_lowercase())
                .collect(),
        ),
    };

    Ok(kind)
}

pub(super) fn render_kind(kind: &CriterionKind) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    let push_course = |params: &mut BTreeMap<String, String>, req: &CourseRequirement| {
        let id = req.course.0;
        params.insert(format!("course_{id}"), id.to_string());
        if let Some(grade) = req.min_grade {
            params.insert(format!("grade_{id}"), grade.to_string());
        }
        if let Some(by_date) = req.by_date {
            params.insert(format!("bydate_{id}"), by_date.timestamp().to_string());
        }
    };

    match kind {
        CriterionKind::Overall => {}
        CriterionKind::Activity(requirements) => {
            for req in requirements {
                let id = req.module.0;
                params.insert(format!("module_{id}"), id.to_string());
                if let Some(by_date) = req.by_date {
                    params.insert(format!("bydate_{id}"), by_date.timestamp().to_string());
                }
            }
        }
        CriterionKind::Course(req) => push_course(&mut params, req),
        CriterionKind::CourseSet(requirements) => {
            for req in requirements {
                push_course(&mut params, req);
            }
        }
        CriterionKind::Manual(roles) => {
            for role in roles {
                params.insert(format!("role_{}", role.0), role.0.to_string());
            }
        }
        CriterionKind::Profile(fields) => {
            for field in fields {
                let key = field.key();
                params.insert(format!("field_{key}"), key);
            }
        }
        CriterionKind::Social(networks) => {
            for network in networks {
                params.insert(format!("social_{network}"), network.clone());
            }
        }
    }

    params
}

fn parse_id(criterion_type: CriterionType, name: &str, raw: &str) -> Result<i64, CriterionError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(invalid(criterion_type, name, format!("'{raw}' is not a valid id"))),
    }
}

fn parse_timestamp(
    criterion_type: CriterionType,
    name: &str,
    raw: &str,
) -> Result<DateTime<Utc>, CriterionError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .ok_or_else(|| invalid(criterion_type, name, format!("'{raw}' is not a unix timestamp")))
}

fn parse_grade(criterion_type: CriterionType, name: &str, raw: &str) -> Result<f64, CriterionError> {
    match raw.trim().parse::<f64>() {
        Ok(grade) if grade.is_finite() && grade >= 0.0 => Ok(grade),
        _ => Err(invalid(criterion_type, name, format!("'{raw}' is not a valid grade"))),
    }
}

fn parse_field(
    criterion_type: CriterionType,
    name: &str,
    raw: &str,
) -> Result<ProfileField, CriterionError> {
    if let Ok(id) = raw.parse::<i64>() {
        return if id > 0 {
            Ok(ProfileField::Custom(id))
        } else {
            Err(invalid(criterion_type, name, format!("'{raw}' is not a valid field id")))
        };
    }

    if raw
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(ProfileField::Core(raw.to_string()))
    } else {
        Err(invalid(criterion_type, name, format!("'{raw}' is not a profile field name")))
    }
}
