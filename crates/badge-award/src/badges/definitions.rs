use std::io::Read;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::criteria::CriterionRecord;
use super::domain::{Badge, BadgeError, BadgeExpiry, BadgeOwner, NewBadge};
use super::repository::{BadgeStore, RepositoryError};

/// Badge described as stored configuration rows, as exported by the course administration UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub name: String,
    pub owner: BadgeOwner,
    #[serde(default)]
    pub expiry: BadgeExpiry,
    /// Activate the badge once its criteria are stored.
    #[serde(default)]
    pub activate: bool,
    #[serde(default)]
    pub criteria: Vec<CriterionRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DefinitionDocument {
    Many(Vec<BadgeDefinition>),
    One(BadgeDefinition),
}

/// Create badges and their criteria from a JSON document holding one definition or a list.
///
/// The first invalid definition stops the import and leaves no trace of itself. Badges created
/// from earlier definitions are kept.
pub fn import_definitions<S, R>(store: &S, reader: R) -> Result<Vec<Badge>, DefinitionError>
where
    S: BadgeStore + ?Sized,
    R: Read,
{
    let definitions = match serde_json::from_reader(reader)? {
        DefinitionDocument::Many(definitions) => definitions,
        DefinitionDocument::One(definition) => vec![definition],
    };

    let mut created = Vec::with_capacity(definitions.len());
    for definition in definitions {
        created.push(create_badge(store, definition)?);
    }
    Ok(created)
}

/// Store one definition. A badge whose criteria or activation fail is deleted again.
pub fn create_badge<S>(store: &S, definition: BadgeDefinition) -> Result<Badge, DefinitionError>
where
    S: BadgeStore + ?Sized,
{
    let mut badge = store.insert_badge(NewBadge {
        name: definition.name,
        owner: definition.owner,
        expiry: definition.expiry,
    })?;

    if let Err(err) = configure(store, &mut badge, definition.criteria, definition.activate) {
        if let Err(cleanup) = store.delete_badge(badge.id) {
            warn!(badge_id = %badge.id, error = %cleanup, "could not remove partial badge");
        }
        return Err(err);
    }

    info!(
        badge_id = %badge.id,
        criteria = badge.criteria.len(),
        status = badge.status.label(),
        "badge definition imported"
    );
    Ok(badge)
}

fn configure<S>(
    store: &S,
    badge: &mut Badge,
    criteria: Vec<CriterionRecord>,
    activate: bool,
) -> Result<(), DefinitionError>
where
    S: BadgeStore + ?Sized,
{
    for record in criteria {
        let criterion = store.add_criterion(badge.id, record)?;
        badge.criteria.push(criterion);
    }

    if activate {
        let status = badge.activate()?;
        store.set_status(badge.id, status)?;
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("invalid badge definition JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Badge(#[from] BadgeError),
}
