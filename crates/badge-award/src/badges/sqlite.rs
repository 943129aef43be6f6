use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{ffi, params, Connection, OptionalExtension, Row};

use super::criteria::{Aggregation, Criterion, CriterionRecord, CriterionType};
use super::domain::{
    Award, Badge, BadgeExpiry, BadgeId, BadgeOwner, BadgeStatus, CourseId, CriterionId,
    CriterionMetRecord, LearnerId, ManualAward, NewBadge, RoleId,
};
use super::repository::{prepare_criterion, BadgeStore, RepositoryError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Uniqueness of awards and met records is enforced by the schema so that two review passes
/// racing on the same learner still produce a single row.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS badge (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    course_id INTEGER,
    status INTEGER NOT NULL DEFAULT 0,
    expire_date INTEGER,
    expire_period INTEGER
);
CREATE TABLE IF NOT EXISTS badge_criteria (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    badge_id INTEGER NOT NULL REFERENCES badge(id) ON DELETE CASCADE,
    criteria_type INTEGER NOT NULL,
    method INTEGER NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS badge_criteria_param (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    criterion_id INTEGER NOT NULL REFERENCES badge_criteria(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (criterion_id, name)
);
CREATE TABLE IF NOT EXISTS badge_criteria_met (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    criterion_id INTEGER NOT NULL REFERENCES badge_criteria(id) ON DELETE CASCADE,
    badge_id INTEGER NOT NULL REFERENCES badge(id) ON DELETE CASCADE,
    learner_id INTEGER NOT NULL,
    met_at INTEGER NOT NULL,
    UNIQUE (criterion_id, learner_id)
);
CREATE TABLE IF NOT EXISTS badge_manual_award (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    badge_id INTEGER NOT NULL REFERENCES badge(id) ON DELETE CASCADE,
    recipient_id INTEGER NOT NULL,
    issuer_id INTEGER NOT NULL,
    issuer_role INTEGER NOT NULL,
    awarded_at INTEGER NOT NULL,
    UNIQUE (badge_id, recipient_id, issuer_role)
);
CREATE TABLE IF NOT EXISTS badge_issued (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    badge_id INTEGER NOT NULL REFERENCES badge(id) ON DELETE CASCADE,
    learner_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    issued_at INTEGER NOT NULL,
    expires_at INTEGER,
    visible INTEGER NOT NULL DEFAULT 1,
    UNIQUE (badge_id, learner_id)
);
";

/// SQLite-backed badge store.
pub struct SqliteBadgeStore {
    connection: Mutex<Connection>,
}

impl SqliteBadgeStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let connection = Connection::open(path).map_err(unavailable)?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let connection = Connection::open_in_memory().map_err(unavailable)?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> Result<Self, RepositoryError> {
        connection.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(unavailable)?;
        connection.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.connection.lock().map_err(|_| {
            RepositoryError::Unavailable("sqlite connection mutex poisoned".to_string())
        })
    }
}

fn unavailable(err: rusqlite::Error) -> RepositoryError {
    RepositoryError::Unavailable(err.to_string())
}

/// Map an insert guarded by a `UNIQUE` key: a duplicate row is `Ok(false)`, a dangling badge or
/// criterion reference is `NotFound`.
fn inserted(result: rusqlite::Result<usize>) -> Result<bool, RepositoryError> {
    let err = match result {
        Ok(_) => return Ok(true),
        Err(err) => err,
    };
    let extended_code = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.extended_code),
        _ => None,
    };
    match extended_code {
        Some(ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => Ok(false),
        Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => Err(RepositoryError::NotFound),
        _ => Err(unavailable(err)),
    }
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| RepositoryError::Unavailable(format!("invalid stored timestamp {seconds}")))
}

struct BadgeRow {
    id: i64,
    name: String,
    course_id: Option<i64>,
    status: u8,
    expire_date: Option<i64>,
    expire_period: Option<i64>,
}

impl BadgeRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            course_id: row.get(2)?,
            status: row.get(3)?,
            expire_date: row.get(4)?,
            expire_period: row.get(5)?,
        })
    }

    fn into_badge(self, criteria: Vec<Criterion>) -> Result<Badge, RepositoryError> {
        let status = BadgeStatus::from_code(self.status).ok_or_else(|| {
            RepositoryError::Unavailable(format!(
                "badge {} has unknown status {}",
                self.id, self.status
            ))
        })?;
        let expiry = match (self.expire_date, self.expire_period) {
            (Some(date), _) => BadgeExpiry::OnDate(timestamp(date)?),
            (None, Some(seconds)) => BadgeExpiry::AfterPeriod { seconds },
            (None, None) => BadgeExpiry::Never,
        };

        Ok(Badge {
            id: BadgeId(self.id),
            name: self.name,
            owner: self
                .course_id
                .map_or(BadgeOwner::Site, |course| BadgeOwner::Course(CourseId(course))),
            status,
            expiry,
            criteria,
        })
    }
}

const BADGE_COLUMNS: &str = "id, name, course_id, status, expire_date, expire_period";

fn load_criteria(conn: &Connection, badge: BadgeId) -> Result<Vec<Criterion>, RepositoryError> {
    let mut statement = conn
        .prepare(
            "SELECT id, criteria_type, method, description FROM badge_criteria
             WHERE badge_id = ?1 ORDER BY id",
        )
        .map_err(unavailable)?;
    let rows = statement
        .query_map(params![badge.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, u8>(1)?,
                row.get::<_, u8>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })
        .map_err(unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(unavailable)?;

    let mut param_statement = conn
        .prepare("SELECT name, value FROM badge_criteria_param WHERE criterion_id = ?1")
        .map_err(unavailable)?;

    let mut criteria = Vec::with_capacity(rows.len());
    for (id, type_code, method_code, description) in rows {
        let params = param_statement
            .query_map(params![id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(unavailable)?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(unavailable)?;
        let method = Aggregation::from_code(method_code).ok_or_else(|| {
            RepositoryError::Unavailable(format!("criterion {id} has unknown method {method_code}"))
        })?;
        let record = CriterionRecord {
            criterion_type: type_code.to_string(),
            method,
            description,
            params,
        };
        criteria.push(Criterion::from_record(CriterionId(id), badge, &record)?);
    }

    Ok(criteria)
}

fn load_badge(conn: &Connection, id: BadgeId) -> Result<Option<Badge>, RepositoryError> {
    let row = conn
        .query_row(
            &format!("SELECT {BADGE_COLUMNS} FROM badge WHERE id = ?1"),
            params![id.0],
            BadgeRow::from_row,
        )
        .optional()
        .map_err(unavailable)?;

    match row {
        Some(row) => {
            let criteria = load_criteria(conn, id)?;
            Ok(Some(row.into_badge(criteria)?))
        }
        None => Ok(None),
    }
}

fn met_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn met_record(
    (criterion, badge, learner, met_at): (i64, i64, i64, i64),
) -> Result<CriterionMetRecord, RepositoryError> {
    Ok(CriterionMetRecord {
        criterion_id: CriterionId(criterion),
        badge_id: BadgeId(badge),
        learner_id: LearnerId(learner),
        met_at: timestamp(met_at)?,
    })
}

type AwardRow = (i64, i64, String, i64, Option<i64>, bool);

fn award_from_row(row: &Row<'_>) -> rusqlite::Result<AwardRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn award_record(
    (badge, learner, token, issued_at, expires_at, visible): AwardRow,
) -> Result<Award, RepositoryError> {
    Ok(Award {
        badge_id: BadgeId(badge),
        learner_id: LearnerId(learner),
        issued_at: timestamp(issued_at)?,
        expires_at: expires_at.map(timestamp).transpose()?,
        token,
        visible,
    })
}

const AWARD_COLUMNS: &str = "badge_id, learner_id, token, issued_at, expires_at, visible";

impl BadgeStore for SqliteBadgeStore {
    fn insert_badge(&self, badge: NewBadge) -> Result<Badge, RepositoryError> {
        let conn = self.lock()?;
        let course_id = match badge.owner {
            BadgeOwner::Site => None,
            BadgeOwner::Course(course) => Some(course.0),
        };
        let (expire_date, expire_period) = match badge.expiry {
            BadgeExpiry::Never => (None, None),
            BadgeExpiry::OnDate(date) => (Some(date.timestamp()), None),
            BadgeExpiry::AfterPeriod { seconds } => (None, Some(seconds)),
        };

        conn.execute(
            "INSERT INTO badge (name, course_id, status, expire_date, expire_period)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                badge.name,
                course_id,
                BadgeStatus::Draft.code(),
                expire_date,
                expire_period
            ],
        )
        .map_err(unavailable)?;

        Ok(Badge {
            id: BadgeId(conn.last_insert_rowid()),
            name: badge.name,
            owner: badge.owner,
            status: BadgeStatus::Draft,
            expiry: badge.expiry,
            criteria: Vec::new(),
        })
    }

    fn badge(&self, id: BadgeId) -> Result<Option<Badge>, RepositoryError> {
        let conn = self.lock()?;
        load_badge(&conn, id)
    }

    fn badges(&self) -> Result<Vec<Badge>, RepositoryError> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(&format!("SELECT {BADGE_COLUMNS} FROM badge ORDER BY id"))
            .map_err(unavailable)?;
        let rows = statement
            .query_map([], BadgeRow::from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        rows.into_iter()
            .map(|row| {
                let criteria = load_criteria(&conn, BadgeId(row.id))?;
                row.into_badge(criteria)
            })
            .collect()
    }

    fn set_status(&self, id: BadgeId, status: BadgeStatus) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE badge SET status = ?1 WHERE id = ?2",
                params![status.code(), id.0],
            )
            .map_err(unavailable)?;
        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn delete_badge(&self, id: BadgeId) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM badge WHERE id = ?1", params![id.0])
            .map_err(unavailable)?;
        if deleted == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    fn add_criterion(
        &self,
        badge: BadgeId,
        record: CriterionRecord,
    ) -> Result<Criterion, RepositoryError> {
        let mut conn = self.lock()?;
        let stored = load_badge(&conn, badge)?.ok_or(RepositoryError::NotFound)?;
        // Validate before touching the tables; the id is replaced once the row exists.
        let validated = prepare_criterion(&stored, CriterionId(0), &record)?;
        let criterion_type: CriterionType = validated.criterion_type();

        let tx = conn.transaction().map_err(unavailable)?;
        tx.execute(
            "INSERT INTO badge_criteria (badge_id, criteria_type, method, description)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                badge.0,
                criterion_type.code(),
                validated.method.code(),
                validated.description
            ],
        )
        .map_err(unavailable)?;
        let id = CriterionId(tx.last_insert_rowid());

        let criterion = Criterion { id, ..validated };
        for (name, value) in criterion.to_record().params {
            tx.execute(
                "INSERT INTO badge_criteria_param (criterion_id, name, value) VALUES (?1, ?2, ?3)",
                params![id.0, name, value],
            )
            .map_err(unavailable)?;
        }
        tx.commit().map_err(unavailable)?;

        Ok(criterion)
    }

    fn delete_criterion(&self, id: CriterionId) -> Result<(), RepositoryError> {
        let conn = self.lock()?;
        let badge_id: Option<i64> = conn
            .query_row(
                "SELECT badge_id FROM badge_criteria WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(unavailable)?;
        let badge_id = BadgeId(badge_id.ok_or(RepositoryError::NotFound)?);
        let badge = load_badge(&conn, badge_id)?.ok_or(RepositoryError::NotFound)?;
        if !badge.can_edit_criteria() {
            return Err(RepositoryError::Locked(badge_id));
        }

        conn.execute("DELETE FROM badge_criteria WHERE id = ?1", params![id.0])
            .map_err(unavailable)?;
        Ok(())
    }

    fn criterion_met(
        &self,
        criterion: CriterionId,
        learner: LearnerId,
    ) -> Result<Option<CriterionMetRecord>, RepositoryError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT criterion_id, badge_id, learner_id, met_at FROM badge_criteria_met
                 WHERE criterion_id = ?1 AND learner_id = ?2",
                params![criterion.0, learner.0],
                met_from_row,
            )
            .optional()
            .map_err(unavailable)?;
        row.map(met_record).transpose()
    }

    fn met_records(
        &self,
        badge: BadgeId,
        learner: LearnerId,
    ) -> Result<Vec<CriterionMetRecord>, RepositoryError> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(
                "SELECT criterion_id, badge_id, learner_id, met_at FROM badge_criteria_met
                 WHERE badge_id = ?1 AND learner_id = ?2 ORDER BY criterion_id",
            )
            .map_err(unavailable)?;
        let rows = statement
            .query_map(params![badge.0, learner.0], met_from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        rows.into_iter().map(met_record).collect()
    }

    fn mark_criterion_met(&self, record: CriterionMetRecord) -> Result<bool, RepositoryError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO badge_criteria_met (criterion_id, badge_id, learner_id, met_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.criterion_id.0,
                record.badge_id.0,
                record.learner_id.0,
                record.met_at.timestamp()
            ],
        );
        inserted(result)
    }

    fn record_manual_award(&self, award: ManualAward) -> Result<bool, RepositoryError> {
        let conn = self.lock()?;
        if load_badge(&conn, award.badge_id)?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        let result = conn.execute(
            "INSERT INTO badge_manual_award (badge_id, recipient_id, issuer_id, issuer_role, awarded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                award.badge_id.0,
                award.recipient.0,
                award.issuer.0,
                award.issuer_role.0,
                award.awarded_at.timestamp()
            ],
        );
        inserted(result)
    }

    fn manual_award_exists(
        &self,
        badge: BadgeId,
        learner: LearnerId,
        role: RoleId,
    ) -> Result<bool, RepositoryError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM badge_manual_award
             WHERE badge_id = ?1 AND recipient_id = ?2 AND issuer_role = ?3)",
            params![badge.0, learner.0, role.0],
            |row| row.get(0),
        )
        .map_err(unavailable)
    }

    fn award(&self, badge: BadgeId, learner: LearnerId) -> Result<Option<Award>, RepositoryError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {AWARD_COLUMNS} FROM badge_issued WHERE badge_id = ?1 AND learner_id = ?2"
                ),
                params![badge.0, learner.0],
                award_from_row,
            )
            .optional()
            .map_err(unavailable)?;
        row.map(award_record).transpose()
    }

    fn awards(&self, badge: BadgeId) -> Result<Vec<Award>, RepositoryError> {
        let conn = self.lock()?;
        let mut statement = conn
            .prepare(&format!(
                "SELECT {AWARD_COLUMNS} FROM badge_issued WHERE badge_id = ?1 ORDER BY learner_id"
            ))
            .map_err(unavailable)?;
        let rows = statement
            .query_map(params![badge.0], award_from_row)
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        rows.into_iter().map(award_record).collect()
    }

    fn insert_award(&self, award: Award) -> Result<bool, RepositoryError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO badge_issued (badge_id, learner_id, token, issued_at, expires_at, visible)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                award.badge_id.0,
                award.learner_id.0,
                award.token,
                award.issued_at.timestamp(),
                award.expires_at.map(|date| date.timestamp()),
                award.visible
            ],
        );
        // A duplicate here means another pass issued the badge after our existence check.
        inserted(result)
    }
}
