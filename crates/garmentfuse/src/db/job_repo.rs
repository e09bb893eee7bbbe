//! Row-level CRUD for the `fusion_jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row. Nested values (`candidates`, `explainability`) are JSON
/// text; timestamps are RFC 3339.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub progress: u8,
    pub category: String,
    pub reference_model: String,
    pub fabric_top: Option<String>,
    pub fabric_bottom: Option<String>,
    pub mode: String,
    pub strength: f64,
    pub user_consent: bool,
    pub result_url: Option<String>,
    pub candidates: Option<String>,
    pub explainability: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            category: row.get("category")?,
            reference_model: row.get("reference_model")?,
            fabric_top: row.get("fabric_top")?,
            fabric_bottom: row.get("fabric_bottom")?,
            mode: row.get("mode")?,
            strength: row.get("strength")?,
            user_consent: row.get("user_consent")?,
            result_url: row.get("result_url")?,
            candidates: row.get("candidates")?,
            explainability: row.get("explainability")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO fusion_jobs (id, status, progress, category, reference_model,
             fabric_top, fabric_bottom, mode, strength, user_consent, result_url,
             candidates, explainability, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.status,
                job.progress,
                job.category,
                job.reference_model,
                job.fabric_top,
                job.fabric_bottom,
                job.mode,
                job.strength,
                job.user_consent,
                job.result_url,
                job.candidates,
                job.explainability,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the mutable columns of a job, but only while its stored
/// status still equals `expected_status`. Returns whether a row changed.
pub fn update_if_status(
    db: &Database,
    job: &JobRow,
    expected_status: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE fusion_jobs SET status=?2, progress=MAX(progress, ?3), result_url=?4,
             candidates=?5, explainability=?6, error=?7, updated_at=?8
             WHERE id=?1 AND status=?9",
            params![
                job.id,
                job.status,
                job.progress,
                job.result_url,
                job.candidates,
                job.explainability,
                job.error,
                job.updated_at,
                expected_status,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Resets `progress` to 0 as part of `pending -> processing`; the
/// `MAX(...)` in [`update_if_status`] would otherwise keep the old value.
pub fn begin(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE fusion_jobs SET status='processing', progress=0, updated_at=?2
             WHERE id=?1 AND status='pending'",
            params![id, updated_at],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM fusion_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Most recently created jobs first.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM fusion_jobs ORDER BY created_at DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
