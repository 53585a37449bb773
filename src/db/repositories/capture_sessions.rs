use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{read_count, read_optional_timestamp, read_timestamp, sql_int},
    models::{CaptureRecord, CaptureRecordStatus, RosterRecord},
};

const SESSION_COLUMNS: &str = "id, operator_id, status, started_at, ended_at, elapsed_seconds, \
     present_count, unresolved_count, average_confidence, created_at, updated_at";

fn row_to_capture(row: &Row) -> Result<CaptureRecord> {
    let status: String = row.get("status")?;

    Ok(CaptureRecord {
        id: row.get("id")?,
        operator_id: row.get("operator_id")?,
        status: status.parse()?,
        started_at: read_timestamp(row, "started_at")?,
        ended_at: read_optional_timestamp(row, "ended_at")?,
        elapsed_seconds: read_count(row, "elapsed_seconds")?,
        present_count: read_count(row, "present_count")?,
        unresolved_count: read_count(row, "unresolved_count")?,
        average_confidence: row.get("average_confidence")?,
        created_at: read_timestamp(row, "created_at")?,
        updated_at: read_timestamp(row, "updated_at")?,
    })
}

fn row_to_roster(row: &Row) -> Result<RosterRecord> {
    Ok(RosterRecord {
        session_id: row.get("session_id")?,
        subject_id: row.get("subject_id")?,
        position: read_count(row, "position")?,
        display_name: row.get("display_name")?,
        confidence: row.get("confidence")?,
        first_seen_at: read_timestamp(row, "first_seen_at")?,
        last_seen_at: read_timestamp(row, "last_seen_at")?,
        hits: u32::try_from(read_count(row, "hits")?).unwrap_or(u32::MAX),
    })
}

impl Database {
    pub async fn insert_capture_session(&self, record: &CaptureRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO capture_sessions (id, operator_id, status, started_at, ended_at, elapsed_seconds,
                     present_count, unresolved_count, average_confidence, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.operator_id,
                    record.status.as_str(),
                    record.started_at.to_rfc3339(),
                    record.ended_at.map(|dt| dt.to_rfc3339()),
                    sql_int(record.elapsed_seconds)?,
                    sql_int(record.present_count)?,
                    sql_int(record.unresolved_count)?,
                    record.average_confidence,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert capture session")?;
            Ok(())
        })
        .await
    }

    /// Periodic checkpoint of a running session. Rows that already left
    /// `Active` are left alone.
    pub async fn update_capture_progress(
        &self,
        session_id: &str,
        elapsed_seconds: u64,
        present_count: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE capture_sessions
                 SET elapsed_seconds = ?1,
                     present_count = ?2,
                     updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    sql_int(elapsed_seconds)?,
                    sql_int(present_count)?,
                    updated_at.to_rfc3339(),
                    session_id,
                    CaptureRecordStatus::Active.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Writes the final figures and the roster in one transaction.
    pub async fn finish_capture_session(
        &self,
        record: &CaptureRecord,
        roster: Vec<RosterRecord>,
    ) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE capture_sessions
                 SET status = ?1,
                     ended_at = ?2,
                     elapsed_seconds = ?3,
                     present_count = ?4,
                     unresolved_count = ?5,
                     average_confidence = ?6,
                     updated_at = ?7
                 WHERE id = ?8",
                params![
                    record.status.as_str(),
                    record.ended_at.map(|dt| dt.to_rfc3339()),
                    sql_int(record.elapsed_seconds)?,
                    sql_int(record.present_count)?,
                    sql_int(record.unresolved_count)?,
                    record.average_confidence,
                    record.updated_at.to_rfc3339(),
                    record.id,
                ],
            )?;

            tx.execute(
                "DELETE FROM roster_entries WHERE session_id = ?1",
                params![record.id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO roster_entries (session_id, subject_id, position, display_name,
                         confidence, first_seen_at, last_seen_at, hits)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?;
                for entry in &roster {
                    stmt.execute(params![
                        entry.session_id,
                        entry.subject_id,
                        sql_int(entry.position)?,
                        entry.display_name,
                        entry.confidence,
                        entry.first_seen_at.to_rfc3339(),
                        entry.last_seen_at.to_rfc3339(),
                        entry.hits,
                    ])?;
                }
            }
            tx.commit().context("failed to commit finished capture session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_capture_session(&self, session_id: &str) -> Result<Option<CaptureRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM capture_sessions WHERE id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let record = stmt
                .query_row(params![session_id], |row| Ok(row_to_capture(row)))
                .optional()?
                .transpose()?;
            Ok(record)
        })
        .await
    }

    /// Newest first.
    pub async fn list_capture_sessions(&self, limit: usize) -> Result<Vec<CaptureRecord>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM capture_sessions
                 WHERE status IN ('Ended', 'Interrupted')
                 ORDER BY started_at DESC
                 LIMIT ?1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![sql_int(limit as u64)?])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_capture(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn get_capture_roster(&self, session_id: &str) -> Result<Vec<RosterRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, subject_id, position, display_name, confidence,
                        first_seen_at, last_seen_at, hits
                 FROM roster_entries
                 WHERE session_id = ?1
                 ORDER BY position ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_roster(row)?);
            }
            Ok(entries)
        })
        .await
    }

    pub async fn get_incomplete_capture_sessions(&self) -> Result<Vec<CaptureRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM capture_sessions
                 WHERE status = 'Active'
                 ORDER BY started_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_capture(row)?);
            }
            Ok(records)
        })
        .await
    }

    pub async fn mark_capture_interrupted(
        &self,
        session_id: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE capture_sessions
                 SET status = ?1,
                     ended_at = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    CaptureRecordStatus::Interrupted.as_str(),
                    stopped_at.to_rfc3339(),
                    stopped_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Closes out sessions that were still `Active` when the app last exited.
    /// The last checkpoint is kept as the elapsed time.
    pub async fn recover_interrupted_captures(&self) -> Result<usize> {
        let stale = self.get_incomplete_capture_sessions().await?;
        for record in &stale {
            let last_seen = record.updated_at.max(record.started_at);
            self.mark_capture_interrupted(&record.id, last_seen).await?;
            log::warn!(
                "capture session {} was left active; marked interrupted at {}",
                record.id,
                last_seen.to_rfc3339()
            );
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("history.sqlite3")).unwrap();
        (dir, db)
    }

    fn active(id: &str, started_at: DateTime<Utc>) -> CaptureRecord {
        CaptureRecord {
            id: id.into(),
            operator_id: Some("1".into()),
            status: CaptureRecordStatus::Active,
            started_at,
            ended_at: None,
            elapsed_seconds: 0,
            present_count: 0,
            unresolved_count: 0,
            average_confidence: 0.0,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    fn entry(session_id: &str, subject: &str, position: u64, at: DateTime<Utc>) -> RosterRecord {
        RosterRecord {
            session_id: session_id.into(),
            subject_id: subject.into(),
            position,
            display_name: format!("Student {subject}"),
            confidence: 90.0,
            first_seen_at: at,
            last_seen_at: at,
            hits: 1,
        }
    }

    #[tokio::test]
    async fn finished_session_round_trips_with_roster() {
        let (_dir, db) = open();
        let started = Utc::now();
        let record = active("s-1", started);
        db.insert_capture_session(&record).await.unwrap();
        db.update_capture_progress("s-1", 10, 1, started + Duration::seconds(10))
            .await
            .unwrap();

        let finished = CaptureRecord {
            status: CaptureRecordStatus::Ended,
            ended_at: Some(started + Duration::seconds(42)),
            elapsed_seconds: 42,
            present_count: 2,
            average_confidence: 90.0,
            updated_at: started + Duration::seconds(42),
            ..record
        };
        db.finish_capture_session(
            &finished,
            vec![entry("s-1", "A", 0, started), entry("s-1", "B", 1, started)],
        )
        .await
        .unwrap();

        let stored = db.get_capture_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.status, CaptureRecordStatus::Ended);
        assert_eq!(stored.elapsed_seconds, 42);

        let roster = db.get_capture_roster("s-1").await.unwrap();
        let ids: Vec<_> = roster.iter().map(|e| e.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);

        let history = db.list_capture_sessions(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(db.get_capture_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn late_checkpoint_keeps_finished_totals() {
        let (_dir, db) = open();
        let started = Utc::now();
        let record = active("s-1", started);
        db.insert_capture_session(&record).await.unwrap();

        let finished = CaptureRecord {
            status: CaptureRecordStatus::Ended,
            ended_at: Some(started + Duration::seconds(30)),
            elapsed_seconds: 30,
            present_count: 3,
            updated_at: started + Duration::seconds(30),
            ..record
        };
        db.finish_capture_session(&finished, Vec::new()).await.unwrap();

        db.update_capture_progress("s-1", 20, 1, started + Duration::seconds(31))
            .await
            .unwrap();

        let stored = db.get_capture_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored, finished);
    }

    #[tokio::test]
    async fn active_sessions_are_recovered_as_interrupted() {
        let (_dir, db) = open();
        db.insert_capture_session(&active("crashed", Utc::now()))
            .await
            .unwrap();

        assert_eq!(db.recover_interrupted_captures().await.unwrap(), 1);
        assert_eq!(db.recover_interrupted_captures().await.unwrap(), 0);

        let record = db.get_capture_session("crashed").await.unwrap().unwrap();
        assert_eq!(record.status, CaptureRecordStatus::Interrupted);
        assert!(record.ended_at.is_some());
    }
}
