//! Result sink backed by SQLite
//!
//! Stores sessions, their compressed sample streams, and the classified
//! recovery intervals. Interval writes for a session happen inside one
//! delete-then-insert transaction, so a session's results commit atomically
//! and re-runs are idempotent. A compare-and-claim on the sessions table
//! lets independent workers take disjoint sessions.

use chrono::NaiveDate;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

use crate::models::{RecoveryInterval, Sample, SessionReport};

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Processing status of a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Processed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Processed => "processed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Summary row for a stored session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub date: Option<NaiveDate>,
    pub sample_count: usize,
    pub status: String,
    pub processed_config_version: Option<String>,
    pub claimed_by: Option<String>,
}

/// Compressed sample stream for efficient storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedSamples {
    pub compressed_data: Vec<u8>,
    pub original_size: usize,
    pub sample_count: usize,
}

impl CompressedSamples {
    /// Compress a sample stream with bincode + gzip
    pub fn compress(samples: &[Sample]) -> Result<Self, DatabaseError> {
        let serialized = bincode::serialize(samples)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let original_size = serialized.len();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized)?;
        let compressed_data = encoder.finish()?;

        Ok(Self {
            compressed_data,
            original_size,
            sample_count: samples.len(),
        })
    }

    /// Decompress back to the sample stream
    pub fn decompress(&self) -> Result<Vec<Sample>, DatabaseError> {
        let mut decoder = GzDecoder::new(self.compressed_data.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;

        bincode::deserialize(&decompressed).map_err(|e| DatabaseError::Serialization(e.to_string()))
    }
}

/// Database connection and management
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database, used by tests
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&mut self) -> Result<(), DatabaseError> {
        // journal_mode returns a row, so it cannot go through execute()
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        self.conn
            .execute_batch("PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                date DATE,
                sample_count INTEGER NOT NULL,
                compressed_samples BLOB NOT NULL,
                original_size INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                processed_config_version TEXT,
                claimed_by TEXT,
                failure TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS recovery_intervals (
                session_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                duration_seconds INTEGER NOT NULL,
                peak_hr INTEGER NOT NULL,
                onset_delay_seconds INTEGER NOT NULL,
                origin TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT,
                checkpoints TEXT NOT NULL,
                fits TEXT NOT NULL,
                config_version TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,

                PRIMARY KEY (session_id, sequence),
                FOREIGN KEY (session_id) REFERENCES sessions (id) ON DELETE CASCADE
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions (date)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions (status)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_intervals_status ON recovery_intervals (status)",
            [],
        )?;

        Ok(())
    }

    /// Insert or replace a session's sample stream; resets its processing
    /// state, since new samples invalidate old classifications.
    pub fn store_session(
        &mut self,
        session_id: &str,
        date: Option<NaiveDate>,
        samples: &[Sample],
    ) -> Result<(), DatabaseError> {
        let compressed = CompressedSamples::compress(samples)?;

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO sessions (id, date, sample_count, compressed_samples, original_size, status)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending')
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                sample_count = excluded.sample_count,
                compressed_samples = excluded.compressed_samples,
                original_size = excluded.original_size,
                status = 'pending',
                processed_config_version = NULL,
                failure = NULL,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                session_id,
                date,
                compressed.sample_count as i64,
                compressed.compressed_data,
                compressed.original_size as i64,
            ],
        )?;
        tx.execute(
            "DELETE FROM recovery_intervals WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Load a session's sample stream
    pub fn load_samples(&self, session_id: &str) -> Result<Vec<Sample>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT compressed_samples, original_size, sample_count FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok(CompressedSamples {
                        compressed_data: row.get(0)?,
                        original_size: row.get::<_, i64>(1)? as usize,
                        sample_count: row.get::<_, i64>(2)? as usize,
                    })
                },
            )
            .optional()?;

        match row {
            Some(compressed) => compressed.decompress(),
            None => Err(DatabaseError::NotFound(format!("session {}", session_id))),
        }
    }

    /// Sessions within an optional date range, ordered by date then id.
    /// Sessions without a date are included only when no range is given.
    pub fn list_sessions(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<SessionRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, date, sample_count, status, processed_config_version, claimed_by
            FROM sessions
            WHERE (?1 IS NULL AND ?2 IS NULL)
               OR (date IS NOT NULL
                   AND (?1 IS NULL OR date >= ?1)
                   AND (?2 IS NULL OR date <= ?2))
            ORDER BY date, id
            "#,
        )?;

        let rows = stmt.query_map(params![from, to], |row| {
            Ok(SessionRecord {
                id: row.get(0)?,
                date: row.get(1)?,
                sample_count: row.get::<_, i64>(2)? as usize,
                status: row.get(3)?,
                processed_config_version: row.get(4)?,
                claimed_by: row.get(5)?,
            })
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    /// Compare-and-claim a session for one worker. Returns false when the
    /// session is already claimed by someone else or does not exist.
    pub fn try_claim(&mut self, session_id: &str, worker: &str) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            r#"
            UPDATE sessions
            SET claimed_by = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2 AND (claimed_by IS NULL OR claimed_by = ?1)
            "#,
            params![worker, session_id],
        )?;
        Ok(changed == 1)
    }

    /// Release a claim held by `worker`; claims held by others are left alone.
    pub fn release_claim(&mut self, session_id: &str, worker: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE sessions SET claimed_by = NULL, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND claimed_by = ?2",
            params![session_id, worker],
        )?;
        Ok(())
    }

    /// Atomically replace a session's interval records and mark it
    /// processed under the given config version. No partial writes: either
    /// every record lands or none do.
    pub fn replace_intervals(
        &mut self,
        session_id: &str,
        intervals: &[RecoveryInterval],
        config_version: &str,
    ) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM recovery_intervals WHERE session_id = ?1",
            params![session_id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO recovery_intervals (
                    session_id, sequence, start_offset, end_offset, duration_seconds,
                    peak_hr, onset_delay_seconds, origin, status, reason,
                    checkpoints, fits, config_version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;

            for interval in intervals {
                let checkpoints = serde_json::to_string(&interval.checkpoints)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                let fits = serde_json::to_string(&interval.fits)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

                stmt.execute(params![
                    interval.session_id,
                    interval.sequence,
                    interval.start_offset,
                    interval.end_offset,
                    interval.duration_seconds,
                    interval.peak_hr,
                    interval.onset_delay_seconds,
                    interval.origin.as_str(),
                    interval.status.as_str(),
                    interval.reason.map(|r| r.as_str()),
                    checkpoints,
                    fits,
                    interval.config_version,
                ])?;
            }
        }

        let updated = tx.execute(
            r#"
            UPDATE sessions
            SET status = 'processed', processed_config_version = ?1,
                failure = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?2
            "#,
            params![config_version, session_id],
        )?;
        if updated != 1 {
            return Err(DatabaseError::NotFound(format!("session {}", session_id)));
        }

        tx.commit()?;
        Ok(())
    }

    /// Record a session failure so the batch can continue past it.
    pub fn mark_failed(&mut self, session_id: &str, failure: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "UPDATE sessions SET status = 'failed', failure = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2",
            params![failure, session_id],
        )?;
        Ok(())
    }

    /// Load a session's interval records, ordered by sequence.
    pub fn intervals_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<RecoveryInterval>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, sequence, start_offset, end_offset, duration_seconds,
                   peak_hr, onset_delay_seconds, origin, status, reason,
                   checkpoints, fits, config_version
            FROM recovery_intervals
            WHERE session_id = ?1
            ORDER BY sequence
            "#,
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, u16>(5)?,
                row.get::<_, u32>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
            ))
        })?;

        let mut intervals = Vec::new();
        for row in rows {
            let (
                session_id,
                sequence,
                start_offset,
                end_offset,
                duration_seconds,
                peak_hr,
                onset_delay_seconds,
                origin,
                status,
                reason,
                checkpoints,
                fits,
                config_version,
            ) = row?;

            intervals.push(RecoveryInterval {
                session_id,
                sequence,
                start_offset,
                end_offset,
                duration_seconds,
                peak_hr,
                onset_delay_seconds,
                origin: origin
                    .parse()
                    .map_err(DatabaseError::Serialization)?,
                status: status
                    .parse()
                    .map_err(DatabaseError::Serialization)?,
                reason: reason
                    .map(|r| r.parse().map_err(DatabaseError::Serialization))
                    .transpose()?,
                checkpoints: serde_json::from_str(&checkpoints)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                fits: serde_json::from_str(&fits)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                config_version,
            });
        }
        Ok(intervals)
    }

    /// The config version a session was last processed under, if any.
    pub fn processed_version(&self, session_id: &str) -> Result<Option<String>, DatabaseError> {
        let version = self
            .conn
            .query_row(
                "SELECT processed_config_version FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.flatten())
    }

    /// Persisted classification counts for one session.
    pub fn session_report(&self, session_id: &str) -> Result<SessionReport, DatabaseError> {
        let intervals = self.intervals_for_session(session_id)?;
        Ok(SessionReport::tally(session_id, &intervals))
    }
}
