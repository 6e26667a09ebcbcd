use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::StoreError;
use crate::session::ProgressSnapshot;

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS texts (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    lang_full TEXT NOT NULL,
    lang_base TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sentences_count INTEGER NOT NULL,
    policy_version INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_texts_content_hash ON texts(content_hash);
CREATE INDEX IF NOT EXISTS idx_texts_updated_at ON texts(updated_at);

CREATE TABLE IF NOT EXISTS sentences (
    id TEXT PRIMARY KEY,
    text_id TEXT NOT NULL,
    sentence_index INTEGER NOT NULL,
    surface_tokens TEXT NOT NULL,
    candidate_tokens TEXT NOT NULL,
    lang_full TEXT NOT NULL,
    seed INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sentences_text ON sentences(text_id, sentence_index);

CREATE TABLE IF NOT EXISTS progress (
    text_id TEXT PRIMARY KEY,
    snapshot TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    text_id TEXT NOT NULL,
    tokens_total INTEGER NOT NULL,
    tokens_first_try_correct INTEGER NOT NULL,
    rows_completed INTEGER NOT NULL,
    sentences_completed INTEGER NOT NULL,
    mistakes_total INTEGER NOT NULL,
    active_ms INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    rpm_session_avg REAL NOT NULL,
    accuracy_session INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_text ON sessions(text_id, ended_at);
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecord {
    pub id: String,
    pub title: String,
    pub lang_full: String,
    pub lang_base: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sentences_count: usize,
    pub policy_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub id: String,
    pub text_id: String,
    pub index: usize,
    pub surface_tokens: Vec<String>,
    pub candidate_tokens: Vec<String>,
    pub lang_full: String,
    pub seed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRecord {
    pub text_id: String,
    pub snapshot: ProgressSnapshot,
    pub updated_at: DateTime<Utc>,
}

/// Summary written when a session completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub text_id: String,
    pub tokens_total: u64,
    pub tokens_first_try_correct: u64,
    pub rows_completed: u64,
    pub sentences_completed: u64,
    pub mistakes_total: u64,
    pub active_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub rpm_session_avg: f64,
    pub accuracy_session: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A text with the same content hash exists; nothing was written.
    Duplicate { existing_id: String },
}

/// SQLite-backed library of texts plus their progress and session history.
#[derive(Debug)]
pub struct LibraryDb {
    conn: Connection,
}

impl LibraryDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("opening library at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(LibraryDb { conn })
    }

    /// Insert a text and its sentences atomically, unless its hash is already stored.
    pub fn insert_text(
        &mut self,
        text: &TextRecord,
        sentences: &[SentenceRecord],
    ) -> Result<InsertOutcome> {
        let tx = self.conn.transaction()?;

        if let Some(existing_id) = text_id_by_hash(&tx, &text.content_hash)? {
            return Ok(InsertOutcome::Duplicate { existing_id });
        }

        tx.execute(
            &format!(
                "INSERT INTO texts ({TEXT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                text.id,
                text.title,
                text.lang_full,
                text.lang_base,
                text.content_hash,
                text.created_at.to_rfc3339(),
                text.updated_at.to_rfc3339(),
                text.sentences_count as i64,
                text.policy_version,
            ],
        )?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO sentences ({SENTENCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))?;
            for sentence in sentences {
                stmt.execute(params![
                    sentence.id,
                    sentence.text_id,
                    sentence.index as i64,
                    serde_json::to_string(&sentence.surface_tokens)?,
                    serde_json::to_string(&sentence.candidate_tokens)?,
                    sentence.lang_full,
                    sentence.seed,
                ])?;
            }
        }

        tx.commit()?;
        debug!("stored text {} with {} sentences", text.id, sentences.len());
        Ok(InsertOutcome::Inserted)
    }

    /// All texts, most recently updated first.
    pub fn list_texts(&self) -> Result<Vec<TextRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEXT_COLUMNS} FROM texts ORDER BY updated_at DESC, created_at DESC"
        ))?;
        let texts = stmt
            .query_map([], text_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(texts)
    }

    pub fn get_text(&self, id: &str) -> Result<Option<TextRecord>> {
        let text = self
            .conn
            .query_row(
                &format!("SELECT {TEXT_COLUMNS} FROM texts WHERE id = ?1"),
                [id],
                text_from_row,
            )
            .optional()?;
        Ok(text)
    }

    pub fn touch_text(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE texts SET updated_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Sentences of a text in their original order.
    pub fn sentences_for_text(&self, text_id: &str) -> Result<Vec<SentenceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SENTENCE_COLUMNS} FROM sentences WHERE text_id = ?1 ORDER BY sentence_index"
        ))?;
        let rows = stmt
            .query_map([text_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, u32>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, text_id, index, surface, candidate, lang_full, seed)| -> Result<SentenceRecord> {
                Ok(SentenceRecord {
                    id,
                    text_id,
                    index: index as usize,
                    surface_tokens: serde_json::from_str(&surface)?,
                    candidate_tokens: serde_json::from_str(&candidate)?,
                    lang_full,
                    seed,
                })
            })
            .collect()
    }

    pub fn save_progress(&self, record: &ProgressRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO progress (text_id, snapshot, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(text_id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            "#,
            params![
                record.text_id,
                serde_json::to_string(&record.snapshot)?,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_progress(&self, text_id: &str) -> Result<Option<ProgressRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT snapshot, updated_at FROM progress WHERE text_id = ?1",
                [text_id],
                |row| Ok((row.get::<_, String>(0)?, timestamp(row, 1)?)),
            )
            .optional()?;

        match row {
            Some((snapshot, updated_at)) => Ok(Some(ProgressRecord {
                text_id: text_id.to_string(),
                snapshot: serde_json::from_str(&snapshot)?,
                updated_at,
            })),
            None => Ok(None),
        }
    }

    pub fn delete_progress(&self, text_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM progress WHERE text_id = ?1", [text_id])?;
        Ok(())
    }

    pub fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                record.id,
                record.text_id,
                record.tokens_total as i64,
                record.tokens_first_try_correct as i64,
                record.rows_completed as i64,
                record.sentences_completed as i64,
                record.mistakes_total as i64,
                record.active_ms as i64,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                record.rpm_session_avg,
                record.accuracy_session,
            ],
        )?;
        Ok(())
    }

    /// Session summaries, newest first, optionally for a single text.
    pub fn list_sessions(&self, text_id: Option<&str>) -> Result<Vec<SessionRecord>> {
        let sessions = match text_id {
            Some(text_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE text_id = ?1 ORDER BY ended_at DESC"
                ))?;
                let rows = stmt.query_map([text_id], session_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY ended_at DESC"
                ))?;
                let rows = stmt.query_map([], session_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(sessions)
    }

    /// Remove a text with its sentences, progress and sessions. Returns false if absent.
    pub fn delete_text(&mut self, id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM sentences WHERE text_id = ?1", [id])?;
        tx.execute("DELETE FROM progress WHERE text_id = ?1", [id])?;
        tx.execute("DELETE FROM sessions WHERE text_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM texts WHERE id = ?1", [id])?;
        tx.commit()?;
        debug!("deleted text {id}: {}", removed > 0);
        Ok(removed > 0)
    }
}

const TEXT_COLUMNS: &str = "id, title, lang_full, lang_base, content_hash, created_at, updated_at, sentences_count, policy_version";
const SENTENCE_COLUMNS: &str =
    "id, text_id, sentence_index, surface_tokens, candidate_tokens, lang_full, seed";
const SESSION_COLUMNS: &str = "id, text_id, tokens_total, tokens_first_try_correct, rows_completed, sentences_completed, mistakes_total, active_ms, started_at, ended_at, rpm_session_avg, accuracy_session";

fn text_id_by_hash(conn: &Connection, content_hash: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM texts WHERE content_hash = ?1 LIMIT 1",
            [content_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn text_from_row(row: &Row<'_>) -> rusqlite::Result<TextRecord> {
    Ok(TextRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        lang_full: row.get(2)?,
        lang_base: row.get(3)?,
        content_hash: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
        sentences_count: row.get::<_, i64>(7)? as usize,
        policy_version: row.get(8)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        text_id: row.get(1)?,
        tokens_total: row.get::<_, i64>(2)? as u64,
        tokens_first_try_correct: row.get::<_, i64>(3)? as u64,
        rows_completed: row.get::<_, i64>(4)? as u64,
        sentences_completed: row.get::<_, i64>(5)? as u64,
        mistakes_total: row.get::<_, i64>(6)? as u64,
        active_ms: row.get::<_, i64>(7)? as u64,
        started_at: timestamp(row, 8)?,
        ended_at: timestamp(row, 9)?,
        rpm_session_avg: row.get(10)?,
        accuracy_session: row.get(11)?,
    })
}
