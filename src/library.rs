//! Workflows that tie parsing, chunking and the session engine to storage.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::time::Instant;
use uuid::Uuid;

use crate::chunker::{prepare_rows, InputMode, PreparedRows, STORAGE_POLICY_VERSION};
use crate::error::{ImportError, StoreError};
use crate::hash::content_hash;
use crate::importer::{normalize_raw_text, parse_imported_text, ImportedSentence};
use crate::session::{BootstrapMeta, PlaySession, ProgressSnapshot};
use crate::store::{
    InsertOutcome, LibraryDb, ProgressRecord, SentenceRecord, SessionRecord, TextRecord,
};
use crate::util::mean;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub text: TextRecord,
    pub sentences_persisted: usize,
}

/// Parse `raw`, then store it with its sentences. Identical content is rejected.
pub fn import_text(db: &mut LibraryDb, raw: &str) -> Result<ImportSummary, ImportError> {
    import_text_at(db, raw, Utc::now())
}

pub fn import_text_at(
    db: &mut LibraryDb,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<ImportSummary, ImportError> {
    let normalized = normalize_raw_text(raw)?;
    let parsed = parse_imported_text(&normalized)?;
    let hash = content_hash(&normalized);
    let text_id = new_text_id();

    let text = TextRecord {
        id: text_id.clone(),
        title: parsed.title,
        lang_full: parsed.lang_full.clone(),
        lang_base: parsed.lang_base,
        content_hash: hash,
        created_at: now,
        updated_at: now,
        sentences_count: parsed.sentences.len(),
        policy_version: STORAGE_POLICY_VERSION,
    };

    let sentences: Vec<SentenceRecord> = parsed
        .sentences
        .into_iter()
        .enumerate()
        .map(|(index, sentence)| SentenceRecord {
            id: format!("{text_id}-{index}"),
            text_id: text_id.clone(),
            index,
            surface_tokens: sentence.surface_tokens,
            candidate_tokens: sentence.candidate_tokens,
            lang_full: parsed.lang_full.clone(),
            seed: sentence.seed,
        })
        .collect();

    match db.insert_text(&text, &sentences)? {
        InsertOutcome::Inserted => {
            info!("imported \"{}\" as {}", text.title, text.id);
            Ok(ImportSummary {
                text,
                sentences_persisted: sentences.len(),
            })
        }
        InsertOutcome::Duplicate { existing_id } => {
            warn!("import rejected: content matches {existing_id}");
            Err(ImportError::DuplicateText)
        }
    }
}

fn new_text_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub fn delete_text(db: &mut LibraryDb, text_id: &str) -> Result<(), StoreError> {
    if db.delete_text(text_id)? {
        Ok(())
    } else {
        Err(StoreError::TextNotFound(text_id.to_string()))
    }
}

/// Everything needed to start or resume playing one text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayPlan {
    pub text: TextRecord,
    pub prepared: PreparedRows,
    pub meta: BootstrapMeta,
    pub progress: Option<ProgressSnapshot>,
}

pub fn rows_key(text: &TextRecord, input_mode: InputMode) -> String {
    format!("{}-{}-{}", text.id, text.updated_at.to_rfc3339(), input_mode)
}

pub fn load_for_play(
    db: &LibraryDb,
    text_id: &str,
    input_mode: InputMode,
) -> Result<PlayPlan, ImportError> {
    let text = db
        .get_text(text_id)?
        .ok_or_else(|| StoreError::TextNotFound(text_id.to_string()))?;

    let sentences: Vec<ImportedSentence> = db
        .sentences_for_text(text_id)?
        .into_iter()
        .map(|record| ImportedSentence {
            surface_tokens: record.surface_tokens,
            candidate_tokens: record.candidate_tokens,
            seed: record.seed,
        })
        .collect();

    let prepared = prepare_rows(&sentences, text.policy_version, input_mode)?;
    let progress = db.load_progress(text_id)?.map(|record| record.snapshot);
    let meta = BootstrapMeta {
        text_id: Some(text.id.clone()),
        total_rows: prepared.rows.len(),
        total_tokens: prepared.total_tokens,
        key: Some(rows_key(&text, input_mode)),
    };

    debug!(
        "loaded {} for play: {} rows, saved progress: {}",
        text.id,
        meta.total_rows,
        progress.is_some()
    );
    Ok(PlayPlan {
        text,
        prepared,
        meta,
        progress,
    })
}

impl PlayPlan {
    /// A session bootstrapped from this plan, resumed from saved progress when there is some.
    pub fn start(&self, now: Instant) -> PlaySession {
        let mut session = PlaySession::new();
        let rows = self.prepared.rows.clone();
        match &self.progress {
            Some(snapshot) => session.restore(rows, self.meta.clone(), snapshot, now),
            None => session.bootstrap(rows, self.meta.clone(), now),
        }
        session
    }
}

/// Persist resumable state. Sessions that have nothing left to play are skipped.
pub fn save_progress(
    db: &LibraryDb,
    session: &PlaySession,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let (Some(text_id), Some(snapshot)) = (&session.text_id, session.snapshot()) else {
        return Ok(false);
    };
    db.save_progress(&ProgressRecord {
        text_id: text_id.clone(),
        snapshot,
        updated_at: at,
    })?;
    Ok(true)
}

pub fn session_record(
    text_id: &str,
    session: &PlaySession,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> SessionRecord {
    let hud = &session.hud;
    SessionRecord {
        id: Uuid::new_v4().to_string(),
        text_id: text_id.to_string(),
        tokens_total: hud.tokens_total,
        tokens_first_try_correct: hud.tokens_first_try_correct,
        rows_completed: hud.rows_completed,
        sentences_completed: session.sentences_completed,
        mistakes_total: hud.mistakes_total,
        active_ms: hud.active_ms,
        started_at,
        ended_at,
        rpm_session_avg: hud.rows_per_minute(),
        accuracy_session: hud.accuracy_percent(),
    }
}

/// Record a completed session, drop its progress and mark the text as recently played.
/// Returns None if the session is not completed.
pub fn finish_session(
    db: &LibraryDb,
    session: &PlaySession,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
) -> Result<Option<SessionRecord>, StoreError> {
    let Some(text_id) = session.text_id.as_deref() else {
        return Ok(None);
    };
    if !session.is_completed() {
        return Ok(None);
    }

    let record = session_record(text_id, session, started_at, ended_at);
    db.insert_session(&record)?;
    db.delete_progress(text_id)?;
    db.touch_text(text_id, ended_at)?;
    info!(
        "session finished for {text_id}: {} rows, {}% accuracy",
        record.rows_completed, record.accuracy_session
    );
    Ok(Some(record))
}

/// Aggregate over a list of session summaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsOverview {
    pub sessions: usize,
    pub rows_completed: u64,
    pub sentences_completed: u64,
    pub active_ms: u64,
    pub mean_accuracy: Option<f64>,
    pub mean_rpm: Option<f64>,
}

pub fn stats_overview(sessions: &[SessionRecord]) -> StatsOverview {
    let accuracies: Vec<f64> = sessions
        .iter()
        .map(|s| f64::from(s.accuracy_session))
        .collect();
    let rpms: Vec<f64> = sessions.iter().map(|s| s.rpm_session_avg).collect();

    StatsOverview {
        sessions: sessions.len(),
        rows_completed: sessions.iter().map(|s| s.rows_completed).sum(),
        sentences_completed: sessions.iter().map(|s| s.sentences_completed).sum(),
        active_ms: sessions.iter().map(|s| s.active_ms).sum(),
        mean_accuracy: mean(&accuracies),
        mean_rpm: mean(&rpms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    const SAMPLE: &str = "\u{feff}Morning\r\nThe cat sat on the mat today.\r\nBirds sing.\r\n";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn import_persists_text_and_sentences() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let summary = import_text_at(&mut db, SAMPLE, at(0)).unwrap();

        assert_eq!(summary.sentences_persisted, 2);
        assert_eq!(summary.text.title, "Morning");
        assert_eq!(summary.text.lang_full, "en");
        assert_eq!(summary.text.id.len(), 12);
        assert_eq!(
            summary.text.content_hash,
            content_hash("Morning\nThe cat sat on the mat today.\nBirds sing.\n")
        );

        let sentences = db.sentences_for_text(&summary.text.id).unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1].id, format!("{}-1", summary.text.id));
        assert_eq!(sentences[1].surface_tokens, ["Birds", "sing."]);
    }

    #[test]
    fn reimport_is_rejected() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        import_text(&mut db, SAMPLE).unwrap();

        let again = "Morning\nThe cat sat on the mat today.\nBirds sing.\n";
        assert_matches!(import_text(&mut db, again), Err(ImportError::DuplicateText));
        assert_eq!(db.list_texts().unwrap().len(), 1);
    }

    #[test]
    fn invalid_input_stores_nothing() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        assert_matches!(import_text(&mut db, "  \n "), Err(ImportError::EmptyInput));
        assert_matches!(import_text(&mut db, "Title only"), Err(ImportError::NoSentences));
        assert!(db.list_texts().unwrap().is_empty());
    }

    #[test]
    fn delete_reports_missing_text() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let summary = import_text(&mut db, SAMPLE).unwrap();
        delete_text(&mut db, &summary.text.id).unwrap();
        assert_matches!(
            delete_text(&mut db, &summary.text.id),
            Err(StoreError::TextNotFound(id)) if id == summary.text.id
        );
    }

    #[test]
    fn plan_key_tracks_mode_and_update_time() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let summary = import_text_at(&mut db, SAMPLE, at(0)).unwrap();
        let id = summary.text.id;

        let both = load_for_play(&db, &id, InputMode::Both).unwrap();
        let left = load_for_play(&db, &id, InputMode::Left).unwrap();
        assert_ne!(both.meta.key, left.meta.key);
        assert!(both.meta.key.as_deref().unwrap().ends_with("-both"));
        assert_eq!(both.meta.total_tokens, 9);
        assert_eq!(both.meta.total_rows, 3);
        assert!(both.progress.is_none());

        db.touch_text(&id, at(60)).unwrap();
        let touched = load_for_play(&db, &id, InputMode::Both).unwrap();
        assert_ne!(touched.meta.key, both.meta.key);
    }

    #[test]
    fn missing_text_cannot_be_played() {
        let db = LibraryDb::open_in_memory().unwrap();
        assert_matches!(
            load_for_play(&db, "nope", InputMode::Both),
            Err(ImportError::Store(StoreError::TextNotFound(_)))
        );
    }

    #[test]
    fn progress_survives_a_restart() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let id = import_text(&mut db, SAMPLE).unwrap().text.id;
        let now = Instant::now();

        let plan = load_for_play(&db, &id, InputMode::Both).unwrap();
        let mut session = plan.start(now);
        let row = session.live_row.clone().unwrap();
        let slot = row.order.iter().position(|&t| t == 0).unwrap();
        session.handle_input(row.labels[slot], now);
        session.handle_input('J', now);
        assert!(save_progress(&db, &session, at(1)).unwrap());

        let plan = load_for_play(&db, &id, InputMode::Both).unwrap();
        let resumed = plan.start(now);
        assert_eq!(resumed.reveal_index, 1);
        assert_eq!(resumed.live_row_done, session.live_row_done);
        assert_eq!(resumed.hud.mistakes_total, 1);
        assert_eq!(resumed.status, SessionStatus::Ready);
    }

    #[test]
    fn finishing_records_a_session_and_clears_progress() {
        let mut db = LibraryDb::open_in_memory().unwrap();
        let id = import_text(&mut db, "Short\nGo now.\n").unwrap().text.id;
        let now = Instant::now();

        let plan = load_for_play(&db, &id, InputMode::Both).unwrap();
        let mut session = plan.start(now);
        save_progress(&db, &session, at(0)).unwrap();
        assert_eq!(finish_session(&db, &session, at(0), at(1)).unwrap(), None);

        while let Some(row) = session.live_row.clone() {
            let token = session.reveal_index;
            let slot = row.order.iter().position(|&t| t == token).unwrap();
            session.handle_input(row.labels[slot], now);
        }
        assert!(session.is_completed());
        assert!(!save_progress(&db, &session, at(1)).unwrap());

        let record = finish_session(&db, &session, at(0), at(30)).unwrap().unwrap();
        assert_eq!(record.tokens_total, 2);
        assert_eq!(record.tokens_first_try_correct, 2);
        assert_eq!(record.sentences_completed, 1);
        assert_eq!(record.accuracy_session, 100);
        assert!(db.load_progress(&id).unwrap().is_none());
        assert_eq!(db.list_sessions(Some(&id)).unwrap(), [record]);
    }

    #[test]
    fn overview_averages_sessions() {
        let record = |accuracy, rpm, rows| SessionRecord {
            id: "s".into(),
            text_id: "t".into(),
            tokens_total: 8,
            tokens_first_try_correct: 6,
            rows_completed: rows,
            sentences_completed: 1,
            mistakes_total: 2,
            active_ms: 1_000,
            started_at: at(0),
            ended_at: at(1),
            rpm_session_avg: rpm,
            accuracy_session: accuracy,
        };
        let overview = stats_overview(&[record(80, 4.0, 2), record(90, 6.0, 3)]);
        assert_eq!(overview.sessions, 2);
        assert_eq!(overview.rows_completed, 5);
        assert_eq!(overview.active_ms, 2_000);
        assert_eq!(overview.mean_accuracy, Some(85.0));
        assert_eq!(overview.mean_rpm, Some(5.0));

        assert_eq!(stats_overview(&[]), StatsOverview::default());
    }
}
