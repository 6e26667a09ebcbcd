use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use wordrow::chunker::{ChunkRow, InputMode};
use wordrow::library::{finish_session, import_text, load_for_play, save_progress};
use wordrow::runtime::{map_key, AppEvent, FixedTicker, PlayKey, Runner, TestEventSource};
use wordrow::session::{PlaySession, SessionStatus};
use wordrow::store::LibraryDb;

const TEXT: &str = "Fox\nThe quick brown fox jumps over the lazy dog.\nIt was fast.\n";

fn key_for(row: &ChunkRow, token: usize) -> char {
    let slot = row.order.iter().position(|&t| t == token).unwrap();
    row.labels[slot].to_ascii_lowercase()
}

fn send(tx: &mpsc::Sender<AppEvent>, c: char) {
    tx.send(AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)))
        .unwrap();
}

/// Feed events through the runner until the session completes or events run dry.
fn drive(runner: &Runner<TestEventSource, FixedTicker>, session: &mut PlaySession) {
    for _ in 0..200u32 {
        match runner.step() {
            AppEvent::Tick => {
                if session.is_completed() {
                    break;
                }
            }
            AppEvent::Resize => {}
            AppEvent::Key(key) => match map_key(&key) {
                Some(PlayKey::Label(label)) => session.handle_input(label, Instant::now()),
                Some(PlayKey::Pause) => session.pause(Instant::now()),
                _ => {}
            },
        }
    }
}

#[test]
fn headless_session_completes_a_text() {
    let mut db = LibraryDb::open_in_memory().unwrap();
    let text = import_text(&mut db, TEXT).unwrap().text;
    let plan = load_for_play(&db, &text.id, InputMode::Both).unwrap();
    assert_eq!(plan.meta.total_tokens, 12);
    assert_eq!(plan.meta.total_rows, 4);

    let mut session = plan.start(Instant::now());
    let started_at = Utc::now();

    let (tx, rx) = mpsc::channel();
    let runner = Runner::new(TestEventSource::new(rx), FixedTicker::new(Duration::from_millis(2)));

    // One wrong key on the first (left-hand) row, then every row answered in order.
    send(&tx, 'j');
    for row in &plan.prepared.rows {
        for token in 0..row.len() {
            send(&tx, key_for(row, token));
        }
    }
    drive(&runner, &mut session);

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.hud.rows_completed, 4);
    assert_eq!(session.hud.tokens_first_try_correct, 12);
    assert_eq!(session.hud.mistakes_total, 1);
    assert_eq!(session.hud.streak, 4);
    assert_eq!(session.sentences_completed, 2);
    assert_eq!(session.revealed_count(), 12);

    let record = finish_session(&db, &session, started_at, Utc::now())
        .unwrap()
        .unwrap();
    assert_eq!(record.accuracy_session, 92);
    assert_eq!(db.list_sessions(Some(&text.id)).unwrap().len(), 1);
}

#[test]
fn headless_pause_then_resume_from_saved_progress() {
    let mut db = LibraryDb::open_in_memory().unwrap();
    let text = import_text(&mut db, TEXT).unwrap().text;
    let plan = load_for_play(&db, &text.id, InputMode::Right).unwrap();
    assert!(plan.prepared.rows.iter().all(|row| row.labels[0] == 'J'));

    let mut session = plan.start(Instant::now());
    let (tx, rx) = mpsc::channel();
    let runner = Runner::new(TestEventSource::new(rx), FixedTicker::new(Duration::from_millis(2)));

    let first = &plan.prepared.rows[0];
    let second = &plan.prepared.rows[1];
    for token in 0..first.len() {
        send(&tx, key_for(first, token));
    }
    send(&tx, key_for(second, 0));
    send(&tx, ' ');
    send(&tx, key_for(second, 1));
    drive(&runner, &mut session);

    assert_eq!(session.status, SessionStatus::Paused);
    assert_eq!(session.reveal_index, 1);
    assert!(save_progress(&db, &session, Utc::now()).unwrap());

    let plan = load_for_play(&db, &text.id, InputMode::Right).unwrap();
    let resumed = plan.start(Instant::now());
    assert_eq!(resumed.status, SessionStatus::Ready);
    assert_eq!(resumed.live_row.as_ref(), Some(second));
    assert_eq!(resumed.reveal_index, 1);
    assert_eq!(resumed.hud.rows_completed, 1);
    assert_eq!(resumed.revealed_count(), 5);
}
