//! Play session state machine.
//!
//! Rows flow through three slots: `live` (being answered), `queued` (shown as
//! a preview) and `pending`. Every transition takes the time it happened at,
//! so active time is sampled at event boundaries and paused time never counts.

use std::collections::VecDeque;
use std::time::Instant;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::chunker::{retarget_row_for_mode, ChunkRow, Hand, InputMode};
use crate::hud::HudCounters;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Ready,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapMeta {
    pub text_id: Option<String>,
    pub total_rows: usize,
    pub total_tokens: usize,
    /// Identity of the row set; bootstrapping twice with the same key is a no-op.
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Bootstrap {
        rows: Vec<ChunkRow>,
        meta: BootstrapMeta,
    },
    Input(char),
    Pause,
    Resume,
    ApplyInputMode(InputMode),
    Reset,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaySession {
    pub text_id: Option<String>,
    pub loaded_key: Option<String>,
    pub live_row: Option<ChunkRow>,
    pub live_row_done: Vec<bool>,
    pub queued_row: Option<ChunkRow>,
    pub queued_row_done: Vec<bool>,
    pub pending_rows: VecDeque<ChunkRow>,
    pub pending_rows_done: VecDeque<Vec<bool>>,
    pub reveal_index: usize,
    pub total_rows: usize,
    pub sentences_completed: u64,
    pub hud: HudCounters,
    pub status: SessionStatus,
    /// Bumped on every mistake so a view can flash once per mistake.
    pub mistake_version: u64,
    pub last_active_at: Option<Instant>,
}

/// Pure transition: the state after `event` arrives at `now`.
pub fn transition(mut state: PlaySession, event: SessionEvent, now: Instant) -> PlaySession {
    state.apply(event, now);
    state
}

impl PlaySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: SessionEvent, now: Instant) {
        match event {
            SessionEvent::Bootstrap { rows, meta } => self.bootstrap(rows, meta, now),
            SessionEvent::Input(label) => self.handle_input(label, now),
            SessionEvent::Pause => self.pause(now),
            SessionEvent::Resume => self.resume(now),
            SessionEvent::ApplyInputMode(mode) => self.apply_input_mode(mode),
            SessionEvent::Reset => self.reset(),
        }
    }

    pub fn bootstrap(&mut self, rows: Vec<ChunkRow>, meta: BootstrapMeta, now: Instant) {
        if meta.key.is_some() && meta.key == self.loaded_key {
            return;
        }

        if self.status == SessionStatus::Ready {
            self.accrue_active_time(now);
        }

        if self.text_id != meta.text_id {
            self.hud = HudCounters::default();
            self.sentences_completed = 0;
        }
        self.hud.tokens_total = meta.total_tokens as u64;
        self.text_id = meta.text_id;
        self.loaded_key = meta.key;
        self.total_rows = meta.total_rows;
        self.reveal_index = 0;
        self.mistake_version = 0;

        let mut rows: VecDeque<ChunkRow> = rows.into();
        self.live_row = rows.pop_front();
        self.queued_row = rows.pop_front();
        self.live_row_done = done_array(self.live_row.as_ref());
        self.queued_row_done = done_array(self.queued_row.as_ref());
        self.pending_rows_done = rows.iter().map(|row| vec![false; row.len()]).collect();
        self.pending_rows = rows;

        if self.live_row.is_some() {
            self.status = SessionStatus::Ready;
            self.last_active_at = Some(now);
        } else {
            self.status = SessionStatus::Idle;
            self.last_active_at = None;
        }

        debug!(
            "bootstrapped session for {:?}: {} rows, {} tokens",
            self.text_id, self.total_rows, self.hud.tokens_total
        );
    }

    pub fn handle_input(&mut self, label: char, now: Instant) {
        if self.status != SessionStatus::Ready || self.live_row.is_none() {
            return;
        }
        self.accrue_active_time(now);

        let label = label.to_ascii_uppercase();
        let Some(row) = self.live_row.as_ref() else {
            return;
        };
        let Some(slot) = row.slot_for_label(label) else {
            self.record_mistake();
            return;
        };
        if self.live_row_done.get(slot).copied().unwrap_or(false) {
            return;
        }

        // Either the slot holds the awaited token, or a token with the same
        // text; duplicate words are interchangeable.
        let token_index = row.order[slot];
        let is_correct = token_index == self.reveal_index
            || match (row.tokens.get(token_index), row.tokens.get(self.reveal_index)) {
                (Some(pressed), Some(awaited)) => pressed.candidate == awaited.candidate,
                _ => false,
            };
        if !is_correct {
            self.record_mistake();
            return;
        }

        let row_len = row.len();
        if let Some(done) = self.live_row_done.get_mut(slot) {
            *done = true;
        }
        self.reveal_index += 1;
        self.hud.tokens_attempted += 1;
        self.hud.tokens_first_try_correct += 1;

        if self.reveal_index >= row_len {
            self.hud.rows_completed += 1;
            self.hud.streak += 1;
            self.promote_next_row();
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.status != SessionStatus::Ready {
            return;
        }
        self.accrue_active_time(now);
        self.last_active_at = None;
        self.status = SessionStatus::Paused;
    }

    pub fn resume(&mut self, now: Instant) {
        if self.status != SessionStatus::Paused {
            return;
        }
        self.last_active_at = Some(now);
        self.status = SessionStatus::Ready;
    }

    /// Re-point every row at the hand `mode` selects. Progress is kept.
    pub fn apply_input_mode(&mut self, mode: InputMode) {
        let rows = self
            .live_row
            .iter_mut()
            .chain(self.queued_row.iter_mut())
            .chain(self.pending_rows.iter_mut());
        for row in rows {
            retarget_row_for_mode(row, mode);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Active time including the stretch since the last event, for live display.
    pub fn active_ms_at(&self, now: Instant) -> u64 {
        let running = self
            .last_active_at
            .map(|last| now.saturating_duration_since(last).as_millis() as u64)
            .unwrap_or(0);
        self.hud.active_ms + running
    }

    /// Number of leading tokens of the text that have been revealed.
    pub fn revealed_count(&self) -> usize {
        match &self.live_row {
            Some(row) => row
                .tokens
                .first()
                .map(|token| token.absolute_index + self.reveal_index)
                .unwrap_or(0),
            None if self.is_completed() => self.hud.tokens_total as usize,
            None => 0,
        }
    }

    fn accrue_active_time(&mut self, now: Instant) {
        if let Some(last) = self.last_active_at {
            self.hud.active_ms += now.saturating_duration_since(last).as_millis() as u64;
        }
        self.last_active_at = Some(now);
    }

    fn record_mistake(&mut self) {
        self.hud.mistakes_total += 1;
        self.hud.tokens_attempted += 1;
        self.hud.streak = 0;
        self.mistake_version += 1;
    }

    fn promote_next_row(&mut self) {
        let finished_sentence = self.live_row.as_ref().map(|row| row.sentence_index);
        let next_sentence = self.queued_row.as_ref().map(|row| row.sentence_index);
        if finished_sentence.is_some() && finished_sentence != next_sentence {
            self.sentences_completed += 1;
        }

        let queued_done = std::mem::take(&mut self.queued_row_done);
        self.live_row = self.queued_row.take();
        self.live_row_done = match &self.live_row {
            Some(row) if queued_done.len() == row.len() => queued_done,
            other => done_array(other.as_ref()),
        };

        self.queued_row = self.pending_rows.pop_front();
        let pending_done = self.pending_rows_done.pop_front();
        self.queued_row_done = match (&self.queued_row, pending_done) {
            (Some(row), Some(done)) if done.len() == row.len() => done,
            (row, _) => done_array(row.as_ref()),
        };
        self.reveal_index = 0;

        if self.live_row.is_none() {
            self.status = SessionStatus::Completed;
            self.last_active_at = None;
            debug!(
                "session completed: {} rows, {} mistakes, {} ms active",
                self.hud.rows_completed, self.hud.mistakes_total, self.hud.active_ms
            );
        }
    }
}

fn done_array(row: Option<&ChunkRow>) -> Vec<bool> {
    row.map(|row| vec![false; row.len()]).unwrap_or_default()
}

/// Per-row state kept in a progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSnapshot {
    pub chunk_index: usize,
    pub hand: Hand,
    pub order: Vec<usize>,
    pub labels: Vec<char>,
    pub done: Vec<bool>,
}

/// Resumable state of an unfinished session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// `chunk_index` of the live row.
    pub row_pointer: usize,
    pub reveal_index: usize,
    pub sentences_completed: u64,
    pub rows: Vec<RowSnapshot>,
    pub hud: HudCounters,
}

impl PlaySession {
    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        let live = self.live_row.as_ref()?;

        let slots = std::iter::once((live, &self.live_row_done))
            .chain(self.queued_row.iter().map(|row| (row, &self.queued_row_done)))
            .chain(self.pending_rows.iter().zip(self.pending_rows_done.iter()));
        let rows = slots
            .map(|(row, done)| RowSnapshot {
                chunk_index: row.chunk_index,
                hand: row.hand,
                order: row.order.clone(),
                labels: row.labels.clone(),
                done: done.clone(),
            })
            .collect();

        Some(ProgressSnapshot {
            row_pointer: live.chunk_index,
            reveal_index: self.reveal_index,
            sentences_completed: self.sentences_completed,
            rows,
            hud: self.hud,
        })
    }

    /// Bootstrap `rows`, then pick up where `snapshot` left off.
    ///
    /// Rows whose shuffle no longer matches the snapshot start fresh. If the
    /// live row itself changed, its reveal progress is dropped.
    pub fn restore(
        &mut self,
        rows: Vec<ChunkRow>,
        meta: BootstrapMeta,
        snapshot: &ProgressSnapshot,
        now: Instant,
    ) {
        if snapshot.row_pointer >= rows.len() {
            self.bootstrap(rows, meta, now);
            return;
        }

        let tokens_total = meta.total_tokens as u64;
        let remaining = rows.into_iter().skip(snapshot.row_pointer).collect();
        self.reset();
        self.bootstrap(remaining, meta, now);

        let saved = |row: &ChunkRow| {
            snapshot
                .rows
                .iter()
                .find(|s| s.chunk_index == row.chunk_index && s.order == row.order)
                .filter(|s| s.done.len() == row.len())
                .map(|s| s.done.clone())
        };

        let live_done = self.live_row.as_ref().and_then(saved);
        if let Some(done) = live_done {
            let revealed = done.iter().filter(|&&d| d).count();
            if revealed == snapshot.reveal_index {
                self.live_row_done = done;
                self.reveal_index = revealed;
            }
        }
        if let Some(done) = self.queued_row.as_ref().and_then(saved) {
            self.queued_row_done = done;
        }
        let pending_done: VecDeque<Vec<bool>> = self
            .pending_rows
            .iter()
            .map(|row| saved(row).unwrap_or_else(|| vec![false; row.len()]))
            .collect();
        self.pending_rows_done = pending_done;

        self.hud = HudCounters {
            tokens_total,
            ..snapshot.hud
        };
        self.sentences_completed = snapshot.sentences_completed;
    }
}
