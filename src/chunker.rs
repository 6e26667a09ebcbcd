//! Splits sentences into fixed-size rows with a reproducible shuffled order.

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ImportError;
use crate::importer::ImportedSentence;
use crate::rng::{combine_seeds, Mulberry32};

pub const CHUNK_SIZE: usize = 4;

/// Bumping this reshuffles every row of every text.
pub const STORAGE_POLICY_VERSION: u32 = 1;

const SHUFFLE_ATTEMPTS: usize = 6;

const LEFT_KEYS: [char; 4] = ['A', 'S', 'D', 'F'];
const RIGHT_KEYS: [char; 4] = ['J', 'K', 'L', ';'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            Hand::Left
        } else {
            Hand::Right
        }
    }

    pub fn keys(self) -> &'static [char; 4] {
        match self {
            Hand::Left => &LEFT_KEYS,
            Hand::Right => &RIGHT_KEYS,
        }
    }

    pub fn labels(self, count: usize) -> Vec<char> {
        self.keys().iter().take(count).copied().collect()
    }
}

/// Which hands the player wants to practice with.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InputMode {
    Left,
    Right,
    #[default]
    Both,
}

impl InputMode {
    /// Both, then left only, then right only.
    pub fn cycled(self) -> Self {
        match self {
            InputMode::Both => InputMode::Left,
            InputMode::Left => InputMode::Right,
            InputMode::Right => InputMode::Both,
        }
    }

    fn hand_for(self, natural: Hand) -> Hand {
        match self {
            InputMode::Left => Hand::Left,
            InputMode::Right => Hand::Right,
            InputMode::Both => natural,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCard {
    pub surface: String,
    pub candidate: String,
    /// Position in the whole text's token stream.
    pub absolute_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRow {
    pub chunk_index: usize,
    /// Index of the sentence this row came from, within its text.
    pub sentence_index: usize,
    pub hand: Hand,
    /// Hand from strict alternation, restored when switching back to `InputMode::Both`.
    pub natural_hand: Hand,
    pub labels: Vec<char>,
    pub tokens: Vec<TokenCard>,
    /// `order[slot]` is the token index shown under `labels[slot]`.
    pub order: Vec<usize>,
    pub expected_order: Vec<usize>,
}

impl ChunkRow {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn slot_for_label(&self, label: char) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub policy_version: u32,
    pub input_mode: InputMode,
    /// Hand index of the first row; even is left, odd is right.
    pub starting_hand_index: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            policy_version: STORAGE_POLICY_VERSION,
            input_mode: InputMode::Both,
            starting_hand_index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceChunks {
    pub rows: Vec<ChunkRow>,
    /// Hand index to pass as `starting_hand_index` for the following sentence.
    pub next_hand_index: usize,
}

pub fn build_chunks_for_sentence(
    sentence: &ImportedSentence,
    options: &ChunkOptions,
) -> Result<SentenceChunks, ImportError> {
    let surface = &sentence.surface_tokens;
    let candidate = &sentence.candidate_tokens;
    if surface.len() != candidate.len() {
        return Err(ImportError::LengthMismatch);
    }

    let chunk_size = options.chunk_size.clamp(1, CHUNK_SIZE);
    let mut rows = Vec::with_capacity(surface.len().div_ceil(chunk_size));
    let mut cursor = 0;

    while cursor < surface.len() {
        let size = chunk_size.min(surface.len() - cursor);
        let row_index = rows.len();

        let tokens = (cursor..cursor + size)
            .map(|i| TokenCard {
                surface: surface[i].clone(),
                candidate: candidate[i].clone(),
                absolute_index: i,
            })
            .collect();

        let natural_hand = Hand::from_index(options.starting_hand_index + row_index);
        let hand = options.input_mode.hand_for(natural_hand);
        let row_seed = combine_seeds(sentence.seed, row_index as u32, options.policy_version);

        rows.push(ChunkRow {
            chunk_index: row_index,
            sentence_index: 0,
            hand,
            natural_hand,
            labels: hand.labels(size),
            tokens,
            order: shuffle_order(size, row_seed),
            expected_order: (0..size).collect(),
        });

        cursor += size;
    }

    let next_hand_index = options.starting_hand_index + rows.len();
    Ok(SentenceChunks {
        rows,
        next_hand_index,
    })
}

/// Display order for a row of `size` tokens. Never the identity for `size >= 3`.
pub fn shuffle_order(size: usize, seed: u32) -> Vec<usize> {
    let identity: Vec<usize> = (0..size).collect();
    if size <= 1 {
        return identity;
    }

    let mut rng = Mulberry32::new(seed);

    if size == 2 {
        return if rng.next_f64() >= 0.5 {
            vec![1, 0]
        } else {
            identity
        };
    }

    for _ in 0..SHUFFLE_ATTEMPTS {
        let mut candidate = identity.clone();
        for i in (1..size).rev() {
            let j = rng.next_index(i + 1);
            candidate.swap(i, j);
        }
        if candidate != identity {
            return candidate;
        }
    }

    let mut forced = identity;
    forced.swap(size - 1, size - 2);
    forced
}

/// Point a row at the hand `mode` selects. Order and tokens are untouched.
pub fn retarget_row_for_mode(row: &mut ChunkRow, mode: InputMode) {
    row.hand = mode.hand_for(row.natural_hand);
    row.labels = row.hand.labels(row.tokens.len());
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextToken {
    pub surface: String,
    pub absolute_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedRows {
    pub rows: Vec<ChunkRow>,
    /// Surface tokens per sentence, for the running-context display.
    pub context: Vec<Vec<ContextToken>>,
    pub total_tokens: usize,
}

/// Chunk a whole text, threading hand alternation and token offsets across sentences.
pub fn prepare_rows(
    sentences: &[ImportedSentence],
    policy_version: u32,
    input_mode: InputMode,
) -> Result<PreparedRows, ImportError> {
    let mut prepared = PreparedRows::default();
    let mut hand_index = 0;

    for (sentence_index, sentence) in sentences.iter().enumerate() {
        let options = ChunkOptions {
            policy_version,
            input_mode,
            starting_hand_index: hand_index,
            ..ChunkOptions::default()
        };
        let chunks = build_chunks_for_sentence(sentence, &options)?;
        hand_index = chunks.next_hand_index;

        let offset = prepared.total_tokens;
        for mut row in chunks.rows {
            row.chunk_index = prepared.rows.len();
            row.sentence_index = sentence_index;
            for token in &mut row.tokens {
                token.absolute_index += offset;
            }
            prepared.rows.push(row);
        }

        prepared.context.push(
            sentence
                .surface_tokens
                .iter()
                .enumerate()
                .map(|(i, surface)| ContextToken {
                    surface: surface.clone(),
                    absolute_index: offset + i,
                })
                .collect(),
        );
        prepared.total_tokens += sentence.surface_tokens.len();
    }

    debug!(
        "prepared {} rows over {} tokens ({input_mode} mode)",
        prepared.rows.len(),
        prepared.total_tokens
    );
    Ok(prepared)
}
