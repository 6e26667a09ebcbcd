//! Turns pasted prose into titled, tokenized sentences.
//!
//! Layout of an import: line 1 is the title, line 2 may carry a `lang=<tag>`
//! header, and every later non-blank line is one sentence. Each sentence keeps
//! two parallel token arrays: surface tokens for display and candidate tokens
//! for matching input.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::ImportError;
use crate::locale::{LocaleSupport, StdLocale};

pub const DEFAULT_LANG: &str = "en";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const ABBREVIATIONS: [&str; 8] = ["e.g.", "i.e.", "etc.", "vs.", "cf.", "dr.", "mr.", "mrs."];

// Hyphens and apostrophes stay inside words; everything else that is not a
// letter, mark or number delimits.
static SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{M}\p{N}_\-'’]+").unwrap());
static WORD_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]").unwrap());
static QUOTE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^["“”«»‚‘’]+$"#).unwrap());
static PUNCT_OR_SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\p{P}\p{S}]$").unwrap());
static ACRONYM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\p{Lu}\.)+\p{Lu}?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSentence {
    pub surface_tokens: Vec<String>,
    pub candidate_tokens: Vec<String>,
    pub seed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedText {
    pub title: String,
    pub lang_full: String,
    pub lang_base: String,
    pub sentences: Vec<ImportedSentence>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LanguageHeader {
    lang_full: String,
    lang_base: String,
    consumes_line: bool,
}

impl LanguageHeader {
    fn default_language() -> Self {
        Self {
            lang_full: DEFAULT_LANG.to_string(),
            lang_base: DEFAULT_LANG.to_string(),
            consumes_line: false,
        }
    }
}

/// Strip byte-order marks and fold CRLF/CR into LF.
pub fn normalize_raw_text(input: &str) -> Result<String, ImportError> {
    let without_bom: String = input.chars().filter(|&c| c != '\u{feff}').collect();
    if without_bom.trim().is_empty() {
        return Err(ImportError::EmptyInput);
    }

    Ok(without_bom.replace("\r\n", "\n").replace('\r', "\n"))
}

pub fn parse_imported_text(raw: &str) -> Result<ImportedText, ImportError> {
    parse_imported_text_with(raw, &StdLocale)
}

pub fn parse_imported_text_with(
    raw: &str,
    locale: &dyn LocaleSupport,
) -> Result<ImportedText, ImportError> {
    let normalized = normalize_raw_text(raw)?;
    let lines: Vec<&str> = normalized.split('\n').collect();

    let title = lines[0].trim();
    if title.is_empty() {
        return Err(ImportError::MissingTitle);
    }

    let header = detect_language(lines.get(1).copied(), locale);
    let start_index = if header.consumes_line { 2 } else { 1 };

    let mut sentences = Vec::new();
    for (line_index, line) in lines.iter().enumerate().skip(start_index) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let surface_tokens = tokenize(trimmed);
        if surface_tokens.is_empty() {
            continue;
        }

        let candidate_tokens = surface_tokens
            .iter()
            .map(|token| {
                normalize_candidate_token(token, &header.lang_full, &header.lang_base, locale)
            })
            .collect();

        sentences.push(ImportedSentence {
            seed: sentence_seed(trimmed, line_index),
            surface_tokens,
            candidate_tokens,
        });
    }

    if sentences.is_empty() {
        return Err(ImportError::NoSentences);
    }

    debug!(
        "parsed import '{}' ({}): {} sentences",
        title,
        header.lang_full,
        sentences.len()
    );

    Ok(ImportedText {
        title: title.to_string(),
        lang_full: header.lang_full,
        lang_base: header.lang_base,
        sentences,
    })
}

fn detect_language(line: Option<&str>, locale: &dyn LocaleSupport) -> LanguageHeader {
    let Some(trimmed) = line.map(str::trim) else {
        return LanguageHeader::default_language();
    };

    let has_prefix = trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("lang="));
    if !has_prefix {
        return LanguageHeader::default_language();
    }

    let raw_tag = trimmed[5..].trim();
    let lang_full = if raw_tag.is_empty() {
        DEFAULT_LANG.to_string()
    } else {
        match locale.canonicalize_tag(raw_tag) {
            Some(tag) => tag.to_lowercase(),
            None => {
                warn!("unable to parse language tag '{raw_tag}', falling back to {DEFAULT_LANG}");
                DEFAULT_LANG.to_string()
            }
        }
    };
    let lang_base = lang_full
        .split('-')
        .next()
        .filter(|base| !base.is_empty())
        .unwrap_or(DEFAULT_LANG)
        .to_string();

    LanguageHeader {
        lang_full,
        lang_base,
        consumes_line: true,
    }
}

/// Split one sentence line into display tokens.
///
/// Whitespace never ends up inside a token. Separator runs between words are
/// dropped unless they are quotes, which get prefixed to the next word.
/// Trailing separators attach to the previous token.
pub fn tokenize(sentence: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for (group_index, group) in sentence.split_whitespace().enumerate() {
        let parts = split_runs(group);
        let mut after_whitespace = group_index > 0;

        for (i, part) in parts.iter().enumerate() {
            if WORD_CHAR.is_match(part) {
                tokens.push(format!("{buffer}{part}"));
                buffer.clear();
                after_whitespace = false;
                continue;
            }

            let is_quote = QUOTE_RUN.is_match(part);
            let has_upcoming_word = parts[i + 1..].iter().any(|p| WORD_CHAR.is_match(p));

            if has_upcoming_word {
                if is_quote {
                    buffer.push_str(part);
                }
            } else {
                let attached = if is_quote || !after_whitespace {
                    part.to_string()
                } else {
                    format!(" {part}")
                };
                match tokens.last_mut() {
                    Some(last) => last.push_str(&attached),
                    None => buffer.push_str(&attached),
                }
            }
            after_whitespace = false;
        }
    }

    if !buffer.is_empty() {
        if let Some(last) = tokens.last_mut() {
            last.push_str(&buffer);
        }
    }

    tokens
}

/// Alternating word and separator runs of one whitespace-free group, in order.
fn split_runs(group: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut cursor = 0;

    for m in SEPARATOR_RUN.find_iter(group) {
        if m.start() > cursor {
            parts.push(&group[cursor..m.start()]);
        }
        parts.push(m.as_str());
        cursor = m.end();
    }
    if cursor < group.len() {
        parts.push(&group[cursor..]);
    }

    parts
}

fn is_single_quote(c: char) -> bool {
    matches!(c, '\'' | '’' | '‘')
}

fn is_punct_or_symbol(c: char) -> bool {
    let mut buf = [0u8; 4];
    PUNCT_OR_SYMBOL.is_match(c.encode_utf8(&mut buf))
}

fn is_acronym_or_abbreviation(slice: &str) -> bool {
    ACRONYM.is_match(slice) || ABBREVIATIONS.contains(&slice.to_lowercase().as_str())
}

/// Matching form of a surface token: outer punctuation stripped, lowercased.
///
/// A trailing single quote only goes when a leading one was stripped, and a
/// trailing period survives on known abbreviations and acronyms.
pub fn normalize_candidate_token(
    token: &str,
    lang_full: &str,
    lang_base: &str,
    locale: &dyn LocaleSupport,
) -> String {
    let normalized: String = token.nfc().collect::<String>().trim().to_string();
    if normalized.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = normalized.chars().collect();
    let mut start = 0;
    let mut end = chars.len();
    let mut saw_opening_quote = false;

    while start < end {
        let c = chars[start];
        if is_single_quote(c) {
            saw_opening_quote = true;
        } else if !(is_punct_or_symbol(c) || c.is_whitespace()) {
            break;
        }
        start += 1;
    }

    while end > start {
        let c = chars[end - 1];
        if is_single_quote(c) {
            if !saw_opening_quote {
                break;
            }
            saw_opening_quote = false;
        } else if c == '.' {
            let slice: String = chars[start..end].iter().collect();
            if is_acronym_or_abbreviation(&slice) {
                break;
            }
        } else if !(is_punct_or_symbol(c) || c.is_whitespace()) {
            break;
        }
        end -= 1;
    }

    let stripped: String = chars[start..end].iter().collect();
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return String::new();
    }

    let mut locales = Vec::with_capacity(2);
    if !lang_full.is_empty() {
        locales.push(lang_full);
    }
    if !lang_base.is_empty() && lang_base != lang_full {
        locales.push(lang_base);
    }

    locale.lowercase(stripped, &locales)
}

/// FNV-1a over the UTF-16 code units of `"<sentence>|<line_index>"`.
pub fn sentence_seed(sentence: &str, line_index: usize) -> u32 {
    format!("{sentence}|{line_index}")
        .encode_utf16()
        .fold(FNV_OFFSET_BASIS, |hash, unit| {
            (hash ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
        })
}
