//! Core data model shared across extraction, consensus and rendering
//!
//! Readings flow through three shapes: tokenizer output ([`Token`] grouped
//! into [`Line`]s), annotator output ([`RubyInfo`]), and the synthesis
//! engine's phrase structure ([`AudioQuery`] / [`AccentPhrase`] / [`Mora`]).
//! The consensus stages produce [`RiskySpan`]s, [`KanaPatch`]es and
//! [`ReadingDecision`] records from those, and the pipeline summarizes each
//! text block as a [`BlockOutcome`].

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Scores
// ============================================================================

/// A score in `[0.0, 1.0]`, used both for token risk and patch confidence.
///
/// Construction clamps out-of-range values rather than rejecting them, so
/// arithmetic on scores can stay unchecked at call sites.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Score(f32);

impl Score {
    pub const ZERO: Score = Score(0.0);
    pub const MAX: Score = Score(1.0);

    pub fn new(value: f32) -> Self {
        Score(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// The larger of two scores.
    pub fn max(self, other: Score) -> Score {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl From<f32> for Score {
    fn from(value: f32) -> Self {
        Score::new(value)
    }
}

impl From<Score> for f32 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

// ============================================================================
// Tokenizer output
// ============================================================================

/// One morpheme of a source line, as reported by the morphological analyzer.
#[derive(Debug, Clone)]
pub struct Token {
    /// Surface form exactly as it appears in the line.
    pub surface: String,
    /// Primary reading in hiragana. Empty when the analyzer produced none.
    pub reading_hiragana: String,
    /// Alternate readings beyond the primary one, hiragana, deduplicated.
    pub reading_candidates: Vec<String>,
    /// Position of this token within its line, starting at 0.
    pub token_index: usize,
    /// Line this token belongs to.
    pub line_id: u32,
    /// Character offsets of the surface within the line text.
    pub char_range: Range<usize>,
    /// Coarse part-of-speech tag from the analyzer (e.g. 名詞, 助詞).
    pub part_of_speech: String,
    /// True when the analyzer fell back to an out-of-vocabulary guess.
    pub unknown: bool,
}

impl Token {
    /// True for particles, auxiliaries and symbols, which are never reading
    /// hazards on their own.
    pub fn is_function_word(&self) -> bool {
        matches!(self.part_of_speech.as_str(), "助詞" | "助動詞" | "記号")
    }

    /// True when the analyzer reported more than one plausible reading.
    pub fn is_ambiguous(&self) -> bool {
        !self.reading_candidates.is_empty()
    }
}

/// One line of input text together with its tokenization.
#[derive(Debug, Clone)]
pub struct Line {
    pub line_id: u32,
    pub text: String,
    pub tokens: Vec<Token>,
}

// ============================================================================
// Annotator output
// ============================================================================

/// One surface/ruby pair from the annotator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubyToken {
    pub surface: String,
    pub ruby: String,
}

/// Ruby annotations for a single line.
#[derive(Debug, Clone, Default)]
pub struct RubyLine {
    pub pairs: Vec<RubyToken>,
}

/// Ruby annotations collected across the whole run, keyed by line.
///
/// The annotator is best-effort; lines it skipped or garbled are simply
/// absent. Raw response payloads are retained for the audit log.
#[derive(Debug, Clone, Default)]
pub struct RubyInfo {
    pub lines: HashMap<u32, RubyLine>,
    pub raw_payloads: Vec<String>,
}

impl RubyInfo {
    /// Reading for the `nth` occurrence (0-based) of `surface` within a line.
    ///
    /// Matching consumes pairs in order, so repeated surfaces resolve to
    /// their positional annotation.
    pub fn reading_for(&self, line_id: u32, surface: &str, nth: usize) -> Option<&str> {
        let line = self.lines.get(&line_id)?;
        line.pairs
            .iter()
            .filter(|pair| pair.surface == surface)
            .nth(nth)
            .map(|pair| pair.ruby.as_str())
    }

    /// Merge annotations from one response chunk into the collection.
    pub fn absorb(&mut self, line_id: u32, pairs: Vec<RubyToken>) {
        self.lines.entry(line_id).or_default().pairs.extend(pairs);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ============================================================================
// Synthesis engine schema
// ============================================================================

/// One mora of the engine's phonetic analysis.
///
/// Field names follow the engine's JSON schema; `consonant` is absent for
/// vowel-only moras, the moraic nasal and the sokuon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mora {
    pub text: String,
    pub consonant: Option<String>,
    pub consonant_length: Option<f32>,
    pub vowel: String,
    pub vowel_length: f32,
    pub pitch: f32,
}

/// One accent phrase of the engine's analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccentPhrase {
    pub moras: Vec<Mora>,
    pub accent: i64,
    pub pause_mora: Option<Mora>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_interrogative: Option<bool>,
}

/// The engine's full synthesis query.
///
/// Only `accent_phrases` is touched by correction; every other field the
/// engine returned (speed, pitch, volume, sampling settings and anything a
/// newer engine adds) is carried in `extra` and round-trips untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioQuery {
    pub accent_phrases: Vec<AccentPhrase>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AudioQuery {
    /// Total mora count across accent phrases, pause moras excluded.
    pub fn mora_count(&self) -> usize {
        self.accent_phrases.iter().map(|p| p.moras.len()).sum()
    }

    /// Concatenated mora text across accent phrases, pause moras excluded.
    pub fn reading_text(&self) -> String {
        self.accent_phrases
            .iter()
            .flat_map(|p| p.moras.iter())
            .map(|m| m.text.as_str())
            .collect()
    }
}

// ============================================================================
// Consensus products
// ============================================================================

/// A token flagged as a potential mispronunciation site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskySpan {
    pub line_id: u32,
    pub token_index: usize,
    pub surface: String,
    pub risk_score: Score,
    /// Human-readable reason the token was flagged.
    pub reason: String,
    /// Known-good reading from the hazard dictionary, when one exists.
    pub corrected_reading: Option<String>,
}

/// A replacement of a contiguous mora range within one block's audio query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanaPatch {
    pub block_id: String,
    pub line_id: u32,
    pub token_index: usize,
    /// Range into the block's flattened mora sequence.
    pub mora_range: Range<usize>,
    /// Corrected reading in katakana. Always present.
    pub correct_kana: String,
    /// Fully constructed replacement moras. When present they take priority
    /// over `correct_kana`; when absent only mora text is rewritten.
    pub correct_moras: Option<Vec<Mora>>,
    pub confidence: Score,
}

/// Verdict for one audited token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// All available sources agreed.
    Agree,
    /// A single source dissented; treated as extractor noise and logged only.
    Noise,
    /// A correction was produced and applied.
    Patch,
    /// Sources conflicted and no side could be trusted automatically.
    Review,
    /// The token never reached comparison (e.g. alignment was too poor).
    Unchecked,
}

/// Audit-log record for one token comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingDecision {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub block_id: String,
    pub line_id: u32,
    pub surface: String,
    /// Tokenizer reading, normalized katakana.
    pub tokenizer_reading: String,
    /// Annotator reading, normalized katakana. Absent when the annotator
    /// produced nothing for this token.
    pub annotator_reading: Option<String>,
    /// Engine reading for the aligned mora span, normalized katakana.
    pub engine_reading: String,
    pub decision: Decision,
    pub risk_score: Score,
    /// The reading actually rendered, when a patch was applied.
    pub applied_reading: Option<String>,
}

// ============================================================================
// Run products
// ============================================================================

/// Audit result for one text block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditStatus {
    /// Every audited token agreed; audio rendered from the untouched query.
    Clean,
    /// Corrections were spliced in before rendering.
    Corrected { patches: usize },
    /// Rendered, but some tokens need a human ear; their surfaces listed.
    /// Patches applied alongside (if any) are counted here too.
    NeedsReview { surfaces: Vec<String>, patches: usize },
    /// The audit could not run; audio (if any) is the engine's default.
    Unaudited { reason: String },
}

/// Final product for one block: audit status plus rendered audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockOutcome {
    pub block_id: String,
    #[serde(flatten)]
    pub status: AuditStatus,
    /// Rendered WAV bytes. Empty when synthesis failed.
    #[serde(skip)]
    pub audio: Vec<u8>,
}

/// Aggregate counters for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub blocks_total: usize,
    pub blocks_clean: usize,
    pub blocks_corrected: usize,
    pub blocks_needing_review: usize,
    pub blocks_unaudited: usize,
    pub patches_applied: usize,
}

impl RunReport {
    pub fn new(run_id: Uuid) -> Self {
        RunReport {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            blocks_total: 0,
            blocks_clean: 0,
            blocks_corrected: 0,
            blocks_needing_review: 0,
            blocks_unaudited: 0,
            patches_applied: 0,
        }
    }

    /// Fold one block outcome into the counters.
    pub fn absorb(&mut self, outcome: &BlockOutcome) {
        self.blocks_total += 1;
        match &outcome.status {
            AuditStatus::Clean => self.blocks_clean += 1,
            AuditStatus::Corrected { patches } => {
                self.blocks_corrected += 1;
                self.patches_applied += patches;
            }
            AuditStatus::NeedsReview { patches, .. } => {
                self.blocks_needing_review += 1;
                self.patches_applied += patches;
            }
            AuditStatus::Unaudited { .. } => self.blocks_unaudited += 1,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

// ============================================================================
// Tests
// ============================================================================
