//! Morphological tokenizer integration
//!
//! The first reading source. A [`MorphologicalAnalyzer`] produces raw
//! morphemes (surface plus an ipadic-style feature string); the
//! [`TokenizerAdapter`] turns those into [`Line`]s of [`Token`]s with
//! normalized hiragana readings and verified character ranges. The concrete
//! vibrato-backed analyzer is feature-gated so the crate builds without a
//! dictionary on hand; tests drive the adapter through fakes.

use std::ops::Range;

use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result, UpstreamKind};
use crate::kana::{self, kata_to_hira};
use crate::types::{Line, Token};

/// Tokenizer errors
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// Dictionary missing, unreadable, or the analyzer failed outright.
    #[error("tokenizer unavailable: {0}")]
    Unavailable(String),

    /// Analyzer output that cannot be reconciled with the input text.
    #[error("tokenizer output invalid: {0}")]
    Invalid(String),
}

impl From<TokenizerError> for Error {
    fn from(e: TokenizerError) -> Self {
        match e {
            TokenizerError::Unavailable(message) => {
                Error::Upstream { upstream: UpstreamKind::Tokenizer, message }
            }
            TokenizerError::Invalid(message) => {
                Error::Malformed { upstream: UpstreamKind::Tokenizer, message }
            }
        }
    }
}

/// One raw morpheme from the analyzer.
#[derive(Debug, Clone)]
pub struct RawMorpheme {
    pub surface: String,
    /// ipadic-style comma-separated feature string. Field 0 is the
    /// part-of-speech, field 7 the katakana reading; `*` means absent.
    pub feature: String,
    /// Character range within the line, when the analyzer tracks it.
    /// Absent ranges are recovered by scanning for the surface.
    pub char_range: Option<Range<usize>>,
}

/// A morphological analyzer for one line of text.
///
/// Implementations are synchronous; tokenization is CPU-bound and fast
/// relative to the network calls around it.
pub trait MorphologicalAnalyzer: Send + Sync {
    fn morphemes(&self, text: &str) -> std::result::Result<Vec<RawMorpheme>, TokenizerError>;

    /// Alternate dictionary readings for a surface form, beyond the one the
    /// analyzer chose in context. Analyzers without candidate enumeration
    /// return nothing.
    fn reading_variants(&self, _surface: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Split an ipadic feature string into part-of-speech and katakana reading.
fn parse_feature(feature: &str) -> (String, Option<String>) {
    let fields: Vec<&str> = feature.split(',').collect();
    let pos = fields.first().copied().unwrap_or("*").to_string();
    let reading = fields
        .get(7)
        .copied()
        .filter(|r| !r.is_empty() && *r != "*")
        .map(String::from);
    (pos, reading)
}

/// Builds [`Line`]s from raw analyzer output.
pub struct TokenizerAdapter<A: MorphologicalAnalyzer> {
    analyzer: A,
}

impl<A: MorphologicalAnalyzer> TokenizerAdapter<A> {
    pub fn new(analyzer: A) -> Self {
        TokenizerAdapter { analyzer }
    }

    /// Tokenize one line.
    ///
    /// Character ranges are taken from the analyzer when present and
    /// recovered by forward-scanning otherwise (analyzers configured to
    /// skip whitespace leave gaps between surfaces). A surface that cannot
    /// be located in the line text means the analyzer and the input
    /// disagree, which fails the whole line rather than guessing.
    pub fn tokenize_line(&self, line_id: u32, text: &str) -> Result<Line> {
        let morphemes = self.analyzer.morphemes(text)?;
        let chars: Vec<char> = text.chars().collect();
        let mut cursor = 0usize;
        let mut tokens = Vec::with_capacity(morphemes.len());

        for (token_index, morpheme) in morphemes.into_iter().enumerate() {
            let surface_chars: Vec<char> = morpheme.surface.chars().collect();
            let char_range = match morpheme.char_range {
                Some(range) => {
                    let matches_text = range.start >= cursor
                        && range.end <= chars.len()
                        && chars[range.start..range.end] == surface_chars[..];
                    if !matches_text {
                        return Err(TokenizerError::Invalid(format!(
                            "line {line_id}: surface {:?} does not match reported range {:?}",
                            morpheme.surface, range
                        ))
                        .into());
                    }
                    range
                }
                None => {
                    let start = find_surface(&chars, cursor, &surface_chars).ok_or_else(|| {
                        TokenizerError::Invalid(format!(
                            "line {line_id}: surface {:?} not found at or after char {cursor}",
                            morpheme.surface
                        ))
                    })?;
                    start..start + surface_chars.len()
                }
            };
            cursor = char_range.end;

            let (part_of_speech, reading_kata) = parse_feature(&morpheme.feature);
            let unknown = reading_kata.is_none();
            let reading_hiragana = match reading_kata {
                Some(kata) => kata_to_hira(&kata),
                // an unknown word that is already kana reads as itself
                None if morpheme.surface.chars().all(kana::is_kana) => {
                    kata_to_hira(&morpheme.surface)
                }
                None => String::new(),
            };
            let reading_candidates =
                alternate_readings(&self.analyzer, &morpheme.surface, &reading_hiragana);

            tokens.push(Token {
                surface: morpheme.surface,
                reading_hiragana,
                reading_candidates,
                token_index,
                line_id,
                char_range,
                part_of_speech,
                unknown,
            });
        }

        debug!(line_id, tokens = tokens.len(), "tokenized line");
        Ok(Line { line_id, text: text.to_string(), tokens })
    }

    /// Tokenize a document, numbering lines from 1.
    pub fn tokenize_lines(&self, texts: &[String]) -> Result<Vec<Line>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| self.tokenize_line(i as u32 + 1, text))
            .collect()
    }
}

fn find_surface(chars: &[char], from: usize, surface: &[char]) -> Option<usize> {
    if surface.is_empty() {
        return Some(from);
    }
    let last_start = chars.len().checked_sub(surface.len())?;
    (from..=last_start).find(|&i| chars[i..i + surface.len()] == surface[..])
}

/// Dictionary variants folded to hiragana, deduplicated, primary removed.
fn alternate_readings<A: MorphologicalAnalyzer>(
    analyzer: &A,
    surface: &str,
    primary_hiragana: &str,
) -> Vec<String> {
    let mut seen = Vec::new();
    for variant in analyzer.reading_variants(surface) {
        let hira = kata_to_hira(&variant);
        if hira != primary_hiragana && !seen.contains(&hira) {
            seen.push(hira);
        }
    }
    seen
}

// ============================================================================
// Vibrato-backed analyzer (feature-gated)
// ============================================================================

#[cfg(feature = "vibrato")]
pub use vibrato_backend::VibratoAnalyzer;

#[cfg(feature = "vibrato")]
mod vibrato_backend {
    use super::{RawMorpheme, TokenizerError};
    use std::path::Path;

    /// Analyzer backed by a vibrato dictionary.
    ///
    /// Expects an uncompressed system dictionary; decompress `.dic.zst`
    /// files before pointing the config at them.
    pub struct VibratoAnalyzer {
        tokenizer: vibrato::Tokenizer,
    }

    impl VibratoAnalyzer {
        /// Build the analyzer from run configuration.
        pub fn from_config(
            config: &crate::config::TokenizerConfig,
        ) -> Result<Self, TokenizerError> {
            let path = config.dictionary_path.as_deref().ok_or_else(|| {
                TokenizerError::Unavailable(
                    "tokenizer.dictionary_path is not configured".to_string(),
                )
            })?;
            Self::from_dictionary_path(path)
        }

        pub fn from_dictionary_path(path: &Path) -> Result<Self, TokenizerError> {
            let file = std::fs::File::open(path).map_err(|e| {
                TokenizerError::Unavailable(format!("dictionary {}: {e}", path.display()))
            })?;
            let dict = vibrato::Dictionary::read(std::io::BufReader::new(file))
                .map_err(|e| TokenizerError::Unavailable(format!("dictionary load: {e}")))?;
            let tokenizer = vibrato::Tokenizer::new(dict)
                .ignore_space(true)
                .map_err(|e| TokenizerError::Unavailable(format!("tokenizer init: {e}")))?
                .max_grouping_len(24);
            Ok(VibratoAnalyzer { tokenizer })
        }
    }

    impl super::MorphologicalAnalyzer for VibratoAnalyzer {
        fn morphemes(&self, text: &str) -> Result<Vec<RawMorpheme>, TokenizerError> {
            let mut worker = self.tokenizer.new_worker();
            worker.reset_sentence(text);
            worker.tokenize();
            Ok(worker
                .token_iter()
                .map(|t| RawMorpheme {
                    surface: t.surface().to_string(),
                    feature: t.feature().to_string(),
                    char_range: Some(t.range_char()),
                })
                .collect())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixture analyzer returning canned morphemes per line text.
    struct FakeAnalyzer {
        rows: Vec<(&'static str, Vec<RawMorpheme>)>,
        variants: Vec<(&'static str, Vec<&'static str>)>,
    }

    fn raw(surface: &str, feature: &str) -> RawMorpheme {
        RawMorpheme { surface: surface.to_string(), feature: feature.to_string(), char_range: None }
    }

    impl MorphologicalAnalyzer for FakeAnalyzer {
        fn morphemes(&self, text: &str) -> std::result::Result<Vec<RawMorpheme>, TokenizerError> {
            self.rows
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, ms)| ms.clone())
                .ok_or_else(|| TokenizerError::Invalid(format!("no fixture for {text:?}")))
        }

        fn reading_variants(&self, surface: &str) -> Vec<String> {
            self.variants
                .iter()
                .find(|(s, _)| *s == surface)
                .map(|(_, vs)| vs.iter().map(|v| v.to_string()).collect())
                .unwrap_or_default()
        }
    }

    #[test]
    fn test_tokenize_line_readings_and_ranges() {
        let analyzer = FakeAnalyzer {
            rows: vec![(
                "彼の方です",
                vec![
                    raw("彼", "名詞,代名詞,一般,*,*,*,彼,カレ,カレ"),
                    raw("の", "助詞,連体化,*,*,*,*,の,ノ,ノ"),
                    raw("方", "名詞,非自立,一般,*,*,*,方,ホウ,ホー"),
                    raw("です", "助動詞,*,*,*,特殊・デス,基本形,です,デス,デス"),
                ],
            )],
            variants: vec![("方", vec!["ホウ", "カタ", "ガタ"])],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let line = adapter.tokenize_line(1, "彼の方です").unwrap();

        assert_eq!(line.tokens.len(), 4);
        let kata = &line.tokens[2];
        assert_eq!(kata.surface, "方");
        assert_eq!(kata.reading_hiragana, "ほう");
        assert_eq!(kata.char_range, 2..3);
        assert_eq!(kata.reading_candidates, vec!["かた", "がた"]);
        assert!(kata.is_ambiguous());
        assert!(!kata.is_function_word());
        assert!(line.tokens[1].is_function_word());
        assert_eq!(line.tokens[3].char_range, 3..5);
    }

    #[test]
    fn test_whitespace_gap_is_scanned_over() {
        let analyzer = FakeAnalyzer {
            rows: vec![(
                "東京 タワー",
                vec![
                    raw("東京", "名詞,固有名詞,地域,一般,*,*,東京,トウキョウ,トーキョー"),
                    raw("タワー", "名詞,一般,*,*,*,*,タワー,タワー,タワー"),
                ],
            )],
            variants: vec![],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let line = adapter.tokenize_line(1, "東京 タワー").unwrap();
        assert_eq!(line.tokens[0].char_range, 0..2);
        assert_eq!(line.tokens[1].char_range, 3..6);
    }

    #[test]
    fn test_surface_mismatch_fails_line() {
        let analyzer = FakeAnalyzer {
            rows: vec![("あい", vec![raw("う", "名詞,一般,*,*,*,*,う,ウ,ウ")])],
            variants: vec![],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let err = adapter.tokenize_line(1, "あい").unwrap_err();
        assert!(matches!(err, Error::Malformed { upstream: UpstreamKind::Tokenizer, .. }));
    }

    #[test]
    fn test_reported_range_is_validated() {
        let mut morpheme = raw("あ", "感動詞,*,*,*,*,*,あ,ア,ア");
        morpheme.char_range = Some(1..2); // points at い, not あ
        let analyzer = FakeAnalyzer { rows: vec![("あい", vec![morpheme])], variants: vec![] };
        let adapter = TokenizerAdapter::new(analyzer);
        assert!(adapter.tokenize_line(1, "あい").is_err());
    }

    #[test]
    fn test_unknown_kana_surface_reads_as_itself() {
        let analyzer = FakeAnalyzer {
            rows: vec![("グーグル", vec![raw("グーグル", "名詞,固有名詞,組織,*")])],
            variants: vec![],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let line = adapter.tokenize_line(1, "グーグル").unwrap();
        assert!(line.tokens[0].unknown);
        assert_eq!(line.tokens[0].reading_hiragana, "ぐーぐる");
    }

    #[test]
    fn test_unknown_ideograph_surface_has_empty_reading() {
        let analyzer = FakeAnalyzer {
            rows: vec![("魑魅", vec![raw("魑魅", "名詞,一般,*,*")])],
            variants: vec![],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let line = adapter.tokenize_line(1, "魑魅").unwrap();
        assert!(line.tokens[0].unknown);
        assert_eq!(line.tokens[0].reading_hiragana, "");
    }

    #[test]
    fn test_tokenize_lines_numbers_from_one() {
        let analyzer = FakeAnalyzer {
            rows: vec![
                ("ア", vec![raw("ア", "感動詞,*,*,*,*,*,ア,ア,ア")]),
                ("イ", vec![raw("イ", "名詞,一般,*,*,*,*,イ,イ,イ")]),
            ],
            variants: vec![],
        };
        let adapter = TokenizerAdapter::new(analyzer);
        let lines = adapter.tokenize_lines(&["ア".to_string(), "イ".to_string()]).unwrap();
        assert_eq!(lines[0].line_id, 1);
        assert_eq!(lines[1].line_id, 2);
    }
}
