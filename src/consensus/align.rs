//! Token-to-mora alignment
//!
//! The synthesis engine reports its phonetic analysis as accent phrases of
//! moras with no reference back to the input tokens. To compare the
//! engine's reading of a token against the tokenizer's, the flattened mora
//! sequence is walked in lockstep with the tokens: each token greedily
//! consumes as many moras as its own reading suggests, and the final token
//! absorbs whatever remains so no mora is dropped or counted twice.
//!
//! The walk is a heuristic. Contracted sounds, engine-side respellings and
//! unknown words all bend the token-to-mora ratio, so every alignment
//! carries a confidence grade instead of a correctness claim; only exact
//! and fuzzy grades may feed automatic patching.

use crate::kana;
use crate::types::{AccentPhrase, Mora, Token};

/// How well a token's aligned moras match its expected reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentConfidence {
    /// Aligned mora text equals the tokenizer reading after normalization.
    Exact,
    /// Close but not equal; still trustworthy enough to compare readings.
    Fuzzy,
    /// The mora span probably does not correspond to this token.
    Low,
}

impl AlignmentConfidence {
    /// Whether comparisons over this span may authorize a patch.
    pub fn comparable(self) -> bool {
        !matches!(self, AlignmentConfidence::Low)
    }
}

/// One token's slice of the block's flattened mora sequence.
#[derive(Debug, Clone)]
pub struct TokenAlignment {
    pub line_id: u32,
    pub token_index: usize,
    /// Range into the flattened mora list (pause moras excluded).
    pub mora_range: std::ops::Range<usize>,
    /// Concatenated text of the aligned moras, katakana.
    pub engine_reading: String,
    pub confidence: AlignmentConfidence,
}

/// Align `tokens` against the flattened moras of `phrases`.
///
/// Produces one entry per token, in order. Ranges are disjoint, ascending,
/// and cover exactly the full mora sequence: the last token absorbs any
/// surplus, and tokens beyond an exhausted sequence receive empty ranges.
/// `fuzz_threshold` is the minimum normalized similarity (0.0 to 1.0) for
/// the `Fuzzy` grade.
pub fn align_tokens(
    tokens: &[Token],
    phrases: &[AccentPhrase],
    fuzz_threshold: f64,
) -> Vec<TokenAlignment> {
    let flat: Vec<&Mora> = phrases.iter().flat_map(|p| p.moras.iter()).collect();
    let total = flat.len();
    let mut cursor = 0usize;
    let mut alignments = Vec::with_capacity(tokens.len());

    for (i, token) in tokens.iter().enumerate() {
        let expected = expected_moras(token);
        let is_last = i + 1 == tokens.len();
        let end = if is_last { total } else { (cursor + expected).min(total) };
        let range = cursor..end;
        cursor = end;

        let engine_reading: String =
            flat[range.clone()].iter().map(|m| m.text.as_str()).collect();
        let confidence = grade(token, expected, &engine_reading, fuzz_threshold);

        alignments.push(TokenAlignment {
            line_id: token.line_id,
            token_index: token.token_index,
            mora_range: range,
            engine_reading,
            confidence,
        });
    }

    alignments
}

/// Moras this token should occupy, judged from its reading. Tokens whose
/// reading carries no kana (punctuation, readingless unknowns) expect none;
/// readingless unknowns fall back to their surface length as a rough guess.
fn expected_moras(token: &Token) -> usize {
    let reading_kana = kana::kana_chars(&kana::hira_to_kata(&token.reading_hiragana));
    if !reading_kana.is_empty() {
        return kana::mora_count(&reading_kana);
    }
    if token.is_function_word() {
        return 0;
    }
    if token.reading_hiragana.is_empty() && !token.surface.is_empty() {
        // no reading at all: assume one mora per character
        return token.surface.chars().count();
    }
    0
}

fn grade(
    token: &Token,
    expected: usize,
    engine_reading: &str,
    fuzz_threshold: f64,
) -> AlignmentConfidence {
    let consumed = kana::mora_count(engine_reading);
    if expected == 0 && consumed == 0 {
        // nothing to align; trivially exact
        return AlignmentConfidence::Exact;
    }
    let token_norm = kana::normalize_reading(&token.reading_hiragana);
    if token_norm.is_empty() {
        return AlignmentConfidence::Low;
    }
    let engine_norm = kana::normalize_reading(engine_reading);
    if engine_norm == token_norm {
        return AlignmentConfidence::Exact;
    }
    // Disagreement in content is fine (that is what the diff stage is
    // for); the grade only asks whether this is plausibly the right span.
    if strsim::normalized_levenshtein(&engine_norm, &token_norm) >= fuzz_threshold {
        AlignmentConfidence::Fuzzy
    } else if consumed == expected && consumed > 0 {
        // right-sized span with different content: plausible dissent
        AlignmentConfidence::Fuzzy
    } else {
        AlignmentConfidence::Low
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn token(surface: &str, reading_hira: &str, pos: &str, index: usize) -> Token {
        Token {
            surface: surface.to_string(),
            reading_hiragana: reading_hira.to_string(),
            reading_candidates: Vec::new(),
            token_index: index,
            line_id: 1,
            char_range: 0..surface.chars().count(),
            part_of_speech: pos.to_string(),
            unknown: false,
        }
    }

    fn mora(text: &str) -> Mora {
        let (consonant, vowel) = crate::kana::kana_phonemes(text)
            .map(|(c, v)| (c.map(String::from), v.to_string()))
            .unwrap_or((None, "a".to_string()));
        Mora {
            text: text.to_string(),
            consonant_length: consonant.as_ref().map(|_| 0.05),
            consonant,
            vowel,
            vowel_length: 0.1,
            pitch: 5.5,
        }
    }

    fn phrase(texts: &[&str]) -> AccentPhrase {
        AccentPhrase {
            moras: texts.iter().map(|t| mora(t)).collect(),
            accent: 1,
            pause_mora: None,
            is_interrogative: None,
        }
    }

    #[test]
    fn test_lockstep_alignment() {
        let tokens = vec![
            token("彼", "かれ", "名詞", 0),
            token("の", "の", "助詞", 1),
            token("方", "ほう", "名詞", 2),
        ];
        let phrases = vec![phrase(&["カ", "レ", "ノ"]), phrase(&["ホ", "ウ"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);

        assert_eq!(aligned[0].mora_range, 0..2);
        assert_eq!(aligned[0].engine_reading, "カレ");
        assert_eq!(aligned[0].confidence, AlignmentConfidence::Exact);
        assert_eq!(aligned[1].mora_range, 2..3);
        assert_eq!(aligned[2].mora_range, 3..5);
        assert_eq!(aligned[2].engine_reading, "ホウ");
        assert_eq!(aligned[2].confidence, AlignmentConfidence::Exact);
    }

    #[test]
    fn test_all_moras_consumed_exactly_once() {
        let tokens = vec![
            token("東京", "とうきょう", "名詞", 0),
            token("都", "と", "名詞", 1),
        ];
        // the engine respells トウキョウ as トーキョー; both count 4 moras
        let phrases = vec![phrase(&["ト", "ー", "キョ", "ー", "ト"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);

        let covered: usize = aligned.iter().map(|a| a.mora_range.len()).sum();
        assert_eq!(covered, 5);
        assert_eq!(aligned[0].mora_range.end, aligned[1].mora_range.start);
        assert_eq!(aligned[1].mora_range.end, 5);
    }

    #[test]
    fn test_long_vowel_respelling_is_exact() {
        let tokens = vec![token("東京", "とうきょう", "名詞", 0)];
        let phrases = vec![phrase(&["ト", "ー", "キョ", "ー"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);
        // トーキョー vs トウキョウ normalize to the same reading
        assert_eq!(aligned[0].confidence, AlignmentConfidence::Exact);
        assert_eq!(aligned[0].mora_range, 0..4);
    }

    #[test]
    fn test_punctuation_consumes_nothing() {
        let tokens = vec![token("礼", "れい", "名詞", 0), token("。", "", "記号", 1)];
        let phrases = vec![phrase(&["レ", "イ"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);
        assert_eq!(aligned[0].mora_range, 0..2);
        assert_eq!(aligned[1].mora_range, 2..2);
        assert_eq!(aligned[1].confidence, AlignmentConfidence::Exact);
    }

    #[test]
    fn test_same_size_dissent_stays_comparable() {
        let tokens = vec![token("方", "ほう", "名詞", 0)];
        let phrases = vec![phrase(&["カ", "タ"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);
        // completely different reading, but a two-mora span for a two-mora
        // expectation is still plausibly the right slice
        assert_eq!(aligned[0].engine_reading, "カタ");
        assert_eq!(aligned[0].confidence, AlignmentConfidence::Fuzzy);
        assert!(aligned[0].confidence.comparable());
    }

    #[test]
    fn test_readingless_token_with_moras_is_low() {
        let mut t = token("魑魅", "", "名詞", 0);
        t.unknown = true;
        let phrases = vec![phrase(&["チ", "ミ"])];
        let aligned = align_tokens(&[t], &phrases, 0.5);
        assert_eq!(aligned[0].mora_range, 0..2);
        assert_eq!(aligned[0].confidence, AlignmentConfidence::Low);
        assert!(!aligned[0].confidence.comparable());
    }

    #[test]
    fn test_exhausted_sequence_leaves_trailing_tokens_empty() {
        let tokens = vec![
            token("学校", "がっこう", "名詞", 0),
            token("へ", "へ", "助詞", 1),
            token("行く", "いく", "動詞", 2),
        ];
        // engine produced moras only for the first token
        let phrases = vec![phrase(&["ガ", "ッ", "コ", "ウ"])];
        let aligned = align_tokens(&tokens, &phrases, 0.5);
        assert_eq!(aligned[0].mora_range, 0..4);
        assert_eq!(aligned[1].mora_range, 4..4);
        assert_eq!(aligned[2].mora_range, 4..4);
        // へ expected one mora and got none
        assert_eq!(aligned[1].confidence, AlignmentConfidence::Low);
        assert_eq!(aligned[2].confidence, AlignmentConfidence::Low);
    }

    #[test]
    fn test_empty_block() {
        let aligned = align_tokens(&[], &[], 0.5);
        assert!(aligned.is_empty());
    }

    #[test]
    fn test_pause_mora_not_flattened() {
        let tokens = vec![token("礼", "れい", "名詞", 0)];
        let mut p = phrase(&["レ", "イ"]);
        p.pause_mora = Some(mora("ウ"));
        let aligned = align_tokens(&tokens, &[p], 0.5);
        assert_eq!(aligned[0].mora_range, 0..2);
        assert_eq!(aligned[0].engine_reading, "レイ");
    }
}
