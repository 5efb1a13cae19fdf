//! Token risk scoring
//!
//! Selects which tokens deserve a cross-source reading audit. Candidates
//! are tokens whose surface contains ideographs or Latin/digit characters;
//! each risk factor stacks onto a small base score, and membership in the
//! hazard dictionary pushes the score to near certainty regardless of the
//! other factors. The function-word exclusion (particles, auxiliaries,
//! symbols) narrows the ideograph side only: Latin/digit content always
//! qualifies, and a hazard listing overrides every exclusion.

use crate::hazard::HazardDictionary;
use crate::kana;
use crate::types::{Line, RiskySpan, Score, Token};

/// Floor for any candidate, before risk factors.
const BASE_RISK: f32 = 0.05;
/// Token has multiple dictionary readings.
const AMBIGUITY_RISK: f32 = 0.45;
/// Tokenizer fell back to an out-of-vocabulary guess.
const UNKNOWN_RISK: f32 = 0.35;
/// Surface contains Latin letters or digits.
const FOREIGN_RISK: f32 = 0.25;
/// Minimum score for hazard-listed terms.
const HAZARD_FLOOR: f32 = 0.9;

pub struct RiskScorer<'a> {
    hazards: &'a HazardDictionary,
}

impl<'a> RiskScorer<'a> {
    pub fn new(hazards: &'a HazardDictionary) -> Self {
        RiskScorer { hazards }
    }

    /// Score every candidate token of a line.
    pub fn score_line(&self, line: &Line) -> Vec<RiskySpan> {
        line.tokens.iter().filter_map(|token| self.score_token(token)).collect()
    }

    /// Score one token, or `None` when it is not a candidate.
    pub fn score_token(&self, token: &Token) -> Option<RiskySpan> {
        let hazard = self.hazards.lookup(&token.surface);
        let has_ideograph = kana::has_ideograph(&token.surface);
        let has_foreign = kana::has_latin_or_digit(&token.surface);

        if hazard.is_none() {
            if !has_ideograph && !has_foreign {
                return None;
            }
            // ipadic tags a standalone letter 記号; tokens with Latin or
            // digit content stay candidates whatever the POS says.
            if token.is_function_word() && !has_foreign {
                return None;
            }
        }

        let mut score = BASE_RISK;
        let mut reasons: Vec<&str> = Vec::new();
        if has_ideograph {
            reasons.push("contains ideographs");
        }
        if token.is_ambiguous() {
            score += AMBIGUITY_RISK;
            reasons.push("multiple dictionary readings");
        }
        if token.unknown {
            score += UNKNOWN_RISK;
            reasons.push("out-of-vocabulary");
        }
        if has_foreign {
            score += FOREIGN_RISK;
            reasons.push("latin or digit content");
        }

        let mut corrected_reading = None;
        if let Some(entry) = hazard {
            score = score.max(HAZARD_FLOOR).max(entry.confidence.value());
            reasons.push("known hazard term");
            corrected_reading = Some(entry.corrected_reading.clone());
        }

        Some(RiskySpan {
            line_id: token.line_id,
            token_index: token.token_index,
            surface: token.surface.clone(),
            risk_score: Score::new(score),
            reason: reasons.join(", "),
            corrected_reading,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::HazardEntry;
    use chrono::Utc;

    fn token(surface: &str, pos: &str) -> Token {
        Token {
            surface: surface.to_string(),
            reading_hiragana: "よみ".to_string(),
            reading_candidates: Vec::new(),
            token_index: 0,
            line_id: 1,
            char_range: 0..surface.chars().count(),
            part_of_speech: pos.to_string(),
            unknown: false,
        }
    }

    fn empty_dict() -> HazardDictionary {
        HazardDictionary::default()
    }

    #[test]
    fn test_plain_kanji_gets_floor_score() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        let span = scorer.score_token(&token("山", "名詞")).unwrap();
        assert_eq!(span.risk_score.value(), BASE_RISK);
        assert_eq!(span.reason, "contains ideographs");
    }

    #[test]
    fn test_kana_only_token_is_not_a_candidate() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        assert!(scorer.score_token(&token("ここ", "名詞")).is_none());
    }

    #[test]
    fn test_ambiguity_raises_risk() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        let mut t = token("方", "名詞");
        t.reading_candidates = vec!["かた".to_string(), "がた".to_string()];
        let span = scorer.score_token(&t).unwrap();
        assert!((span.risk_score.value() - (BASE_RISK + AMBIGUITY_RISK)).abs() < 1e-6);
        assert!(span.reason.contains("multiple dictionary readings"));
    }

    #[test]
    fn test_unknown_and_foreign_stack() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        let mut t = token("GPU板", "名詞");
        t.unknown = true;
        let span = scorer.score_token(&t).unwrap();
        let expected = BASE_RISK + UNKNOWN_RISK + FOREIGN_RISK;
        assert!((span.risk_score.value() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_all_factors_clamp_at_one() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        let mut t = token("A型々", "名詞");
        t.unknown = true;
        t.reading_candidates = vec!["えーがた".to_string()];
        let span = scorer.score_token(&t).unwrap();
        assert!(span.risk_score.value() <= 1.0);
    }

    #[test]
    fn test_function_word_excluded() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        assert!(scorer.score_token(&token("的", "助動詞")).is_none());
        assert!(scorer.score_token(&token("。", "記号")).is_none());
    }

    #[test]
    fn test_symbol_tagged_latin_is_still_a_candidate() {
        // ipadic tags a standalone letter 記号,アルファベット
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);

        let span = scorer.score_token(&token("A", "記号")).unwrap();
        assert!((span.risk_score.value() - (BASE_RISK + FOREIGN_RISK)).abs() < 1e-6);
        assert_eq!(span.reason, "latin or digit content");

        // full-width letters get the same treatment
        assert!(scorer.score_token(&token("Ｘ", "記号")).is_some());
    }

    #[test]
    fn test_latin_or_digit_tokens_are_candidates_under_any_pos() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        for pos in ["名詞", "動詞", "形容詞", "副詞", "感動詞", "助詞", "助動詞", "記号"] {
            for surface in ["A", "GPU", "x86", "3日", "Ｘ", "１２３"] {
                assert!(
                    scorer.score_token(&token(surface, pos)).is_some(),
                    "{surface} tagged {pos} must stay in the candidate set"
                );
            }
        }
    }

    #[test]
    fn test_hazard_overrides_exclusion_and_floors_score() {
        let mut dict = empty_dict();
        dict.terms.insert(
            "方".to_string(),
            HazardEntry {
                corrected_reading: "ガタ".to_string(),
                confidence: Score::new(0.95),
                notes: None,
                last_seen: Utc::now(),
            },
        );
        let scorer = RiskScorer::new(&dict);

        let span = scorer.score_token(&token("方", "助詞")).unwrap();
        assert_eq!(span.risk_score.value(), 0.95);
        assert_eq!(span.corrected_reading.as_deref(), Some("ガタ"));
        assert!(span.reason.contains("known hazard term"));
    }

    #[test]
    fn test_hazard_floor_applies_when_confidence_is_low() {
        let mut dict = empty_dict();
        dict.terms.insert(
            "礼".to_string(),
            HazardEntry {
                corrected_reading: "レイ".to_string(),
                confidence: Score::new(0.6),
                notes: None,
                last_seen: Utc::now(),
            },
        );
        let scorer = RiskScorer::new(&dict);
        let span = scorer.score_token(&token("礼", "名詞")).unwrap();
        assert_eq!(span.risk_score.value(), HAZARD_FLOOR);
    }

    #[test]
    fn test_score_line_filters_candidates() {
        let dict = empty_dict();
        let scorer = RiskScorer::new(&dict);
        let line = Line {
            line_id: 1,
            text: "彼の方".to_string(),
            tokens: vec![
                {
                    let mut t = token("彼", "名詞");
                    t.token_index = 0;
                    t
                },
                {
                    let mut t = token("の", "助詞");
                    t.token_index = 1;
                    t
                },
                {
                    let mut t = token("方", "名詞");
                    t.token_index = 2;
                    t
                },
            ],
        };
        let spans = scorer.score_line(&line);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].token_index, 0);
        assert_eq!(spans[1].token_index, 2);
    }
}
