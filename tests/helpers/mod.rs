//! Shared fixture builders for integration tests

#![allow(dead_code)]

use yomikae::kana::kana_phonemes;
use yomikae::types::{AccentPhrase, AudioQuery, Line, Mora, Token};

/// A token as the tokenizer adapter would emit it.
pub fn token(line_id: u32, index: usize, surface: &str, reading_hira: &str, pos: &str) -> Token {
    Token {
        surface: surface.to_string(),
        reading_hiragana: reading_hira.to_string(),
        reading_candidates: Vec::new(),
        token_index: index,
        line_id,
        char_range: 0..surface.chars().count(),
        part_of_speech: pos.to_string(),
        unknown: false,
    }
}

pub fn line(line_id: u32, text: &str, tokens: Vec<Token>) -> Line {
    Line { line_id, text: text.to_string(), tokens }
}

/// A mora with phonemes from the kana table and a caller-chosen pitch, so
/// tests can check that patching carries acoustics over.
pub fn mora_at(text: &str, pitch: f32) -> Mora {
    let (consonant, vowel) = kana_phonemes(text)
        .map(|(c, v)| (c.map(String::from), v.to_string()))
        .unwrap_or((None, "a".to_string()));
    Mora {
        text: text.to_string(),
        consonant_length: consonant.as_ref().map(|_| 0.05),
        consonant,
        vowel,
        vowel_length: 0.1,
        pitch,
    }
}

/// Accent phrase whose moras carry pitch 5.0, 5.1, ... in order.
pub fn phrase(texts: &[&str]) -> AccentPhrase {
    AccentPhrase {
        moras: texts
            .iter()
            .enumerate()
            .map(|(i, t)| mora_at(t, 5.0 + i as f32 * 0.1))
            .collect(),
        accent: 1,
        pause_mora: None,
        is_interrogative: None,
    }
}

/// An engine audio query with representative extra fields, so tests can
/// check those fields round-trip untouched.
pub fn query(phrase_texts: &[&[&str]]) -> AudioQuery {
    let mut extra = serde_json::Map::new();
    extra.insert("speedScale".to_string(), serde_json::json!(1.0));
    extra.insert("outputSamplingRate".to_string(), serde_json::json!(24000));
    AudioQuery {
        accent_phrases: phrase_texts.iter().map(|texts| phrase(texts)).collect(),
        extra,
    }
}
