//! Script classification and mora-level kana utilities
//!
//! The consensus stages compare readings coming from three sources that use
//! different conventions (hiragana from the tokenizer, free-form kana from
//! the annotator, katakana mora text from the synthesis engine). Everything
//! here is pure and deterministic: character classification for candidate
//! scoping, hiragana/katakana folding, mora segmentation, long-vowel
//! normalization, and the kana-to-phoneme table used when constructing
//! replacement moras.

// ============================================================================
// Character classification
// ============================================================================

/// True for ideographic characters (CJK unified ideographs plus the
/// iteration mark 々 and the ideographic zero 〇).
pub fn is_ideograph(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'      // CJK Unified Ideographs
        | '\u{3400}'..='\u{4DBF}'    // Extension A
        | '\u{F900}'..='\u{FAFF}'    // Compatibility Ideographs
        | '\u{20000}'..='\u{2FA1F}'  // Extensions B..F
        | '\u{3005}'                 // 々
        | '\u{3007}'                 // 〇
    )
}

/// True for hiragana (ぁ..ゖ plus iteration marks).
pub fn is_hiragana(c: char) -> bool {
    matches!(c, '\u{3041}'..='\u{3096}' | '\u{309D}' | '\u{309E}')
}

/// True for katakana (ァ..ヶ plus iteration marks), excluding the
/// prolonged-sound mark ー which is script-neutral.
pub fn is_katakana(c: char) -> bool {
    matches!(c, '\u{30A1}'..='\u{30F6}' | '\u{30FD}' | '\u{30FE}')
}

/// True for any kana, including the prolonged-sound mark ー.
pub fn is_kana(c: char) -> bool {
    is_hiragana(c) || is_katakana(c) || c == '\u{30FC}'
}

/// True for Latin letters and decimal digits, half- or full-width.
pub fn is_latin_or_digit(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c,
            '\u{FF10}'..='\u{FF19}'  // ０..９
            | '\u{FF21}'..='\u{FF3A}' // Ａ..Ｚ
            | '\u{FF41}'..='\u{FF5A}' // ａ..ｚ
        )
}

/// True if the string contains at least one ideographic character.
pub fn has_ideograph(s: &str) -> bool {
    s.chars().any(is_ideograph)
}

/// True if the string contains at least one Latin letter or digit.
pub fn has_latin_or_digit(s: &str) -> bool {
    s.chars().any(is_latin_or_digit)
}

// ============================================================================
// Script folding
// ============================================================================

/// Convert hiragana characters to katakana, leaving everything else as-is.
pub fn hira_to_kata(s: &str) -> String {
    s.chars()
        .map(|c| {
            if matches!(c, '\u{3041}'..='\u{3096}' | '\u{309D}' | '\u{309E}') {
                char::from_u32(c as u32 + 0x60).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// Convert katakana characters to hiragana, leaving everything else as-is.
///
/// The prolonged-sound mark ー has no hiragana counterpart and is kept.
pub fn kata_to_hira(s: &str) -> String {
    s.chars()
        .map(|c| {
            if matches!(c, '\u{30A1}'..='\u{30F6}' | '\u{30FD}' | '\u{30FE}') {
                char::from_u32(c as u32 - 0x60).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

// ============================================================================
// Mora segmentation
// ============================================================================

/// Small kana that glue onto the preceding character to form one mora
/// (palatalized/contracted sounds like キャ or ティ).
fn is_combining_small(c: char) -> bool {
    matches!(
        c,
        'ゃ' | 'ゅ' | 'ょ' | 'ぁ' | 'ぃ' | 'ぅ' | 'ぇ' | 'ぉ' | 'ゎ'
            | 'ャ' | 'ュ' | 'ョ' | 'ァ' | 'ィ' | 'ゥ' | 'ェ' | 'ォ' | 'ヮ'
    )
}

/// Segment a kana string into moras.
///
/// A yōon small kana joins the preceding character; the sokuon っ/ッ, the
/// moraic nasal ん/ン and the prolonged-sound mark ー each count as their own
/// mora. Non-kana characters pass through as single-character segments.
pub fn split_moras(kana: &str) -> Vec<String> {
    let mut moras: Vec<String> = Vec::new();
    for c in kana.chars() {
        if is_combining_small(c) {
            if let Some(last) = moras.last_mut() {
                last.push(c);
                continue;
            }
        }
        moras.push(c.to_string());
    }
    moras
}

/// Number of moras in a kana string.
pub fn mora_count(kana: &str) -> usize {
    split_moras(kana).len()
}

// ============================================================================
// Kana-to-phoneme table
// ============================================================================

/// Phoneme decomposition of one mora: optional consonant plus vowel, using
/// the synthesis engine's phoneme names (the moraic nasal is `N`, the sokuon
/// is `cl`).
///
/// Returns `None` for mora text outside the table, notably the
/// prolonged-sound mark ー, whose vowel depends on the preceding mora.
pub fn kana_phonemes(mora: &str) -> Option<(Option<&'static str>, &'static str)> {
    let kata = hira_to_kata(mora);
    let (consonant, vowel) = match kata.as_str() {
        "ア" => (None, "a"),
        "イ" => (None, "i"),
        "ウ" => (None, "u"),
        "エ" => (None, "e"),
        "オ" => (None, "o"),
        "カ" => (Some("k"), "a"),
        "キ" => (Some("k"), "i"),
        "ク" => (Some("k"), "u"),
        "ケ" => (Some("k"), "e"),
        "コ" => (Some("k"), "o"),
        "ガ" => (Some("g"), "a"),
        "ギ" => (Some("g"), "i"),
        "グ" => (Some("g"), "u"),
        "ゲ" => (Some("g"), "e"),
        "ゴ" => (Some("g"), "o"),
        "サ" => (Some("s"), "a"),
        "シ" => (Some("sh"), "i"),
        "ス" => (Some("s"), "u"),
        "セ" => (Some("s"), "e"),
        "ソ" => (Some("s"), "o"),
        "ザ" => (Some("z"), "a"),
        "ジ" => (Some("j"), "i"),
        "ズ" => (Some("z"), "u"),
        "ゼ" => (Some("z"), "e"),
        "ゾ" => (Some("z"), "o"),
        "タ" => (Some("t"), "a"),
        "チ" => (Some("ch"), "i"),
        "ツ" => (Some("ts"), "u"),
        "テ" => (Some("t"), "e"),
        "ト" => (Some("t"), "o"),
        "ダ" => (Some("d"), "a"),
        "ヂ" => (Some("j"), "i"),
        "ヅ" => (Some("z"), "u"),
        "デ" => (Some("d"), "e"),
        "ド" => (Some("d"), "o"),
        "ナ" => (Some("n"), "a"),
        "ニ" => (Some("n"), "i"),
        "ヌ" => (Some("n"), "u"),
        "ネ" => (Some("n"), "e"),
        "ノ" => (Some("n"), "o"),
        "ハ" => (Some("h"), "a"),
        "ヒ" => (Some("h"), "i"),
        "フ" => (Some("f"), "u"),
        "ヘ" => (Some("h"), "e"),
        "ホ" => (Some("h"), "o"),
        "バ" => (Some("b"), "a"),
        "ビ" => (Some("b"), "i"),
        "ブ" => (Some("b"), "u"),
        "ベ" => (Some("b"), "e"),
        "ボ" => (Some("b"), "o"),
        "パ" => (Some("p"), "a"),
        "ピ" => (Some("p"), "i"),
        "プ" => (Some("p"), "u"),
        "ペ" => (Some("p"), "e"),
        "ポ" => (Some("p"), "o"),
        "マ" => (Some("m"), "a"),
        "ミ" => (Some("m"), "i"),
        "ム" => (Some("m"), "u"),
        "メ" => (Some("m"), "e"),
        "モ" => (Some("m"), "o"),
        "ヤ" => (Some("y"), "a"),
        "ユ" => (Some("y"), "u"),
        "ヨ" => (Some("y"), "o"),
        "ラ" => (Some("r"), "a"),
        "リ" => (Some("r"), "i"),
        "ル" => (Some("r"), "u"),
        "レ" => (Some("r"), "e"),
        "ロ" => (Some("r"), "o"),
        "ワ" => (Some("w"), "a"),
        "ヲ" => (None, "o"),
        "ン" => (None, "N"),
        "ッ" => (None, "cl"),
        "ヴ" => (Some("v"), "u"),
        "ヵ" => (Some("k"), "a"),
        "ヶ" => (Some("k"), "e"),
        // Yōon
        "キャ" => (Some("ky"), "a"),
        "キュ" => (Some("ky"), "u"),
        "キョ" => (Some("ky"), "o"),
        "ギャ" => (Some("gy"), "a"),
        "ギュ" => (Some("gy"), "u"),
        "ギョ" => (Some("gy"), "o"),
        "シャ" => (Some("sh"), "a"),
        "シュ" => (Some("sh"), "u"),
        "シェ" => (Some("sh"), "e"),
        "ショ" => (Some("sh"), "o"),
        "ジャ" => (Some("j"), "a"),
        "ジュ" => (Some("j"), "u"),
        "ジェ" => (Some("j"), "e"),
        "ジョ" => (Some("j"), "o"),
        "チャ" => (Some("ch"), "a"),
        "チュ" => (Some("ch"), "u"),
        "チェ" => (Some("ch"), "e"),
        "チョ" => (Some("ch"), "o"),
        "ヂャ" => (Some("j"), "a"),
        "ヂュ" => (Some("j"), "u"),
        "ヂョ" => (Some("j"), "o"),
        "ニャ" => (Some("ny"), "a"),
        "ニュ" => (Some("ny"), "u"),
        "ニェ" => (Some("ny"), "e"),
        "ニョ" => (Some("ny"), "o"),
        "ヒャ" => (Some("hy"), "a"),
        "ヒュ" => (Some("hy"), "u"),
        "ヒェ" => (Some("hy"), "e"),
        "ヒョ" => (Some("hy"), "o"),
        "ビャ" => (Some("by"), "a"),
        "ビュ" => (Some("by"), "u"),
        "ビョ" => (Some("by"), "o"),
        "ピャ" => (Some("py"), "a"),
        "ピュ" => (Some("py"), "u"),
        "ピョ" => (Some("py"), "o"),
        "ミャ" => (Some("my"), "a"),
        "ミュ" => (Some("my"), "u"),
        "ミョ" => (Some("my"), "o"),
        "リャ" => (Some("ry"), "a"),
        "リュ" => (Some("ry"), "u"),
        "リョ" => (Some("ry"), "o"),
        // Foreign-sound combinations
        "ファ" => (Some("f"), "a"),
        "フィ" => (Some("f"), "i"),
        "フェ" => (Some("f"), "e"),
        "フォ" => (Some("f"), "o"),
        "ウィ" => (Some("w"), "i"),
        "ウェ" => (Some("w"), "e"),
        "ウォ" => (Some("w"), "o"),
        "ヴァ" => (Some("v"), "a"),
        "ヴィ" => (Some("v"), "i"),
        "ヴェ" => (Some("v"), "e"),
        "ヴォ" => (Some("v"), "o"),
        "ツァ" => (Some("ts"), "a"),
        "ツィ" => (Some("ts"), "i"),
        "ツェ" => (Some("ts"), "e"),
        "ツォ" => (Some("ts"), "o"),
        "ティ" => (Some("t"), "i"),
        "トゥ" => (Some("t"), "u"),
        "テュ" => (Some("ty"), "u"),
        "ディ" => (Some("d"), "i"),
        "ドゥ" => (Some("d"), "u"),
        "デュ" => (Some("dy"), "u"),
        "イェ" => (Some("y"), "e"),
        "スィ" => (Some("s"), "i"),
        "ズィ" => (Some("z"), "i"),
        _ => return None,
    };
    Some((consonant, vowel))
}

/// Vowel of a mora, if the table knows it.
fn vowel_of(mora: &str) -> Option<&'static str> {
    kana_phonemes(mora).map(|(_, v)| v)
}

// ============================================================================
// Comparison normalization
// ============================================================================

/// Fold long-vowel spellings to the prolonged-sound mark.
///
/// After folding, トウキョウ, トーキョー and トオキョオ all read
/// トーキョー: a vowel kana that merely extends the preceding mora's vowel
/// (ウ after an o-vowel, イ after an e-vowel, or a repeated identical vowel)
/// becomes ー. Input is expected in katakana.
pub fn fold_long_vowels(katakana: &str) -> String {
    let mut out = String::new();
    let mut prev_vowel: Option<&'static str> = None;
    for mora in split_moras(katakana) {
        if mora == "ー" {
            out.push('ー');
            continue; // prev_vowel carries over
        }
        let vowel = vowel_of(&mora);
        let extends_prev = match (prev_vowel, vowel) {
            (Some(prev), Some(v)) => {
                let plain_vowel = matches!(mora.as_str(), "ア" | "イ" | "ウ" | "エ" | "オ");
                plain_vowel && (v == prev || (mora == "ウ" && prev == "o") || (mora == "イ" && prev == "e"))
            }
            _ => false,
        };
        if extends_prev {
            // the nucleus vowel carries over unchanged
            out.push('ー');
        } else {
            out.push_str(&mora);
            prev_vowel = vowel;
        }
    }
    out
}

/// Normalize a reading for cross-source comparison: katakana folding plus
/// long-vowel normalization. An empty or whitespace-only input stays empty.
pub fn normalize_reading(s: &str) -> String {
    fold_long_vowels(&hira_to_kata(s.trim()))
}

/// Apply configured benign-variant classes on top of [`normalize_reading`].
///
/// Each class lists interchangeable spellings; every member is rewritten to
/// the first (canonical) entry before comparison. Classes whose members are
/// substrings of longer members are applied as given, so callers should list
/// longer spellings first inside a class.
pub fn canonicalize_variants(reading: &str, classes: &[Vec<String>]) -> String {
    let mut out = reading.to_string();
    for class in classes {
        let Some(canonical) = class.first() else {
            continue;
        };
        for variant in &class[1..] {
            if !variant.is_empty() {
                out = out.replace(variant.as_str(), canonical);
            }
        }
    }
    out
}

/// Kana characters of a string only (used for length heuristics where
/// punctuation and ideographs contribute no moras).
pub fn kana_chars(s: &str) -> String {
    s.chars().filter(|&c| is_kana(c)).collect()
}

// ============================================================================
// Tests
// ============================================================================
