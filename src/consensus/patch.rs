//! Mora patching inside the engine's phrase structure
//!
//! Applies confirmed corrections to a copy of the engine's accent phrases
//! right before rendering. Two paths exist per patch: `correct_moras`
//! splices fully constructed moras verbatim (the exact path), and
//! `correct_kana` overwrites mora text character-by-character assuming one
//! mora per kana segment (the approximate fallback; callers get exactly
//! that accuracy and no more). Everything not targeted by a patch must
//! come out identical to the input, and a patch that cannot be applied
//! safely is skipped and reported, never guessed at.

use std::ops::Range;

use tracing::{debug, warn};

use crate::kana::{kana_phonemes, split_moras};
use crate::types::{AccentPhrase, KanaPatch, Mora, Score};

/// Consonant length given to a mora that gains a consonant it never had.
const DEFAULT_CONSONANT_LENGTH: f32 = 0.05;

/// A patch that was not applied, with the reason.
#[derive(Debug, Clone)]
pub struct SkippedPatch {
    pub patch: KanaPatch,
    pub reason: String,
}

/// Result of applying a patch set.
#[derive(Debug, Clone)]
pub struct PatchApplication {
    pub phrases: Vec<AccentPhrase>,
    pub applied: usize,
    pub skipped: Vec<SkippedPatch>,
}

/// Apply `patches` to a copy of `phrases`.
///
/// Patches are deduplicated by `(line_id, token_index)` keeping the
/// highest confidence, then applied in descending range order so resizing
/// splices never shift a pending patch's indices. Ranges index the block's
/// flattened mora sequence as it was when the patches were built.
pub fn apply_patches(phrases: &[AccentPhrase], patches: &[KanaPatch]) -> PatchApplication {
    let mut result = phrases.to_vec();
    let original_total: usize = result.iter().map(|p| p.moras.len()).sum();

    // Dedup: one patch per token, highest confidence wins.
    let mut chosen: Vec<&KanaPatch> = Vec::new();
    for patch in patches {
        match chosen
            .iter_mut()
            .find(|p| p.line_id == patch.line_id && p.token_index == patch.token_index)
        {
            Some(slot) => {
                if patch.confidence > slot.confidence {
                    *slot = patch;
                }
            }
            None => chosen.push(patch),
        }
    }
    chosen.sort_by(|a, b| b.mora_range.start.cmp(&a.mora_range.start));

    let mut applied = 0usize;
    let mut skipped = Vec::new();
    // lowest start among applied patches; anything reaching past it would
    // touch moras a previous splice may have moved
    let mut applied_floor = usize::MAX;

    for patch in chosen {
        let range = patch.mora_range.clone();
        if range.start > range.end || range.end > original_total {
            skip(&mut skipped, patch, format!(
                "mora range {}..{} out of bounds for {original_total} moras",
                range.start, range.end
            ));
            continue;
        }
        if range.end > applied_floor {
            skip(&mut skipped, patch, "overlaps an already applied patch".to_string());
            continue;
        }

        let outcome = match &patch.correct_moras {
            Some(new_moras) => apply_splice(&mut result, &range, new_moras),
            None => {
                apply_fallback(&mut result, patch);
                Ok(())
            }
        };
        match outcome {
            Ok(()) => {
                applied += 1;
                applied_floor = applied_floor.min(range.start);
                debug!(
                    block_id = %patch.block_id,
                    line_id = patch.line_id,
                    token_index = patch.token_index,
                    kana = %patch.correct_kana,
                    "patch applied"
                );
            }
            Err(reason) => skip(&mut skipped, patch, reason),
        }
    }

    PatchApplication { phrases: result, applied, skipped }
}

fn skip(skipped: &mut Vec<SkippedPatch>, patch: &KanaPatch, reason: String) {
    warn!(
        block_id = %patch.block_id,
        line_id = patch.line_id,
        token_index = patch.token_index,
        reason = %reason,
        "skipping patch"
    );
    skipped.push(SkippedPatch { patch: patch.clone(), reason });
}

/// Exact path: replace the range with `new_moras` verbatim.
fn apply_splice(
    phrases: &mut Vec<AccentPhrase>,
    range: &Range<usize>,
    new_moras: &[Mora],
) -> Result<(), String> {
    // Re-running with the same patch set must not patch twice.
    if range_equals(phrases, range.start, new_moras) {
        return Ok(());
    }
    if range.is_empty() {
        return Err("insertion into an empty mora range is not supported".to_string());
    }

    let positions = locate_range(phrases, range)
        .ok_or_else(|| "range does not map onto the mora sequence".to_string())?;

    if new_moras.len() == range.len() {
        // Length-preserving replacement works even across accent phrase
        // boundaries.
        for (&(pi, mi), new) in positions.iter().zip(new_moras) {
            phrases[pi].moras[mi] = new.clone();
        }
        return Ok(());
    }

    let (Some(&(first_phrase, first_mora)), Some(&(last_phrase, last_mora))) =
        (positions.first(), positions.last())
    else {
        return Err("range does not map onto the mora sequence".to_string());
    };
    if first_phrase != last_phrase {
        return Err("resizing patch crosses an accent phrase boundary".to_string());
    }
    phrases[first_phrase]
        .moras
        .splice(first_mora..last_mora + 1, new_moras.iter().cloned());
    Ok(())
}

/// Approximate path: overwrite mora text (and phonemes where the kana maps
/// cleanly) one segment at a time, never resizing and never writing past
/// the range.
fn apply_fallback(phrases: &mut [AccentPhrase], patch: &KanaPatch) {
    let texts = split_moras(&patch.correct_kana);
    let range = &patch.mora_range;
    for (i, text) in texts.iter().enumerate() {
        let index = range.start + i;
        if index >= range.end {
            break;
        }
        let Some((pi, mi)) = locate(phrases, index) else { break };
        let mora = &mut phrases[pi].moras[mi];
        mora.text = text.clone();
        if let Some((consonant, vowel)) = kana_phonemes(text) {
            mora.vowel = vowel.to_string();
            match consonant {
                Some(c) => {
                    mora.consonant = Some(c.to_string());
                    if mora.consonant_length.is_none() {
                        mora.consonant_length = Some(DEFAULT_CONSONANT_LENGTH);
                    }
                }
                None => {
                    mora.consonant = None;
                    mora.consonant_length = None;
                }
            }
        }
    }
}

fn locate(phrases: &[AccentPhrase], flat_index: usize) -> Option<(usize, usize)> {
    let mut remaining = flat_index;
    for (pi, phrase) in phrases.iter().enumerate() {
        if remaining < phrase.moras.len() {
            return Some((pi, remaining));
        }
        remaining -= phrase.moras.len();
    }
    None
}

fn locate_range(phrases: &[AccentPhrase], range: &Range<usize>) -> Option<Vec<(usize, usize)>> {
    range.clone().map(|i| locate(phrases, i)).collect()
}

fn range_equals(phrases: &[AccentPhrase], start: usize, moras: &[Mora]) -> bool {
    !moras.is_empty()
        && moras.iter().enumerate().all(|(i, new)| {
            locate(phrases, start + i)
                .map(|(pi, mi)| phrases[pi].moras[mi] == *new)
                .unwrap_or(false)
        })
}

// ============================================================================
// Patch construction
// ============================================================================

/// Build a patch for one token from its corrected katakana reading.
///
/// When every segment of the reading maps to known phonemes, full
/// replacement moras are constructed, borrowing pitch and length from the
/// moras being replaced (element-wise, extending with the last). A reading
/// with any unmappable segment degrades to a kana-only fallback patch.
pub fn build_patch(
    block_id: &str,
    line_id: u32,
    token_index: usize,
    mora_range: Range<usize>,
    correct_kana: &str,
    replaced: &[Mora],
    confidence: Score,
) -> KanaPatch {
    let correct_moras = construct_moras(correct_kana, replaced);
    if correct_moras.is_none() {
        debug!(
            block_id,
            line_id, token_index,
            kana = correct_kana,
            "no full mora construction, using kana fallback"
        );
    }
    KanaPatch {
        block_id: block_id.to_string(),
        line_id,
        token_index,
        mora_range,
        correct_kana: correct_kana.to_string(),
        correct_moras,
        confidence,
    }
}

fn construct_moras(kana: &str, template: &[Mora]) -> Option<Vec<Mora>> {
    if template.is_empty() {
        return None;
    }
    let texts = split_moras(kana);
    if texts.is_empty() {
        return None;
    }

    let mut built: Vec<Mora> = Vec::with_capacity(texts.len());
    for (i, text) in texts.iter().enumerate() {
        let base = &template[i.min(template.len() - 1)];
        let (consonant, vowel) = match kana_phonemes(text) {
            Some((c, v)) => (c.map(String::from), v.to_string()),
            None if text == "ー" => {
                // the long-vowel mark extends whatever came before it
                let prev_vowel = built.last().map(|m| m.vowel.clone())?;
                (None, prev_vowel)
            }
            None => return None,
        };
        let consonant_length = if consonant.is_some() {
            base.consonant_length.or(Some(DEFAULT_CONSONANT_LENGTH))
        } else {
            None
        };
        built.push(Mora {
            text: text.clone(),
            consonant,
            consonant_length,
            vowel,
            vowel_length: base.vowel_length,
            pitch: base.pitch,
        });
    }
    Some(built)
}

// ============================================================================
// Tests
// ============================================================================
