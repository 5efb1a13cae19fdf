//! Three-way reading comparison
//!
//! For each audited token, three opinions may exist: the tokenizer's
//! dictionary reading, the annotator's contextual ruby and the engine's
//! aligned moras. The policy is deliberately conservative about the
//! engine-derived reading, which comes from a heuristic alignment and is a
//! known false-positive source for short tokens:
//!
//! - a hazard-dictionary reading wins outright, against any majority
//! - full agreement (after benign-variant normalization) is clean
//! - a single dissenting source without hazard backing is noise, logged
//!   but never auto-patched
//! - anything murkier goes to the [`Judger`] in one batched call, and to
//!   manual review if the judger declines

use tracing::debug;

use crate::consensus::align::TokenAlignment;
use crate::consensus::judge::{JudgeVerdict, JudgementRequest, Judger};
use crate::kana::{canonicalize_variants, hira_to_kata, normalize_reading};
use crate::types::{Decision, RiskySpan, Score, Token};

/// Risk attributed to a conflict no source could resolve.
const CONFLICT_RISK: f32 = 0.6;

/// Everything known about one audited token.
pub struct EvaluationInput<'a> {
    pub span: &'a RiskySpan,
    pub token: &'a Token,
    pub alignment: &'a TokenAlignment,
    /// Annotator ruby for this occurrence, raw kana.
    pub annotator_reading: Option<String>,
    /// The line the token appears in, for judger context.
    pub context: &'a str,
}

/// Outcome of one token comparison.
#[derive(Debug, Clone)]
pub struct TokenComparison {
    pub line_id: u32,
    pub token_index: usize,
    pub surface: String,
    /// Katakana as each source reported it (script-folded, not otherwise
    /// normalized, so the audit log shows real dissent).
    pub tokenizer_reading: String,
    pub annotator_reading: Option<String>,
    pub engine_reading: String,
    pub decision: Decision,
    pub risk_score: Score,
    /// Reading to apply, katakana, present only for `Decision::Patch`.
    pub patch_reading: Option<String>,
    pub patch_confidence: Score,
}

struct Draft {
    comparison: TokenComparison,
    /// Candidates pending adjudication: (patch form, normalized form),
    /// plus the normalized engine reading to recognize "engine was right".
    escalation: Option<Escalation>,
}

struct Escalation {
    candidates: Vec<(String, String)>,
    engine_norm: String,
}

/// Compare readings for every audited token of a block.
///
/// Conflicts that need adjudication are gathered into a single judger
/// call. Results come back in input order.
pub async fn evaluate(
    inputs: &[EvaluationInput<'_>],
    variant_classes: &[Vec<String>],
    judger: &dyn Judger,
) -> Vec<TokenComparison> {
    let mut drafts: Vec<Draft> =
        inputs.iter().map(|input| compare_one(input, variant_classes)).collect();

    let requests: Vec<JudgementRequest> = drafts
        .iter()
        .zip(inputs)
        .filter_map(|(draft, input)| {
            draft.escalation.as_ref().map(|esc| JudgementRequest {
                surface: input.token.surface.clone(),
                context: input.context.to_string(),
                candidates: esc.candidates.iter().map(|(patch, _)| patch.clone()).collect(),
            })
        })
        .collect();

    if !requests.is_empty() {
        debug!(conflicts = requests.len(), "escalating conflicts to judger");
        let verdicts = judger.judge(&requests).await;
        let mut verdicts = verdicts.into_iter();
        for draft in drafts.iter_mut() {
            let Some(esc) = draft.escalation.take() else { continue };
            let verdict = verdicts.next().unwrap_or(JudgeVerdict::Uncertain);
            settle(draft, esc, verdict);
        }
    }

    drafts.into_iter().map(|draft| draft.comparison).collect()
}

fn compare_one(input: &EvaluationInput<'_>, variant_classes: &[Vec<String>]) -> Draft {
    let cmp = |s: &str| canonicalize_variants(&normalize_reading(s), variant_classes);

    let token = input.token;
    let span = input.span;
    let alignment = input.alignment;

    let tokenizer_kata = hira_to_kata(token.reading_hiragana.trim());
    let annotator_kata = input
        .annotator_reading
        .as_deref()
        .map(|r| hira_to_kata(r.trim()))
        .filter(|r| !r.is_empty());

    let t_norm = cmp(&token.reading_hiragana);
    let e_norm = cmp(&alignment.engine_reading);
    let a_norm = annotator_kata.as_deref().map(cmp).filter(|s| !s.is_empty());

    let mut comparison = TokenComparison {
        line_id: span.line_id,
        token_index: span.token_index,
        surface: token.surface.clone(),
        tokenizer_reading: tokenizer_kata.clone(),
        annotator_reading: annotator_kata.clone(),
        engine_reading: alignment.engine_reading.clone(),
        decision: Decision::Unchecked,
        risk_score: span.risk_score,
        patch_reading: None,
        patch_confidence: Score::ZERO,
    };

    if !alignment.confidence.comparable() || e_norm.is_empty() {
        // A patch needs a trustworthy mora range. A hazard term stuck
        // behind a bad alignment is a conflict a human must hear.
        if span.corrected_reading.is_some() {
            comparison.decision = Decision::Review;
            comparison.risk_score = span.risk_score.max(Score::new(CONFLICT_RISK));
        }
        return Draft { comparison, escalation: None };
    }

    // Hazard readings outrank everything, including a full majority.
    if let Some(hazard_reading) = &span.corrected_reading {
        let hazard_kata = hira_to_kata(hazard_reading.trim());
        if cmp(hazard_reading) == e_norm {
            comparison.decision = Decision::Agree;
        } else {
            comparison.decision = Decision::Patch;
            comparison.patch_reading = Some(hazard_kata);
            comparison.patch_confidence = span.risk_score;
        }
        return Draft { comparison, escalation: None };
    }

    let t_present = !t_norm.is_empty();
    let a_present = a_norm.is_some();

    let decision = match (t_present, &a_norm) {
        (true, Some(a)) => {
            let te = t_norm == e_norm;
            let ta = t_norm == *a;
            let ae = *a == e_norm;
            if te && ae {
                Some(Decision::Agree)
            } else if te || ta || ae {
                // exactly one source stands apart
                Some(Decision::Noise)
            } else {
                None // three-way scatter
            }
        }
        (true, None) => (t_norm == e_norm).then_some(Decision::Agree),
        (false, Some(a)) => (*a == e_norm).then_some(Decision::Agree),
        (false, None) => Some(Decision::Unchecked),
    };

    if let Some(decision) = decision {
        comparison.decision = decision;
        return Draft { comparison, escalation: None };
    }

    // Candidates in trust order: annotator, tokenizer, engine. Dedup by
    // normalized form keeps distinct opinions only.
    let mut candidates: Vec<(String, String)> = Vec::new();
    let mut push = |patch_form: String, norm: String| {
        if !norm.is_empty() && !candidates.iter().any(|(_, n)| *n == norm) {
            candidates.push((patch_form, norm));
        }
    };
    if let (Some(kata), Some(norm)) = (annotator_kata, a_norm) {
        push(kata, norm);
    }
    if t_present {
        push(tokenizer_kata, t_norm);
    }
    push(alignment.engine_reading.clone(), e_norm.clone());

    comparison.decision = Decision::Review;
    comparison.risk_score = span.risk_score.max(Score::new(CONFLICT_RISK));
    Draft { comparison, escalation: Some(Escalation { candidates, engine_norm: e_norm }) }
}

fn settle(draft: &mut Draft, esc: Escalation, verdict: JudgeVerdict) {
    match verdict {
        JudgeVerdict::Choose { index, confidence } => {
            match esc.candidates.get(index) {
                Some((_, norm)) if *norm == esc.engine_norm => {
                    draft.comparison.decision = Decision::Agree;
                    draft.comparison.risk_score = draft.comparison.risk_score.max(confidence);
                }
                Some((patch_form, _)) => {
                    draft.comparison.decision = Decision::Patch;
                    draft.comparison.patch_reading = Some(patch_form.clone());
                    draft.comparison.patch_confidence = confidence;
                    draft.comparison.risk_score = draft.comparison.risk_score.max(confidence);
                }
                None => {
                    // out-of-range endorsement; keep the review verdict
                }
            }
        }
        JudgeVerdict::Uncertain => {
            // stays Review at conflict risk
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
