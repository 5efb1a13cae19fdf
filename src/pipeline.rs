//! Run orchestration
//!
//! Drives a correction run end to end: one up-front annotation pass over
//! the whole document, then per block in a bounded worker pool: query the
//! engine's phonetic analysis, align, score, compare, patch, render.
//! Blocks are independent; one block's upstream failure never aborts its
//! siblings. The only shared state is the read-only hazard dictionary and
//! the serialized decision log.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::DecisionLog;
use crate::config::RunConfig;
use crate::consensus::{
    align_tokens, apply_patches, build_patch, evaluate, EvaluationInput, Judger, TokenComparison,
};
use crate::hazard::HazardDictionary;
use crate::risk::RiskScorer;
use crate::services::{AnnotatorBackend, AnnotatorClient, SynthesisEngine};
use crate::types::{
    AudioQuery, AuditStatus, BlockOutcome, Decision, KanaPatch, Line, Mora, ReadingDecision,
    RiskySpan, RubyInfo, RunReport,
};

/// Unit of synthesis: one or more consecutive lines rendered together.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub block_id: String,
    pub lines: Vec<Line>,
}

impl TextBlock {
    /// One block per non-blank line, the default granularity.
    pub fn per_line(lines: Vec<Line>) -> Vec<TextBlock> {
        lines
            .into_iter()
            .filter(|line| !line.text.trim().is_empty())
            .map(|line| TextBlock {
                block_id: format!("block-{:04}", line.line_id),
                lines: vec![line],
            })
            .collect()
    }

    fn text(&self) -> String {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }
}

/// The correction pipeline for one run.
pub struct Pipeline<E: SynthesisEngine, A: AnnotatorBackend> {
    engine: E,
    /// Absent when no annotator is configured; the audit then runs on the
    /// tokenizer and engine readings alone.
    annotator: Option<AnnotatorClient<A>>,
    judger: Arc<dyn Judger>,
    hazards: HazardDictionary,
    log: Arc<DecisionLog>,
    config: RunConfig,
    run_id: Uuid,
}

/// A token that cleared the risk threshold, with everything the evaluator
/// needs about it.
struct Candidate {
    token_idx: usize,
    span: RiskySpan,
    annotator_reading: Option<String>,
}

impl<E: SynthesisEngine, A: AnnotatorBackend> Pipeline<E, A> {
    pub fn new(
        config: RunConfig,
        engine: E,
        annotator: Option<AnnotatorClient<A>>,
        judger: Arc<dyn Judger>,
        hazards: HazardDictionary,
        log: Arc<DecisionLog>,
    ) -> Self {
        let run_id = Uuid::new_v4();
        info!(%run_id, workers = config.workers, "pipeline ready");
        Pipeline { engine, annotator, judger, hazards, log, config, run_id }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Process every block and return outcomes (in submission order) plus
    /// the run report.
    ///
    /// Cancellation is honored between blocks; a block already started
    /// finishes its render so no partial audio is emitted.
    pub async fn run(
        &self,
        blocks: Vec<TextBlock>,
        cancel: &CancellationToken,
    ) -> (Vec<BlockOutcome>, RunReport) {
        let all_lines: Vec<Line> =
            blocks.iter().flat_map(|block| block.lines.iter().cloned()).collect();
        let ruby = match &self.annotator {
            Some(client) => client.annotate(&all_lines, &self.log).await,
            None => RubyInfo::default(),
        };
        info!(
            blocks = blocks.len(),
            annotated_lines = ruby.lines.len(),
            "annotation pass complete"
        );

        let ruby_ref = &ruby;
        let mut finished: Vec<(usize, BlockOutcome)> = stream::iter(blocks.into_iter().enumerate())
            .map(|(position, block)| async move {
                (position, self.process_block(block, ruby_ref, cancel).await)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;
        // report order is submission order; block ids are opaque strings
        // and do not sort (block-10000 orders before block-9999 as text)
        finished.sort_by_key(|(position, _)| *position);
        let outcomes: Vec<BlockOutcome> =
            finished.into_iter().map(|(_, outcome)| outcome).collect();

        let mut report = RunReport::new(self.run_id);
        for outcome in &outcomes {
            report.absorb(outcome);
        }
        report.finish();
        info!(
            clean = report.blocks_clean,
            corrected = report.blocks_corrected,
            review = report.blocks_needing_review,
            unaudited = report.blocks_unaudited,
            patches = report.patches_applied,
            "run finished"
        );
        (outcomes, report)
    }

    async fn process_block(
        &self,
        block: TextBlock,
        ruby: &RubyInfo,
        cancel: &CancellationToken,
    ) -> BlockOutcome {
        if cancel.is_cancelled() {
            info!(block_id = %block.block_id, "run cancelled before this block");
            return unaudited(block.block_id, "run cancelled".to_string());
        }

        let text = block.text();
        if text.trim().is_empty() {
            return unaudited(block.block_id, "block has no text".to_string());
        }

        let style_id = self.config.engine.style_id;
        let engine = &self.engine;
        let query = match crate::retry::retry_external(&self.config.retry, "audio_query", || {
            engine.audio_query(&text, style_id)
        })
        .await
        {
            Ok(query) => query,
            Err(e) => {
                // No comparison is possible without the engine's analysis,
                // and rendering without the audit would hide exactly the
                // errors this run exists to catch.
                error!(block_id = %block.block_id, error = %e, "phonetic analysis failed");
                return unaudited(block.block_id, format!("phonetic analysis failed: {e}"));
            }
        };

        let (patched_query, status) = self.audit_block(&block, query, ruby).await;

        let audio = match crate::retry::retry_external(&self.config.retry, "synthesis", || {
            engine.synthesis(&patched_query, style_id)
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(block_id = %block.block_id, error = %e, "synthesis failed, no audio");
                Vec::new()
            }
        };

        BlockOutcome { block_id: block.block_id, status, audio }
    }

    /// Compare readings for one block and splice in any confirmed
    /// corrections. Every comparison is written to the decision log.
    async fn audit_block(
        &self,
        block: &TextBlock,
        query: AudioQuery,
        ruby: &RubyInfo,
    ) -> (AudioQuery, AuditStatus) {
        let tokens: Vec<_> =
            block.lines.iter().flat_map(|line| line.tokens.iter().cloned()).collect();
        let line_texts: HashMap<u32, &str> =
            block.lines.iter().map(|line| (line.line_id, line.text.as_str())).collect();

        let alignments =
            align_tokens(&tokens, &query.accent_phrases, self.config.alignment_fuzz_threshold);
        let scorer = RiskScorer::new(&self.hazards);

        // Candidates in token order. Occurrence counters advance for every
        // token so the positional annotator lookup stays in step even when
        // an earlier occurrence was not risky.
        let mut occurrence: HashMap<(u32, &str), usize> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        for (token_idx, token) in tokens.iter().enumerate() {
            let nth = occurrence.entry((token.line_id, token.surface.as_str())).or_insert(0);
            let annotator_reading =
                ruby.reading_for(token.line_id, &token.surface, *nth).map(String::from);
            *nth += 1;

            let Some(span) = scorer.score_token(token) else { continue };
            if span.risk_score.value() < self.config.risk_threshold {
                continue;
            }
            candidates.push(Candidate { token_idx, span, annotator_reading });
        }

        if candidates.is_empty() {
            return (query, AuditStatus::Clean);
        }

        let inputs: Vec<EvaluationInput<'_>> = candidates
            .iter()
            .map(|candidate| {
                let token = &tokens[candidate.token_idx];
                EvaluationInput {
                    span: &candidate.span,
                    token,
                    alignment: &alignments[candidate.token_idx],
                    annotator_reading: candidate.annotator_reading.clone(),
                    context: line_texts.get(&token.line_id).copied().unwrap_or(""),
                }
            })
            .collect();
        let comparisons =
            evaluate(&inputs, &self.config.benign_variants, self.judger.as_ref()).await;

        // Build patches for every Patch verdict, then splice them all in
        // one pass.
        let flat: Vec<Mora> =
            query.accent_phrases.iter().flat_map(|p| p.moras.iter().cloned()).collect();
        let mut patches: Vec<KanaPatch> = Vec::new();
        for (candidate, comparison) in candidates.iter().zip(&comparisons) {
            if comparison.decision != Decision::Patch {
                continue;
            }
            let Some(reading) = comparison.patch_reading.as_deref() else { continue };
            let range = alignments[candidate.token_idx].mora_range.clone();
            let replaced: Vec<Mora> =
                flat.get(range.clone()).map(|moras| moras.to_vec()).unwrap_or_default();
            patches.push(build_patch(
                &block.block_id,
                comparison.line_id,
                comparison.token_index,
                range,
                reading,
                &replaced,
                comparison.patch_confidence,
            ));
        }
        let application = apply_patches(&query.accent_phrases, &patches);

        let skipped: HashSet<(u32, usize)> = application
            .skipped
            .iter()
            .map(|s| (s.patch.line_id, s.patch.token_index))
            .collect();
        for comparison in &comparisons {
            let applied_reading = if comparison.decision == Decision::Patch
                && !skipped.contains(&(comparison.line_id, comparison.token_index))
            {
                comparison.patch_reading.clone()
            } else {
                None
            };
            let record = ReadingDecision {
                timestamp: Utc::now(),
                run_id: self.run_id,
                block_id: block.block_id.clone(),
                line_id: comparison.line_id,
                surface: comparison.surface.clone(),
                tokenizer_reading: comparison.tokenizer_reading.clone(),
                annotator_reading: comparison.annotator_reading.clone(),
                engine_reading: comparison.engine_reading.clone(),
                decision: comparison.decision,
                risk_score: comparison.risk_score,
                applied_reading,
            };
            if let Err(e) = self.log.record_decision(&record).await {
                warn!(error = %e, "decision log append failed");
            }
        }

        let status = derive_status(&comparisons, application.applied, &skipped);
        let patched = AudioQuery { accent_phrases: application.phrases, extra: query.extra };
        (patched, status)
    }
}

fn unaudited(block_id: String, reason: String) -> BlockOutcome {
    BlockOutcome {
        block_id,
        status: AuditStatus::Unaudited { reason },
        audio: Vec::new(),
    }
}

/// Block status from its token verdicts.
///
/// Review and Unchecked both mean a human still has to listen; a block
/// with either is never reported clean, and operators can tell "we did
/// not check" apart from "we checked and it is fine".
fn derive_status(
    comparisons: &[TokenComparison],
    applied: usize,
    skipped: &HashSet<(u32, usize)>,
) -> AuditStatus {
    let mut surfaces: Vec<String> = Vec::new();
    for comparison in comparisons {
        let needs_ear = match comparison.decision {
            Decision::Review | Decision::Unchecked => true,
            // a correction that could not be spliced leaves the wrong
            // reading in the rendered audio
            Decision::Patch => {
                skipped.contains(&(comparison.line_id, comparison.token_index))
            }
            Decision::Agree | Decision::Noise => false,
        };
        if needs_ear && !surfaces.contains(&comparison.surface) {
            surfaces.push(comparison.surface.clone());
        }
    }
    if !surfaces.is_empty() {
        AuditStatus::NeedsReview { surfaces, patches: applied }
    } else if applied > 0 {
        AuditStatus::Corrected { patches: applied }
    } else {
        AuditStatus::Clean
    }
}

// ============================================================================
// Tests
// ============================================================================
