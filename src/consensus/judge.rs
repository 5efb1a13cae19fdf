//! Pluggable tie-breaker for conflicting readings
//!
//! When the three sources scatter (or only two sources exist and they
//! disagree), the diff stage can hand the conflict to a [`Judger`]. The
//! default [`NoopJudger`] declines every case, which routes conflicts to
//! manual review. [`LlmJudger`] asks a language model to pick among the
//! candidates, in one batched, rate-limited call per block rather than one
//! per token.

use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::services::annotator_client::{extract_json_array, AnnotatorBackend};
use crate::services::rate_limit::RateLimiter;
use crate::types::Score;

/// One conflict to adjudicate.
#[derive(Debug, Clone)]
pub struct JudgementRequest {
    pub surface: String,
    /// The full line the token appears in.
    pub context: String,
    /// Distinct candidate readings, katakana, annotator first when present.
    pub candidates: Vec<String>,
}

/// Verdict for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeVerdict {
    /// Candidate at this index is correct.
    Choose { index: usize, confidence: Score },
    /// No candidate could be endorsed.
    Uncertain,
}

/// Batch adjudicator. Implementations must return one verdict per request,
/// in order, and must not fail the batch: an unreachable backend is a batch
/// of `Uncertain`.
#[async_trait::async_trait]
pub trait Judger: Send + Sync {
    async fn judge(&self, requests: &[JudgementRequest]) -> Vec<JudgeVerdict>;
}

/// Declines everything; conflicts fall through to manual review.
pub struct NoopJudger;

#[async_trait::async_trait]
impl Judger for NoopJudger {
    async fn judge(&self, requests: &[JudgementRequest]) -> Vec<JudgeVerdict> {
        vec![JudgeVerdict::Uncertain; requests.len()]
    }
}

/// Pick the judger the configuration asks for. `llm` mode without a usable
/// backend falls back to the no-op judger so conflicts still reach review.
pub fn judger_from_config<B: AnnotatorBackend + 'static>(
    config: &crate::config::JudgerConfig,
    backend: Option<B>,
) -> Arc<dyn Judger> {
    use crate::config::JudgerMode;
    match (config.mode, backend) {
        (JudgerMode::Llm, Some(backend)) => {
            Arc::new(LlmJudger::new(backend, config.min_interval_ms))
        }
        (JudgerMode::Llm, None) => {
            warn!("judger mode is llm but no backend is available, conflicts go to review");
            Arc::new(NoopJudger)
        }
        (JudgerMode::Off, _) => Arc::new(NoopJudger),
    }
}

// ============================================================================
// LLM-backed judger
// ============================================================================

/// Confidence assigned to an endorsed model choice. Kept below hazard
/// confirmation levels: the dictionary encodes repeated human-verified
/// corrections, the judger a single model opinion.
const JUDGER_CONFIDENCE: f32 = 0.7;

/// Asks a language model to choose among candidate readings.
pub struct LlmJudger<B: AnnotatorBackend> {
    backend: B,
    rate_limiter: Arc<RateLimiter>,
}

impl<B: AnnotatorBackend> LlmJudger<B> {
    pub fn new(backend: B, min_interval_ms: u64) -> Self {
        LlmJudger { backend, rate_limiter: Arc::new(RateLimiter::new(min_interval_ms)) }
    }
}

#[async_trait::async_trait]
impl<B: AnnotatorBackend> Judger for LlmJudger<B> {
    async fn judge(&self, requests: &[JudgementRequest]) -> Vec<JudgeVerdict> {
        if requests.is_empty() {
            return Vec::new();
        }
        self.rate_limiter.wait().await;

        // The annotator backend is reused as a generic prompt transport;
        // the judging prompt travels as a single pseudo-line.
        let prompt_line = crate::services::annotator_client::AnnotationRequestLine {
            line_id: 0,
            text: build_judge_prompt(requests),
        };
        let payload = match self.backend.annotate_chunk(&[prompt_line]).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, conflicts = requests.len(), "judger call failed, leaving conflicts for review");
                return vec![JudgeVerdict::Uncertain; requests.len()];
            }
        };

        parse_choices(&payload, requests)
    }
}

fn build_judge_prompt(requests: &[JudgementRequest]) -> String {
    let mut prompt = String::from(
        "以下の各項目について、文脈中の語の正しい読みを候補から選んでください。\
         出力は次の形式のJSON配列のみとし、確信が持てない項目はchoiceを0に\
         してください:\n\
         [{\"item\": 項目番号, \"choice\": 候補番号}]\n\n",
    );
    for (i, request) in requests.iter().enumerate() {
        prompt.push_str(&format!("項目{}: 文脈「{}」の語「{}」 候補: ", i + 1, request.context, request.surface));
        for (j, candidate) in request.candidates.iter().enumerate() {
            prompt.push_str(&format!("{}. {} ", j + 1, candidate));
        }
        prompt.push('\n');
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct Choice {
    item: usize,
    choice: usize,
}

/// Map model output back onto the request batch. Items the model skipped,
/// out-of-range indices and a 0 choice all come back `Uncertain`.
fn parse_choices(payload: &str, requests: &[JudgementRequest]) -> Vec<JudgeVerdict> {
    let mut verdicts = vec![JudgeVerdict::Uncertain; requests.len()];
    let Some(array) = extract_json_array(payload) else {
        warn!("judger payload unparseable, leaving conflicts for review");
        return verdicts;
    };
    let choices: Vec<Choice> = match serde_json::from_str(&array) {
        Ok(choices) => choices,
        Err(e) => {
            warn!(error = %e, "judger payload unparseable, leaving conflicts for review");
            return verdicts;
        }
    };

    for choice in choices {
        let Some(slot) = choice.item.checked_sub(1) else { continue };
        if slot >= requests.len() || choice.choice == 0 {
            continue;
        }
        let index = choice.choice - 1;
        if index < requests[slot].candidates.len() {
            verdicts[slot] =
                JudgeVerdict::Choose { index, confidence: Score::new(JUDGER_CONFIDENCE) };
        }
    }
    verdicts
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::annotator_client::{AnnotationRequestLine, AnnotatorError};

    fn request(surface: &str, candidates: &[&str]) -> JudgementRequest {
        JudgementRequest {
            surface: surface.to_string(),
            context: format!("テスト文の{surface}"),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_noop_judger_declines() {
        let verdicts = NoopJudger.judge(&[request("方", &["ホウ", "カタ"])]).await;
        assert_eq!(verdicts, vec![JudgeVerdict::Uncertain]);
    }

    #[test]
    fn test_parse_choices_maps_and_defaults() {
        let requests = vec![
            request("方", &["ホウ", "カタ"]),
            request("礼", &["レイ", "ライ"]),
            request("辛い", &["カライ", "ツライ"]),
        ];
        let payload = r#"[{"item":1,"choice":2},{"item":2,"choice":0},{"item":9,"choice":1}]"#;
        let verdicts = parse_choices(payload, &requests);
        assert!(matches!(verdicts[0], JudgeVerdict::Choose { index: 1, .. }));
        assert_eq!(verdicts[1], JudgeVerdict::Uncertain);
        assert_eq!(verdicts[2], JudgeVerdict::Uncertain);
    }

    #[test]
    fn test_parse_choices_rejects_out_of_range_candidate() {
        let requests = vec![request("方", &["ホウ"])];
        let verdicts = parse_choices(r#"[{"item":1,"choice":5}]"#, &requests);
        assert_eq!(verdicts[0], JudgeVerdict::Uncertain);
    }

    #[test]
    fn test_parse_choices_garbage() {
        let requests = vec![request("方", &["ホウ", "カタ"])];
        assert_eq!(parse_choices("考え中です", &requests), vec![JudgeVerdict::Uncertain]);
    }

    #[test]
    fn test_judge_prompt_lists_items_and_candidates() {
        let prompt = build_judge_prompt(&[request("方", &["ホウ", "カタ"])]);
        assert!(prompt.contains("項目1"));
        assert!(prompt.contains("1. ホウ"));
        assert!(prompt.contains("2. カタ"));
    }

    struct CannedBackend(String);

    #[async_trait::async_trait]
    impl crate::services::annotator_client::AnnotatorBackend for CannedBackend {
        async fn annotate_chunk(
            &self,
            _lines: &[AnnotationRequestLine],
        ) -> Result<String, AnnotatorError> {
            Ok(self.0.clone())
        }
    }

    struct DownBackend;

    #[async_trait::async_trait]
    impl crate::services::annotator_client::AnnotatorBackend for DownBackend {
        async fn annotate_chunk(
            &self,
            _lines: &[AnnotationRequestLine],
        ) -> Result<String, AnnotatorError> {
            Err(AnnotatorError::Unavailable("no model".to_string()))
        }
    }

    #[tokio::test]
    async fn test_llm_judger_round_trip() {
        let judger = LlmJudger::new(CannedBackend(r#"[{"item":1,"choice":1}]"#.to_string()), 0);
        let verdicts = judger.judge(&[request("方", &["ガタ", "ホウ"])]).await;
        assert!(matches!(verdicts[0], JudgeVerdict::Choose { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_llm_judger_backend_failure_degrades() {
        let judger = LlmJudger::new(DownBackend, 0);
        let verdicts = judger.judge(&[request("方", &["ガタ", "ホウ"])]).await;
        assert_eq!(verdicts, vec![JudgeVerdict::Uncertain]);
    }

    #[tokio::test]
    async fn test_llm_judger_empty_batch_makes_no_call() {
        let judger = LlmJudger::new(DownBackend, 0);
        assert!(judger.judge(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_judger_selection_from_config() {
        use crate::config::{JudgerConfig, JudgerMode};
        let llm = JudgerConfig { mode: JudgerMode::Llm, min_interval_ms: 0 };

        let judger = judger_from_config(
            &llm,
            Some(CannedBackend(r#"[{"item":1,"choice":1}]"#.to_string())),
        );
        let verdicts = judger.judge(&[request("方", &["ガタ"])]).await;
        assert!(matches!(verdicts[0], JudgeVerdict::Choose { index: 0, .. }));

        // llm mode without a backend still produces a working judger
        let fallback = judger_from_config::<DownBackend>(&llm, None);
        let verdicts = fallback.judge(&[request("方", &["ガタ"])]).await;
        assert_eq!(verdicts[0], JudgeVerdict::Uncertain);

        let off = judger_from_config::<DownBackend>(&JudgerConfig::default(), None);
        let verdicts = off.judge(&[request("方", &["ガタ"])]).await;
        assert_eq!(verdicts[0], JudgeVerdict::Uncertain);
    }
}
