//! LLM ruby annotator integration
//!
//! The second reading source. An [`AnnotatorBackend`] takes a chunk of
//! numbered lines and returns whatever the model printed; the
//! [`AnnotatorClient`] chunks the document, rate-limits and retries the
//! calls, salvages ruby pairs from loosely formatted responses and records
//! every raw payload in the audit log. The annotator is strictly
//! best-effort: any failure shrinks the consensus to two sources instead of
//! failing the run.

use std::io::Write;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::DecisionLog;
use crate::retry::{retry_external, Retryable, RetryPolicy};
use crate::services::rate_limit::RateLimiter;
use crate::types::{Line, RubyInfo, RubyToken};

/// Annotator errors
#[derive(Debug, Error)]
pub enum AnnotatorError {
    /// The configured command does not exist.
    #[error("annotator command not found: {0}")]
    CommandNotFound(String),

    /// The command ran but failed (non-zero exit, broken pipe).
    #[error("annotator execution failed: {0}")]
    Execution(String),

    /// The service behind the backend was unreachable.
    #[error("annotator unavailable: {0}")]
    Unavailable(String),
}

impl Retryable for AnnotatorError {
    fn is_retryable(&self) -> bool {
        match self {
            AnnotatorError::CommandNotFound(_) => false,
            AnnotatorError::Execution(_) | AnnotatorError::Unavailable(_) => true,
        }
    }
}

/// One line of an annotation request.
#[derive(Debug, Clone)]
pub struct AnnotationRequestLine {
    pub line_id: u32,
    pub text: String,
}

/// Transport for one annotation chunk. Returns the raw model output;
/// parsing stays in the client so every backend benefits from the same
/// salvage logic.
#[async_trait::async_trait]
pub trait AnnotatorBackend: Send + Sync {
    async fn annotate_chunk(
        &self,
        lines: &[AnnotationRequestLine],
    ) -> Result<String, AnnotatorError>;
}

// ============================================================================
// Command-line backend
// ============================================================================

/// Backend that pipes the prompt to an LLM command-line tool and reads the
/// annotation from its stdout.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(program: String, args: Vec<String>) -> Self {
        CommandBackend { program, args }
    }

    /// Check whether the configured command exists.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.program)
            .arg("--version")
            .output()
            .is_ok()
    }
}

#[async_trait::async_trait]
impl AnnotatorBackend for CommandBackend {
    async fn annotate_chunk(
        &self,
        lines: &[AnnotationRequestLine],
    ) -> Result<String, AnnotatorError> {
        let prompt = build_prompt(lines);

        let result = tokio::task::spawn_blocking({
            let program = self.program.clone();
            let args = self.args.clone();
            move || -> std::io::Result<std::process::Output> {
                let mut child = std::process::Command::new(&program)
                    .args(&args)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .stderr(std::process::Stdio::piped())
                    .spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(prompt.as_bytes())?;
                }
                // stdin dropped above so the child sees EOF
                child.wait_with_output()
            }
        })
        .await
        .map_err(|e| AnnotatorError::Execution(format!("task join error: {e}")))?;

        let output = result.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AnnotatorError::CommandNotFound(self.program.clone()),
            _ => AnnotatorError::Execution(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AnnotatorError::Execution(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Prompt sent to the model: instructions plus numbered lines.
fn build_prompt(lines: &[AnnotationRequestLine]) -> String {
    let mut prompt = String::from(
        "以下の番号付き日本語テキストについて、漢字・英字・数字を含む語ごとに\
         読み仮名を付けてください。出力は次の形式のJSON配列のみとし、\
         説明文は不要です:\n\
         [{\"line\": 番号, \"tokens\": [{\"surface\": \"語\", \"ruby\": \"よみ\"}]}]\n\n",
    );
    for line in lines {
        prompt.push_str(&format!("{}: {}\n", line.line_id, line.text));
    }
    prompt
}

// ============================================================================
// Client
// ============================================================================

/// Request chunking limits. A single line longer than `max_chars` still
/// travels, alone in its own chunk.
#[derive(Debug, Clone)]
pub struct ChunkLimits {
    pub max_lines: usize,
    pub max_chars: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        ChunkLimits { max_lines: 20, max_chars: 1200 }
    }
}

/// Collects ruby annotations for a document.
pub struct AnnotatorClient<B: AnnotatorBackend> {
    backend: B,
    limits: ChunkLimits,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl AnnotatorClient<CommandBackend> {
    /// Build a command-backed client from run configuration. `None` when no
    /// command is configured or the command cannot be run at all.
    pub fn from_config(config: &crate::config::AnnotatorConfig, retry: RetryPolicy) -> Option<Self> {
        let command = config.command.clone()?;
        let backend = CommandBackend::new(command.clone(), config.args.clone());
        if !backend.is_available() {
            warn!(command = %command, "annotator command not runnable, continuing without annotator");
            return None;
        }
        Some(AnnotatorClient::new(
            backend,
            ChunkLimits { max_lines: config.max_chunk_lines, max_chars: config.max_chunk_chars },
            retry,
            config.min_interval_ms,
        ))
    }
}

impl<B: AnnotatorBackend> AnnotatorClient<B> {
    pub fn new(
        backend: B,
        limits: ChunkLimits,
        retry: RetryPolicy,
        min_interval_ms: u64,
    ) -> Self {
        AnnotatorClient {
            backend,
            limits,
            rate_limiter: Arc::new(RateLimiter::new(min_interval_ms)),
            retry,
        }
    }

    /// Annotate the whole document. Never fails: chunks that error or
    /// return garbage are logged and skipped, and the result simply lacks
    /// their lines.
    pub async fn annotate(&self, lines: &[Line], log: &DecisionLog) -> RubyInfo {
        let request_lines: Vec<AnnotationRequestLine> = lines
            .iter()
            .filter(|line| !line.text.trim().is_empty())
            .map(|line| AnnotationRequestLine { line_id: line.line_id, text: line.text.clone() })
            .collect();

        let mut info = RubyInfo::default();
        let chunks = chunk_lines(&request_lines, &self.limits);
        debug!(lines = request_lines.len(), chunks = chunks.len(), "annotating document");

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            self.rate_limiter.wait().await;
            let outcome =
                retry_external(&self.retry, "annotator", || self.backend.annotate_chunk(chunk))
                    .await;
            match outcome {
                Ok(payload) => {
                    if let Err(e) = log.record_payload(chunk_index, &payload).await {
                        warn!(chunk_index, error = %e, "failed to record annotator payload");
                    }
                    match parse_payload(&payload) {
                        Some(annotated) => {
                            for line in annotated {
                                let pairs: Vec<RubyToken> = line
                                    .tokens
                                    .into_iter()
                                    .filter(|p| !p.surface.is_empty() && !p.ruby.is_empty())
                                    .collect();
                                if !pairs.is_empty() {
                                    info.absorb(line.line, pairs);
                                }
                            }
                        }
                        None => {
                            warn!(chunk_index, "annotator payload unparseable, skipping chunk");
                        }
                    }
                    info.raw_payloads.push(payload);
                }
                Err(e) => {
                    warn!(chunk_index, error = %e, "annotator chunk failed, continuing without it");
                }
            }
        }

        if info.is_empty() && !request_lines.is_empty() {
            warn!("annotator produced no usable annotations, consensus degrades to two sources");
        }
        info
    }
}

/// Greedy chunking under both limits.
fn chunk_lines(
    lines: &[AnnotationRequestLine],
    limits: &ChunkLimits,
) -> Vec<Vec<AnnotationRequestLine>> {
    let mut chunks: Vec<Vec<AnnotationRequestLine>> = Vec::new();
    let mut current: Vec<AnnotationRequestLine> = Vec::new();
    let mut current_chars = 0usize;

    for line in lines {
        let line_chars = line.text.chars().count();
        let overflows = !current.is_empty()
            && (current.len() >= limits.max_lines.max(1)
                || current_chars + line_chars > limits.max_chars);
        if overflows {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }
        current_chars += line_chars;
        current.push(line.clone());
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Debug, Deserialize)]
struct AnnotatedLine {
    line: u32,
    #[serde(default)]
    tokens: Vec<RubyToken>,
}

/// Strip code fences and slice out the outermost JSON array of a model
/// response. Models wrap output in fences or lead with prose despite
/// instructions; everything before the first `[` and after the last `]` is
/// discarded.
pub(crate) fn extract_json_array(raw: &str) -> Option<String> {
    let unfenced: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let start = unfenced.find('[')?;
    let end = unfenced.rfind(']')?;
    if end < start {
        return None;
    }
    Some(unfenced[start..=end].to_string())
}

fn parse_payload(raw: &str) -> Option<Vec<AnnotatedLine>> {
    serde_json::from_str(&extract_json_array(raw)?).ok()
}

// ============================================================================
// Tests
// ============================================================================
