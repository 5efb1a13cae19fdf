//! Run configuration
//!
//! Settings come from an optional TOML file with environment variable
//! overrides on top (ENV beats TOML, matching the usual service layout
//! where the file carries site defaults and the environment carries
//! per-run tweaks). Everything has a default so a bare `RunConfig::load(None)`
//! works against a local engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::services::engine_client::DEFAULT_BASE_URL;

/// Top-level configuration for a correction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub annotator: AnnotatorConfig,
    pub tokenizer: TokenizerConfig,
    pub judger: JudgerConfig,
    pub retry: RetryPolicy,
    /// Parallel block pipelines. The engine itself is the bottleneck, so
    /// small numbers are plenty.
    pub workers: usize,
    /// Minimum risk score for a token to enter consensus checking.
    pub risk_threshold: f32,
    /// Normalized similarity at or above which a mismatched alignment is
    /// still considered comparable.
    pub alignment_fuzz_threshold: f64,
    /// Katakana reading classes treated as equivalent, e.g. `["ジ", "ヂ"]`.
    /// The first member of each class is the canonical spelling.
    pub benign_variants: Vec<Vec<String>>,
    /// Hazard dictionary file. Absent means no dictionary.
    pub hazard_dictionary: Option<PathBuf>,
    /// JSONL decision log path.
    pub decision_log: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            engine: EngineConfig::default(),
            annotator: AnnotatorConfig::default(),
            tokenizer: TokenizerConfig::default(),
            judger: JudgerConfig::default(),
            retry: RetryPolicy::default(),
            workers: 2,
            risk_threshold: 0.3,
            alignment_fuzz_threshold: 0.5,
            benign_variants: Vec::new(),
            hazard_dictionary: None,
            decision_log: PathBuf::from("decisions.jsonl"),
        }
    }
}

/// Synthesis engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    /// Engine voice style to query and synthesize with.
    pub style_id: u32,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            style_id: 1,
            timeout_secs: 30,
        }
    }
}

/// Ruby annotator subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Command to run. Absent disables annotation entirely.
    pub command: Option<String>,
    pub args: Vec<String>,
    pub max_chunk_lines: usize,
    pub max_chunk_chars: usize,
    /// Minimum spacing between annotator invocations.
    pub min_interval_ms: u64,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        AnnotatorConfig {
            command: None,
            args: Vec::new(),
            max_chunk_lines: 20,
            max_chunk_chars: 1200,
            min_interval_ms: 1000,
        }
    }
}

/// Morphological analyzer settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Path to an uncompressed system dictionary, when the built-in
    /// analyzer backend is compiled in.
    pub dictionary_path: Option<PathBuf>,
}

/// Disambiguation judge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgerConfig {
    pub mode: JudgerMode,
    pub min_interval_ms: u64,
}

impl Default for JudgerConfig {
    fn default() -> Self {
        JudgerConfig { mode: JudgerMode::Off, min_interval_ms: 2000 }
    }
}

/// Which judge to consult when the sources scatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgerMode {
    /// Never consult a judge; scattered tokens go straight to review.
    Off,
    /// Batch scattered tokens through the annotator backend.
    Llm,
}

impl RunConfig {
    /// Load configuration: TOML file if given, defaults otherwise, then
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<RunConfig> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                let config: RunConfig = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("cannot parse {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "configuration loaded");
                config
            }
            None => RunConfig::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file settings.
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("YOMIKAE_ENGINE_URL") {
            info!("engine base URL from environment");
            self.engine.base_url = url;
        }
        if let Ok(style) = std::env::var("YOMIKAE_STYLE_ID") {
            self.engine.style_id = style
                .parse()
                .map_err(|_| Error::Config(format!("YOMIKAE_STYLE_ID is not a number: {style}")))?;
        }
        if let Ok(workers) = std::env::var("YOMIKAE_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| Error::Config(format!("YOMIKAE_WORKERS is not a number: {workers}")))?;
        }
        if let Ok(command) = std::env::var("YOMIKAE_ANNOTATOR_CMD") {
            self.annotator.command = Some(command);
        }
        if let Ok(path) = std::env::var("YOMIKAE_HAZARD_DICT") {
            self.hazard_dictionary = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("YOMIKAE_DECISION_LOG") {
            self.decision_log = PathBuf::from(path);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.engine.base_url.trim().is_empty() {
            return Err(Error::Config("engine.base_url is empty".to_string()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.risk_threshold) {
            return Err(Error::Config(format!(
                "risk_threshold {} outside 0.0..=1.0",
                self.risk_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.alignment_fuzz_threshold) {
            return Err(Error::Config(format!(
                "alignment_fuzz_threshold {} outside 0.0..=1.0",
                self.alignment_fuzz_threshold
            )));
        }
        if self.annotator.max_chunk_lines == 0 || self.annotator.max_chunk_chars == 0 {
            return Err(Error::Config("annotator chunk limits must be non-zero".to_string()));
        }
        for class in &self.benign_variants {
            if class.len() < 2 {
                return Err(Error::Config(
                    "each benign_variants class needs at least two readings".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 2);
        assert_eq!(config.engine.base_url, DEFAULT_BASE_URL);
        assert!(config.annotator.command.is_none());
        assert_eq!(config.judger.mode, JudgerMode::Off);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml = r#"
            workers = 4
            risk_threshold = 0.5

            [engine]
            style_id = 8

            [annotator]
            command = "annotate"
            args = ["--format", "json"]
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.risk_threshold, 0.5);
        assert_eq!(config.engine.style_id, 8);
        assert_eq!(config.engine.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.annotator.command.as_deref(), Some("annotate"));
        assert_eq!(config.annotator.max_chunk_lines, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_benign_variants_from_toml() {
        let toml = r#"
            benign_variants = [["ジ", "ヂ"], ["ズ", "ヅ"]]
        "#;
        let config: RunConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.benign_variants.len(), 2);
        assert_eq!(config.benign_variants[0], vec!["ジ", "ヂ"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RunConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.risk_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.benign_variants = vec![vec!["ジ".to_string()]];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_judger_mode_snake_case() {
        let config: RunConfig = toml::from_str("[judger]\nmode = \"llm\"").unwrap();
        assert_eq!(config.judger.mode, JudgerMode::Llm);
    }
}
