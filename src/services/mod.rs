//! Reading-source integrations
//!
//! Each extractor the consensus engine consults lives here: the
//! morphological tokenizer, the LLM ruby annotator and the synthesis
//! engine's HTTP API. Every client keeps its own error type; the pipeline
//! decides which failures degrade the run and which abort a block.

pub mod annotator_client;
pub mod engine_client;
pub mod rate_limit;
pub mod tokenizer;

pub use annotator_client::{AnnotatorBackend, AnnotatorClient, AnnotatorError, CommandBackend};
pub use engine_client::{EngineError, HttpEngine, SynthesisEngine};
pub use rate_limit::RateLimiter;
pub use tokenizer::{MorphologicalAnalyzer, RawMorpheme, TokenizerAdapter, TokenizerError};
