//! # Yomikae
//!
//! Reading-consensus and correction engine for Japanese speech synthesis.
//!
//! Text-to-speech engines misread kanji often enough to matter: homograph
//! readings picked wrong, names mangled, domain terms guessed. Yomikae
//! cross-checks three independent reading sources per utterance:
//! - a morphological tokenizer's dictionary reading,
//! - an LLM ruby annotator's contextual reading,
//! - the synthesis engine's own phonetic analysis,
//!
//! scores each token's mispronunciation risk, and splices confirmed
//! corrections into the engine's accent-phrase structure before rendering.
//! Every comparison lands in an append-only decision log, which an offline
//! aggregation job folds back into the hazard dictionary of known-bad
//! terms.

pub mod audit;
pub mod config;
pub mod consensus;
pub mod error;
pub mod hazard;
pub mod kana;
pub mod pipeline;
pub mod retry;
pub mod risk;
pub mod services;
pub mod types;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use pipeline::{Pipeline, TextBlock};
