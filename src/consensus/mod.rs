//! Reading consensus: alignment, comparison, judging and patching
//!
//! The stages that turn three independent reading hypotheses into applied
//! corrections. `align` maps tokens onto the engine's mora sequence, `diff`
//! compares the readings and decides per token, `judge` holds the pluggable
//! tie-breaker, and `patch` splices confirmed corrections back into the
//! engine's structure.

pub mod align;
pub mod diff;
pub mod judge;
pub mod patch;

pub use align::{align_tokens, AlignmentConfidence, TokenAlignment};
pub use diff::{evaluate, EvaluationInput, TokenComparison};
pub use judge::{judger_from_config, JudgeVerdict, JudgementRequest, Judger, LlmJudger, NoopJudger};
pub use patch::{apply_patches, build_patch, PatchApplication, SkippedPatch};
