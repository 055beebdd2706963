//! Answer extraction and scoring

pub mod engine;
pub mod extract;
pub mod metrics;
pub mod rules;
pub mod scoring;

pub use engine::{evaluate_files, EvalError, Evaluation, EvaluationEngine, SampleDetail};
pub use extract::{AnswerExtractor, ExtractedValue, DEFAULT_ANSWER_TAG};
pub use metrics::{MetricKind, RunTally, ScoreRecord};
pub use rules::{lookup, AnswerRule};
pub use scoring::{NameNormalizer, Verdict};
