//! Answer extraction and scoring for the AgentLong guessing-game benchmark
//!
//! This crate turns free-text model answers into typed values and scores
//! them against dataset ground truth, one question archetype at a time.
//!
//! # Features
//!
//! - Eight question archetypes across five answer shapes
//! - Last-`<answer>`-span extraction tolerant of prose, lists and numbering
//! - Per-shape scoring with pair partial credit and set F1
//! - Prediction runs against any OpenAI-compatible endpoint, with resume
//! - JSON metric reports and per-sample details
//!
//! # Example
//!
//! ```no_run
//! use agentlong_eval::{
//!     analysis::{AnswerExtractor, ExtractedValue},
//!     dataset::{HistoryVariant, QuestionArchetype},
//! };
//!
//! let extractor = AnswerExtractor::default();
//! let (value, _shape) = extractor.extract(
//!     QuestionArchetype::CountFrequencyTool,
//!     HistoryVariant::Concise,
//!     "I counted <answer>3</answer>, no wait <answer>4</answer>",
//! );
//! assert_eq!(value, Some(ExtractedValue::Integer(4)));
//! ```

pub mod analysis;
pub mod config;
pub mod dataset;
pub mod providers;
pub mod reporting;
pub mod runner;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{
        evaluate_files, AnswerExtractor, Evaluation, EvaluationEngine, ExtractedValue, MetricKind,
        RunTally, ScoreRecord, Verdict,
    };
    pub use crate::config::Config;
    pub use crate::dataset::{
        AnswerShape, Dataset, DatasetContext, HistoryVariant, KnowledgeVariant,
        PredictionRecord, QuestionArchetype, Sample,
    };
    pub use crate::providers::{
        create_provider, CompletionRequest, CompletionResponse, LLMProvider, Message,
        ProviderError, ProviderResult,
    };
    pub use crate::reporting::{print_console_report, MetricReport};
    pub use crate::runner::{PredictionRunner, RunnerConfig};
}
