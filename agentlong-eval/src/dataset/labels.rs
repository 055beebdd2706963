//! Question archetypes and dataset context labels

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CONTEXT_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^k[if]-[cv]$").expect("static pattern"));

/// Fixed question categories of the benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QuestionArchetype {
    #[serde(rename = "Count Frequency(Tool)", alias = "count_frequency_tool")]
    CountFrequencyTool,
    #[serde(rename = "Find Duplicates(Tool)", alias = "find_duplicates_tool")]
    FindDuplicatesTool,
    #[serde(rename = "Find Target Offsets(Tool)", alias = "find_target_offsets_tool")]
    FindTargetOffsetsTool,
    #[serde(rename = "Count Correctness(Env)", alias = "count_correctness_env")]
    CountCorrectnessEnv,
    #[serde(rename = "Count Frequency(Env)", alias = "count_frequency_env")]
    CountFrequencyEnv,
    #[serde(
        rename = "Find Round with Largest Value(Env)",
        alias = "find_round_largest_value_env"
    )]
    FindRoundLargestValueEnv,
    #[serde(rename = "Weighted Summation(Env)", alias = "weighted_summation_env")]
    WeightedSummationEnv,
    #[serde(rename = "Intersection", alias = "intersection")]
    Intersection,
}

impl QuestionArchetype {
    pub fn all() -> Vec<QuestionArchetype> {
        vec![
            QuestionArchetype::CountFrequencyTool,
            QuestionArchetype::FindDuplicatesTool,
            QuestionArchetype::FindTargetOffsetsTool,
            QuestionArchetype::CountCorrectnessEnv,
            QuestionArchetype::CountFrequencyEnv,
            QuestionArchetype::FindRoundLargestValueEnv,
            QuestionArchetype::WeightedSummationEnv,
            QuestionArchetype::Intersection,
        ]
    }

    /// Label used in datasets and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionArchetype::CountFrequencyTool => "Count Frequency(Tool)",
            QuestionArchetype::FindDuplicatesTool => "Find Duplicates(Tool)",
            QuestionArchetype::FindTargetOffsetsTool => "Find Target Offsets(Tool)",
            QuestionArchetype::CountCorrectnessEnv => "Count Correctness(Env)",
            QuestionArchetype::CountFrequencyEnv => "Count Frequency(Env)",
            QuestionArchetype::FindRoundLargestValueEnv => "Find Round with Largest Value(Env)",
            QuestionArchetype::WeightedSummationEnv => "Weighted Summation(Env)",
            QuestionArchetype::Intersection => "Intersection",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            QuestionArchetype::CountFrequencyTool => "count_frequency_tool",
            QuestionArchetype::FindDuplicatesTool => "find_duplicates_tool",
            QuestionArchetype::FindTargetOffsetsTool => "find_target_offsets_tool",
            QuestionArchetype::CountCorrectnessEnv => "count_correctness_env",
            QuestionArchetype::CountFrequencyEnv => "count_frequency_env",
            QuestionArchetype::FindRoundLargestValueEnv => "find_round_largest_value_env",
            QuestionArchetype::WeightedSummationEnv => "weighted_summation_env",
            QuestionArchetype::Intersection => "intersection",
        }
    }

    /// Which part of the transcript the question is about
    pub fn category(&self) -> ResponseCategory {
        match self {
            QuestionArchetype::CountFrequencyTool
            | QuestionArchetype::FindDuplicatesTool
            | QuestionArchetype::FindTargetOffsetsTool => ResponseCategory::ToolResponse,
            QuestionArchetype::CountCorrectnessEnv
            | QuestionArchetype::CountFrequencyEnv
            | QuestionArchetype::FindRoundLargestValueEnv
            | QuestionArchetype::WeightedSummationEnv => ResponseCategory::EnvResponse,
            QuestionArchetype::Intersection => ResponseCategory::FinalGuess,
        }
    }

    /// The answer shape bound to this archetype. The history variant only
    /// matters for `Intersection`.
    pub fn answer_shape(&self, history: HistoryVariant) -> AnswerShape {
        match self {
            QuestionArchetype::CountFrequencyTool
            | QuestionArchetype::CountCorrectnessEnv
            | QuestionArchetype::CountFrequencyEnv
            | QuestionArchetype::FindRoundLargestValueEnv
            | QuestionArchetype::WeightedSummationEnv => AnswerShape::Integer,
            QuestionArchetype::FindDuplicatesTool => AnswerShape::Boolean,
            QuestionArchetype::FindTargetOffsetsTool => AnswerShape::OrderedPair,
            QuestionArchetype::Intersection => match history {
                HistoryVariant::Verbose => AnswerShape::UnorderedSet,
                HistoryVariant::Concise => AnswerShape::BareString,
            },
        }
    }
}

impl std::fmt::Display for QuestionArchetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuestionArchetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        QuestionArchetype::all()
            .into_iter()
            .find(|a| a.as_str() == needle || a.slug().eq_ignore_ascii_case(needle))
            .ok_or_else(|| format!("Unknown question_type: {}", s))
    }
}

/// Grouping used for output directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCategory {
    ToolResponse,
    EnvResponse,
    FinalGuess,
}

impl ResponseCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCategory::ToolResponse => "tool_response",
            ResponseCategory::EnvResponse => "env_response",
            ResponseCategory::FinalGuess => "final_guess",
        }
    }
}

/// Typed structure a parsed answer must conform to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    Integer,
    Boolean,
    OrderedPair,
    UnorderedSet,
    BareString,
}

impl AnswerShape {
    /// Tag written to prediction records as `parse_kind`
    pub fn parse_kind(&self) -> &'static str {
        match self {
            AnswerShape::Integer => "number",
            AnswerShape::Boolean => "boolean",
            AnswerShape::OrderedPair => "list",
            AnswerShape::UnorderedSet => "intersection_list",
            AnswerShape::BareString => "final_answer",
        }
    }
}

/// How much of each round the transcript keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryVariant {
    #[serde(rename = "Concise-Response")]
    Concise,
    #[serde(rename = "Verbose-Response")]
    Verbose,
}

impl HistoryVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryVariant::Concise => "Concise-Response",
            HistoryVariant::Verbose => "Verbose-Response",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            HistoryVariant::Concise => "c",
            HistoryVariant::Verbose => "v",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "c" => Some(HistoryVariant::Concise),
            "v" => Some(HistoryVariant::Verbose),
            _ => None,
        }
    }
}

/// Whether entity names are real (Pokemon) or masked ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeVariant {
    KnowledgeIntensive,
    KnowledgeFree,
}

impl KnowledgeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeVariant::KnowledgeIntensive => "knowledge_intensive",
            KnowledgeVariant::KnowledgeFree => "knowledge_free",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            KnowledgeVariant::KnowledgeIntensive => "ki",
            KnowledgeVariant::KnowledgeFree => "kf",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "ki" => Some(KnowledgeVariant::KnowledgeIntensive),
            "kf" => Some(KnowledgeVariant::KnowledgeFree),
            _ => None,
        }
    }
}

/// Error inferring a dataset's context
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Cannot infer knowledge/history type from path: {0}")]
    NotFound(String),

    #[error("Invalid knowledge/history abbreviation: {0}")]
    Invalid(String),
}

/// Knowledge and history variant of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetContext {
    pub knowledge: KnowledgeVariant,
    pub history: HistoryVariant,
}

impl DatasetContext {
    pub fn new(knowledge: KnowledgeVariant, history: HistoryVariant) -> Self {
        Self { knowledge, history }
    }

    /// Infer the context from the first path component shaped like `ki-c`.
    pub fn infer_from_path(path: &Path) -> Result<Self, ContextError> {
        let found = path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
            .find(|part| CONTEXT_SEGMENT.is_match(part))
            .ok_or_else(|| ContextError::NotFound(path.display().to_string()))?;
        found.parse()
    }

    /// Short form, e.g. `kf-v`
    pub fn key(&self) -> String {
        format!("{}-{}", self.knowledge.key(), self.history.key())
    }
}

impl std::str::FromStr for DatasetContext {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let (knowledge, history) = lowered
            .split_once('-')
            .ok_or_else(|| ContextError::Invalid(s.to_string()))?;
        match (KnowledgeVariant::from_key(knowledge), HistoryVariant::from_key(history)) {
            (Some(knowledge), Some(history)) => Ok(Self { knowledge, history }),
            _ => Err(ContextError::Invalid(s.to_string())),
        }
    }
}

impl std::fmt::Display for DatasetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.knowledge.as_str(), self.history.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_archetype_from_label_and_slug() {
        assert_eq!(
            "Find Round with Largest Value(Env)".parse::<QuestionArchetype>(),
            Ok(QuestionArchetype::FindRoundLargestValueEnv)
        );
        assert_eq!(
            "weighted_summation_env".parse::<QuestionArchetype>(),
            Ok(QuestionArchetype::WeightedSummationEnv)
        );
        assert!("Count Things".parse::<QuestionArchetype>().is_err());
    }

    #[test]
    fn test_archetype_serde_label() {
        let json = serde_json::to_string(&QuestionArchetype::FindDuplicatesTool).unwrap();
        assert_eq!(json, "\"Find Duplicates(Tool)\"");
        let back: QuestionArchetype = serde_json::from_str("\"intersection\"").unwrap();
        assert_eq!(back, QuestionArchetype::Intersection);
    }

    #[test]
    fn test_answer_shape_binding() {
        for archetype in QuestionArchetype::all() {
            if archetype == QuestionArchetype::Intersection {
                continue;
            }
            assert_eq!(
                archetype.answer_shape(HistoryVariant::Concise),
                archetype.answer_shape(HistoryVariant::Verbose)
            );
        }
        assert_eq!(
            QuestionArchetype::Intersection.answer_shape(HistoryVariant::Verbose),
            AnswerShape::UnorderedSet
        );
        assert_eq!(
            QuestionArchetype::Intersection.answer_shape(HistoryVariant::Concise),
            AnswerShape::BareString
        );
    }

    #[test]
    fn test_infer_context_from_path() {
        let path = PathBuf::from("data/KF-V/intersection/test.jsonl");
        let ctx = DatasetContext::infer_from_path(&path).unwrap();
        assert_eq!(ctx.knowledge, KnowledgeVariant::KnowledgeFree);
        assert_eq!(ctx.history, HistoryVariant::Verbose);
        assert_eq!(ctx.key(), "kf-v");
    }

    #[test]
    fn test_infer_context_missing() {
        let path = PathBuf::from("data/kx-v/test.jsonl");
        assert!(matches!(
            DatasetContext::infer_from_path(&path),
            Err(ContextError::NotFound(_))
        ));
        assert!("ki-x".parse::<DatasetContext>().is_err());
    }
}
