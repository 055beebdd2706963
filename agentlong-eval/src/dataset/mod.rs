//! Benchmark samples, prediction records and dataset loading

pub mod labels;
pub mod loader;
pub mod prompts;

pub use labels::{
    AnswerShape, ContextError, DatasetContext, HistoryVariant, KnowledgeVariant,
    QuestionArchetype, ResponseCategory,
};
pub use loader::{load_jsonl, load_jsonl_lenient, write_jsonl, LoadError};
pub use prompts::build_messages;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::providers::Message;

/// Sample fields copied through to prediction records
pub const ROUND_FIELDS: [&str; 3] = ["round", "i_round", "j_round"];

/// One evaluation unit from a dataset file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default, deserialize_with = "deserialize_key")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// Ground truth, shaped by the archetype
    #[serde(default)]
    pub answer: Value,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Sample {
    /// Transcript messages, empty when the record has none
    pub fn transcript(&self) -> &[Message] {
        self.messages.as_deref().unwrap_or_default()
    }
}

/// A persisted model prediction for one sample
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(default, deserialize_with = "deserialize_key")]
    pub id: Option<String>,
    #[serde(default)]
    pub sample_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<String>,
    /// Extracted value in its JSON form; `null` when extraction failed
    #[serde(default)]
    pub pred_answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl PredictionRecord {
    /// Key used to match this record to a sample: the `id`, or
    /// `{sample_id}_r{round}` for records written without one.
    pub fn key(&self) -> Option<String> {
        if let Some(id) = &self.id {
            return Some(id.clone());
        }
        let sample_id = self.sample_id.as_ref().and_then(value_key)?;
        let round = self.extra.get("round").and_then(value_key)?;
        Some(format!("{}_r{}", sample_id, round))
    }

    /// Look up the predicted value, falling back to a legacy field name
    /// when `pred_answer` is null or missing.
    pub fn prediction(&self, legacy_field: Option<&str>) -> Option<&Value> {
        match self.pred_answer.as_ref().filter(|v| !v.is_null()) {
            Some(value) => Some(value),
            None => legacy_field
                .and_then(|field| self.extra.get(field))
                .filter(|v| !v.is_null()),
        }
    }

    /// Whether a previous run already produced a response for this record
    pub fn has_response(&self) -> bool {
        self.raw_response
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Render an identifier-like JSON value as a lookup key
pub fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn deserialize_key<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_key))
}

/// Dataset-level integrity violations. These abort a run before scoring.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset has no question_type field")]
    NoQuestionType,

    #[error("Dataset contains multiple question_type values: {0:?}")]
    MixedQuestionTypes(Vec<String>),

    #[error("Unknown question_type: {0}")]
    UnknownQuestionType(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Check that every labelled row names the same, known archetype
pub fn require_single_archetype(samples: &[Sample]) -> Result<QuestionArchetype, DatasetError> {
    let labels: BTreeSet<&str> = samples
        .iter()
        .filter_map(|s| s.question_type.as_deref())
        .filter(|t| !t.is_empty())
        .collect();

    let mut iter = labels.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Err(DatasetError::NoQuestionType),
        (Some(label), None) => label
            .parse()
            .map_err(|_| DatasetError::UnknownQuestionType(label.to_string())),
        _ => Err(DatasetError::MixedQuestionTypes(
            labels.iter().map(|s| s.to_string()).collect(),
        )),
    }
}

/// A validated single-archetype dataset
#[derive(Debug, Clone)]
pub struct Dataset {
    pub archetype: QuestionArchetype,
    pub context: DatasetContext,
    pub samples: Vec<Sample>,
}

impl Dataset {
    /// Validate rows that are already in memory
    pub fn from_samples(samples: Vec<Sample>, context: DatasetContext) -> Result<Self, DatasetError> {
        let archetype = require_single_archetype(&samples)?;
        Ok(Self {
            archetype,
            context,
            samples,
        })
    }

    /// Load a JSONL dataset. The context comes from `context` when given,
    /// otherwise from the path.
    pub fn load(path: impl AsRef<Path>, context: Option<DatasetContext>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let context = match context {
            Some(ctx) => ctx,
            None => DatasetContext::infer_from_path(path)?,
        };
        let samples: Vec<Sample> = load_jsonl(path)?;
        tracing::debug!("Loaded {} samples from {}", samples.len(), path.display());
        Self::from_samples(samples, context)
    }

    /// Load only rows `[offset, offset + limit)`. The archetype check runs
    /// on the slice.
    pub fn load_slice(
        path: impl AsRef<Path>,
        context: Option<DatasetContext>,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let context = match context {
            Some(ctx) => ctx,
            None => DatasetContext::infer_from_path(path)?,
        };
        let samples: Vec<Sample> = load_jsonl(path)?;
        let take = limit.unwrap_or(usize::MAX);
        let sliced = samples.into_iter().skip(offset).take(take).collect();
        Self::from_samples(sliced, context)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples by id. Later rows win on duplicate ids.
    pub fn by_id(&self) -> HashMap<&str, &Sample> {
        self.samples
            .iter()
            .filter_map(|s| s.id.as_deref().map(|id| (id, s)))
            .collect()
    }

    pub fn answer_shape(&self) -> AnswerShape {
        self.archetype.answer_shape(self.context.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(id: &str, question_type: &str) -> Sample {
        serde_json::from_value(json!({
            "id": id,
            "question_type": question_type,
            "answer": 3,
        }))
        .unwrap()
    }

    #[test]
    fn test_numeric_ids_become_keys() {
        let s: Sample = serde_json::from_value(json!({"id": 17, "answer": "x"})).unwrap();
        assert_eq!(s.id.as_deref(), Some("17"));
    }

    #[test]
    fn test_prediction_key_fallback() {
        let rec: PredictionRecord =
            serde_json::from_value(json!({"sample_id": 4, "round": 2, "pred_answer": 1})).unwrap();
        assert_eq!(rec.key().as_deref(), Some("4_r2"));

        let rec: PredictionRecord = serde_json::from_value(json!({"sample_id": 4})).unwrap();
        assert_eq!(rec.key(), None);
    }

    #[test]
    fn test_prediction_legacy_field() {
        let rec: PredictionRecord = serde_json::from_value(json!({
            "id": "a",
            "pred_answer": null,
            "pred_intersection": ["x", "y"],
        }))
        .unwrap();
        assert_eq!(rec.prediction(None), None);
        assert_eq!(rec.prediction(Some("pred_intersection")), Some(&json!(["x", "y"])));
    }

    #[test]
    fn test_require_single_archetype() {
        let rows = vec![
            sample("1", "Count Frequency(Tool)"),
            sample("2", "Count Frequency(Tool)"),
        ];
        assert_eq!(
            require_single_archetype(&rows).unwrap(),
            QuestionArchetype::CountFrequencyTool
        );

        let mixed = vec![sample("1", "Count Frequency(Tool)"), sample("2", "Intersection")];
        assert!(matches!(
            require_single_archetype(&mixed),
            Err(DatasetError::MixedQuestionTypes(labels)) if labels.len() == 2
        ));

        assert!(matches!(
            require_single_archetype(&[]),
            Err(DatasetError::NoQuestionType)
        ));

        let unknown = vec![sample("1", "Guess Colour")];
        assert!(matches!(
            require_single_archetype(&unknown),
            Err(DatasetError::UnknownQuestionType(_))
        ));
    }

    #[test]
    fn test_has_response() {
        let mut rec = PredictionRecord::default();
        assert!(!rec.has_response());
        rec.raw_response = Some("   ".into());
        assert!(!rec.has_response());
        rec.raw_response = Some("<answer>1</answer>".into());
        assert!(rec.has_response());
    }
}
