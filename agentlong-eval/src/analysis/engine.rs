//! Evaluation of prediction records against a dataset

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::extract::{AnswerExtractor, ExtractedValue};
use super::metrics::{MetricKind, RunTally, ScoreRecord};
use super::rules::{self, AnswerRule};
use super::scoring::{NameNormalizer, Verdict};
use crate::dataset::{
    load_jsonl_lenient, Dataset, DatasetContext, DatasetError, LoadError, PredictionRecord,
    QuestionArchetype, Sample, ROUND_FIELDS,
};

/// Error type for an evaluation run
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Prediction file not found: {0}")]
    MissingPredictions(String),
}

/// One matched prediction, for verbose output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDetail {
    pub id: String,
    pub ground_truth: Value,
    pub prediction: Option<Value>,
    /// `None` when the ground truth was skipped
    pub score: Option<f64>,
}

/// Result of scoring one prediction file
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub archetype: QuestionArchetype,
    pub context: DatasetContext,
    pub metric: MetricKind,
    pub tally: RunTally,
    pub details: Vec<SampleDetail>,
}

impl Evaluation {
    pub fn score(&self) -> f64 {
        self.tally.mean()
    }
}

/// Extraction and scoring bound to one archetype and context
#[derive(Debug, Clone)]
pub struct EvaluationEngine {
    archetype: QuestionArchetype,
    context: DatasetContext,
    rule: AnswerRule,
    normalizer: NameNormalizer,
    extractor: AnswerExtractor,
}

impl EvaluationEngine {
    pub fn new(archetype: QuestionArchetype, context: DatasetContext) -> Self {
        Self {
            archetype,
            context,
            rule: rules::lookup(archetype, context.history),
            normalizer: NameNormalizer::for_knowledge(context.knowledge),
            extractor: AnswerExtractor::default(),
        }
    }

    pub fn for_dataset(dataset: &Dataset) -> Self {
        Self::new(dataset.archetype, dataset.context)
    }

    /// Use a custom answer tag
    pub fn with_extractor(mut self, extractor: AnswerExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn archetype(&self) -> QuestionArchetype {
        self.archetype
    }

    pub fn context(&self) -> DatasetContext {
        self.context
    }

    pub fn metric(&self) -> MetricKind {
        self.rule.metric
    }

    /// Typed value of a raw model response
    pub fn extract(&self, raw: &str) -> Option<ExtractedValue> {
        self.extractor.isolate(raw).and_then(self.rule.parse)
    }

    /// Score one sample. `None` means the ground truth is malformed and the
    /// sample does not count.
    pub fn score_sample(
        &self,
        id: &str,
        ground_truth: &Value,
        prediction: Option<&Value>,
    ) -> Option<ScoreRecord> {
        match (self.rule.score)(&self.normalizer, ground_truth, prediction) {
            Verdict::Scored(score) => Some(ScoreRecord {
                id: id.to_string(),
                score,
                metric: self.rule.metric,
            }),
            Verdict::MalformedGroundTruth => None,
        }
    }

    /// Prediction record for a sample from a raw model response
    pub fn build_record(&self, sample: &Sample, raw_response: String) -> PredictionRecord {
        let mut record = PredictionRecord {
            id: sample.id.clone(),
            sample_id: sample.sample_id.clone(),
            question_type: Some(self.archetype.as_str().to_string()),
            raw_response: Some(raw_response),
            ..Default::default()
        };
        self.reparse(&mut record);

        for field in ROUND_FIELDS {
            if let Some(value) = sample.extra.get(field) {
                record.extra.insert(field.to_string(), value.clone());
            }
        }
        record
    }

    /// Recompute `pred_answer` and `parse_kind` from the stored raw response.
    /// Records without a raw response are left as they are.
    pub fn reparse(&self, record: &mut PredictionRecord) {
        let Some(raw) = record.raw_response.as_deref() else {
            return;
        };
        let value = self.extract(raw);
        record.pred_answer = Some(value.map(|v| v.to_json()).unwrap_or(Value::Null));
        record.parse_kind = Some(self.rule.shape.parse_kind().to_string());
    }

    /// Score every prediction record against the dataset
    pub fn evaluate(&self, dataset: &Dataset, predictions: &[PredictionRecord]) -> Evaluation {
        let samples = dataset.by_id();
        let mut tally = RunTally::new();
        let mut details = Vec::new();

        for record in predictions {
            let matched = record
                .key()
                .and_then(|key| samples.get(key.as_str()).map(|sample| (key, *sample)));
            tally.observe_prediction(matched.is_some());
            let Some((key, sample)) = matched else {
                continue;
            };

            let prediction = record.prediction(self.rule.legacy_field);
            let score = self.score_sample(&key, &sample.answer, prediction);
            match &score {
                Some(score) => tally.record(score),
                None => tally.skip_ground_truth(),
            }

            let shown = prediction.cloned().unwrap_or_default();
            debug!(
                "Sample {}: GT={}, Pred={}, score={:?}",
                key,
                sample.answer,
                shown,
                score.as_ref().map(|s| s.score)
            );
            details.push(SampleDetail {
                id: key,
                ground_truth: sample.answer.clone(),
                prediction: prediction.cloned(),
                score: score.map(|s| s.score),
            });
        }

        Evaluation {
            archetype: self.archetype,
            context: self.context,
            metric: self.rule.metric,
            tally,
            details,
        }
    }
}

/// Load a dataset and a prediction file and score them
pub fn evaluate_files(
    dataset_path: impl AsRef<Path>,
    predictions_path: impl AsRef<Path>,
    context: Option<DatasetContext>,
    extractor: AnswerExtractor,
) -> Result<Evaluation, EvalError> {
    let predictions_path = predictions_path.as_ref();
    if !predictions_path.exists() {
        return Err(EvalError::MissingPredictions(
            predictions_path.display().to_string(),
        ));
    }

    let dataset = Dataset::load(dataset_path, context)?;
    let predictions: Vec<PredictionRecord> = load_jsonl_lenient(predictions_path)?;
    info!(
        "Evaluating {} predictions for {} ({})",
        predictions.len(),
        dataset.archetype,
        dataset.context
    );

    let engine = EvaluationEngine::for_dataset(&dataset).with_extractor(extractor);
    Ok(engine.evaluate(&dataset, &predictions))
}
