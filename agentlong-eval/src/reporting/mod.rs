//! Results reporting

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::analysis::{Evaluation, MetricKind};
use crate::dataset::{write_jsonl, LoadError};

/// Run-level metric for one prediction file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub question_type: String,
    pub knowledge_type: String,
    pub history_type: String,
    pub metric: MetricKind,
    pub score: f64,
    /// Sum of per-sample scores; omitted for F1 runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<f64>,
    /// Samples in the denominator; omitted for F1 runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub matched: usize,
    /// Prediction records with no matching sample
    pub skipped: usize,
    /// Matched samples whose ground truth could not be read
    pub ground_truth_skipped: usize,
    pub predictions: usize,
    pub timestamp: String,
}

impl MetricReport {
    pub fn from_evaluation(evaluation: &Evaluation) -> Self {
        let tally = &evaluation.tally;
        let accuracy = evaluation.metric == MetricKind::Accuracy;
        Self {
            question_type: evaluation.archetype.as_str().to_string(),
            knowledge_type: evaluation.context.knowledge.as_str().to_string(),
            history_type: evaluation.context.history.as_str().to_string(),
            metric: evaluation.metric,
            score: tally.mean(),
            correct: accuracy.then_some(tally.sum),
            total: accuracy.then_some(tally.scored),
            matched: tally.matched,
            skipped: tally.unmatched,
            ground_truth_skipped: tally.ground_truth_skipped,
            predictions: tally.predictions,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }
}

/// Write per-sample details as JSONL
pub fn write_details(evaluation: &Evaluation, path: impl AsRef<Path>) -> Result<usize, LoadError> {
    write_jsonl(path, &evaluation.details)
}

/// Generate a console report
pub fn print_console_report(report: &MetricReport) {
    println!("\n=== AgentLong Evaluation ===\n");
    println!("Question type:  {}", report.question_type);
    println!("Knowledge type: {}", report.knowledge_type);
    println!("History type:   {}", report.history_type);
    println!("{:-<50}", "");

    match report.metric {
        MetricKind::F1 => println!("F1: {:.4}", report.score),
        MetricKind::Accuracy => println!("Accuracy: {:.4}", report.score),
    }
    if let (Some(correct), Some(total)) = (report.correct, report.total) {
        println!("Correct: {} / {}", correct, total);
    }
    println!("Matched: {}", report.matched);
    if report.skipped > 0 {
        println!("Skipped: {}", report.skipped);
    }
    if report.ground_truth_skipped > 0 {
        println!("Ground truth skipped: {}", report.ground_truth_skipped);
    }

    println!("\n{:=<50}", "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::RunTally;
    use crate::dataset::{DatasetContext, HistoryVariant, KnowledgeVariant, QuestionArchetype};

    fn evaluation(archetype: QuestionArchetype, history: HistoryVariant, metric: MetricKind) -> Evaluation {
        Evaluation {
            archetype,
            context: DatasetContext::new(KnowledgeVariant::KnowledgeFree, history),
            metric,
            tally: RunTally {
                predictions: 5,
                matched: 4,
                unmatched: 1,
                ground_truth_skipped: 1,
                scored: 3,
                sum: 1.5,
            },
            details: Vec::new(),
        }
    }

    #[test]
    fn test_accuracy_report_fields() {
        let eval = evaluation(
            QuestionArchetype::FindTargetOffsetsTool,
            HistoryVariant::Concise,
            MetricKind::Accuracy,
        );
        let value = serde_json::to_value(MetricReport::from_evaluation(&eval)).unwrap();
        assert_eq!(value["question_type"], "Find Target Offsets(Tool)");
        assert_eq!(value["knowledge_type"], "knowledge_free");
        assert_eq!(value["history_type"], "Concise-Response");
        assert_eq!(value["metric"], "accuracy");
        assert_eq!(value["score"], 0.5);
        assert_eq!(value["correct"], 1.5);
        assert_eq!(value["total"], 3);
        assert_eq!(value["skipped"], 1);
    }

    #[test]
    fn test_f1_report_omits_totals() {
        let eval = evaluation(QuestionArchetype::Intersection, HistoryVariant::Verbose, MetricKind::F1);
        let value = serde_json::to_value(MetricReport::from_evaluation(&eval)).unwrap();
        assert_eq!(value["metric"], "f1");
        assert!(value.get("correct").is_none());
        assert!(value.get("total").is_none());
        assert_eq!(value["matched"], 4);
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/metrics.json");
        let eval = evaluation(QuestionArchetype::CountFrequencyEnv, HistoryVariant::Verbose, MetricKind::Accuracy);
        MetricReport::from_evaluation(&eval).write_to_file(&path).unwrap();

        let back: MetricReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.question_type, "Count Frequency(Env)");
        assert_eq!(back.total, Some(3));
    }
}
