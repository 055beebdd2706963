//! Per-sample score records and run-level aggregation

use serde::{Deserialize, Serialize};

/// Run-level metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Mean per-sample score on a 0..1 scale
    Accuracy,
    /// Mean per-sample set F1
    F1,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::F1 => "f1",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score of one matched sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: String,
    pub score: f64,
    pub metric: MetricKind,
}

/// Counters and running sum for one evaluation run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTally {
    /// Prediction records considered
    pub predictions: usize,
    /// Records whose key names a known sample
    pub matched: usize,
    /// Records with no key or an unknown key
    pub unmatched: usize,
    /// Matched samples left out because their ground truth is malformed
    pub ground_truth_skipped: usize,
    /// Samples in the denominator
    pub scored: usize,
    /// Sum of per-sample scores
    pub sum: f64,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a prediction record and whether it matched a sample
    pub fn observe_prediction(&mut self, matched: bool) {
        self.predictions += 1;
        if matched {
            self.matched += 1;
        } else {
            self.unmatched += 1;
        }
    }

    pub fn record(&mut self, score: &ScoreRecord) {
        self.scored += 1;
        self.sum += score.score;
    }

    pub fn skip_ground_truth(&mut self) {
        self.ground_truth_skipped += 1;
    }

    /// Mean over scored samples; 0.0 when nothing was scored
    pub fn mean(&self) -> f64 {
        if self.scored == 0 {
            0.0
        } else {
            self.sum / self.scored as f64
        }
    }

    /// Fold another tally into this one
    pub fn merge(&mut self, other: &RunTally) {
        self.predictions += other.predictions;
        self.matched += other.matched;
        self.unmatched += other.unmatched;
        self.ground_truth_skipped += other.ground_truth_skipped;
        self.scored += other.scored;
        self.sum += other.sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(score: f64) -> ScoreRecord {
        ScoreRecord {
            id: "s".to_string(),
            score,
            metric: MetricKind::Accuracy,
        }
    }

    #[test]
    fn test_empty_tally_mean_is_zero() {
        assert_eq!(RunTally::new().mean(), 0.0);
    }

    #[test]
    fn test_skips_stay_out_of_denominator() {
        let mut tally = RunTally::new();
        for _ in 0..3 {
            tally.observe_prediction(true);
        }
        tally.observe_prediction(false);
        tally.record(&record(1.0));
        tally.record(&record(0.5));
        tally.skip_ground_truth();

        assert_eq!(tally.predictions, 4);
        assert_eq!(tally.matched, 3);
        assert_eq!(tally.unmatched, 1);
        assert_eq!(tally.ground_truth_skipped, 1);
        assert_eq!(tally.scored, 2);
        assert_eq!(tally.mean(), 0.75);
    }

    #[test]
    fn test_merge() {
        let mut a = RunTally::new();
        a.observe_prediction(true);
        a.record(&record(1.0));
        let mut b = RunTally::new();
        b.observe_prediction(true);
        b.record(&record(0.0));
        b.observe_prediction(false);

        a.merge(&b);
        assert_eq!(a.predictions, 3);
        assert_eq!(a.scored, 2);
        assert_eq!(a.mean(), 0.5);
    }

    #[test]
    fn test_metric_kind_serde() {
        assert_eq!(serde_json::to_string(&MetricKind::F1).unwrap(), "\"f1\"");
        assert_eq!(
            serde_json::from_str::<MetricKind>("\"accuracy\"").unwrap(),
            MetricKind::Accuracy
        );
    }
}
