//! Per-shape comparison of predictions against ground truth
//!
//! Both sides go through the same normalization before comparing. A ground
//! truth that cannot be normalized yields [`Verdict::MalformedGroundTruth`],
//! which keeps the sample out of the denominator. A missing or unparseable
//! prediction is a miss and scores 0.0.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::extract::parse_first_number;
use super::rules;
use crate::dataset::{HistoryVariant, KnowledgeVariant, QuestionArchetype};

static PAIR_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[,;]|\s+and\s+").expect("static pattern"));

const PAIR_WRAPPERS: &[char] = &['[', ']', '(', ')', '{', '}'];

/// Outcome of comparing one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Score in `[0, 1]`
    Scored(f64),
    /// The dataset's answer has the wrong shape; the sample is not counted
    MalformedGroundTruth,
}

impl Verdict {
    pub fn score(&self) -> Option<f64> {
        match self {
            Verdict::Scored(score) => Some(*score),
            Verdict::MalformedGroundTruth => None,
        }
    }

    fn hit(hit: bool) -> Self {
        Verdict::Scored(if hit { 1.0 } else { 0.0 })
    }
}

/// Case- and punctuation-insensitive form of an entity name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameNormalizer {
    strip_underscore: bool,
}

impl NameNormalizer {
    /// Masked ids (`entity_12`) also drop underscores
    pub fn for_knowledge(knowledge: KnowledgeVariant) -> Self {
        Self {
            strip_underscore: knowledge == KnowledgeVariant::KnowledgeFree,
        }
    }

    pub fn normalize(&self, name: &str) -> String {
        name.trim()
            .to_lowercase()
            .chars()
            .filter(|&c| !self.is_stripped(c))
            .collect()
    }

    fn is_stripped(&self, c: char) -> bool {
        c.is_whitespace()
            || matches!(c, '-' | '\'' | '"' | '.' | '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}')
            || (self.strip_underscore && c == '_')
    }
}

/// Score one sample under the rule for its archetype and history variant
pub fn score(
    archetype: QuestionArchetype,
    history: HistoryVariant,
    normalizer: &NameNormalizer,
    ground_truth: &Value,
    prediction: Option<&Value>,
) -> Verdict {
    let rule = rules::lookup(archetype, history);
    (rule.score)(normalizer, ground_truth, prediction)
}

pub fn score_integer(_: &NameNormalizer, ground_truth: &Value, prediction: Option<&Value>) -> Verdict {
    let Some(expected) = to_number(ground_truth) else {
        return Verdict::MalformedGroundTruth;
    };
    let predicted = prediction.and_then(to_number);
    Verdict::hit(predicted == Some(expected))
}

pub fn score_boolean(_: &NameNormalizer, ground_truth: &Value, prediction: Option<&Value>) -> Verdict {
    let Some(expected) = to_boolean(ground_truth) else {
        return Verdict::MalformedGroundTruth;
    };
    let predicted = prediction.and_then(to_boolean);
    Verdict::hit(predicted == Some(expected))
}

pub fn score_pair(
    normalizer: &NameNormalizer,
    ground_truth: &Value,
    prediction: Option<&Value>,
) -> Verdict {
    if is_blank_pair(ground_truth) {
        return Verdict::Scored(0.0);
    }
    let Some(expected) = to_pair_list(ground_truth, normalizer) else {
        return Verdict::MalformedGroundTruth;
    };
    let score = prediction
        .and_then(|p| to_pair_list(p, normalizer))
        .map(|predicted| compare_pairs(&predicted, &expected))
        .unwrap_or(0.0);
    Verdict::Scored(score)
}

/// Set F1 over raw trimmed tokens. The name normalizer is deliberately not
/// applied here; membership is exact after trimming.
pub fn score_set(_: &NameNormalizer, ground_truth: &Value, prediction: Option<&Value>) -> Verdict {
    let Some(prediction) = prediction else {
        return Verdict::Scored(0.0);
    };
    let expected = to_token_set(ground_truth);
    let predicted = to_token_set(prediction);
    Verdict::Scored(set_f1(&predicted, &expected))
}

pub fn score_name(normalizer: &NameNormalizer, ground_truth: &Value, prediction: Option<&Value>) -> Verdict {
    let expected = normalizer.normalize(&text_of(ground_truth));
    if expected.is_empty() {
        return Verdict::MalformedGroundTruth;
    }
    let predicted = prediction
        .map(|p| normalizer.normalize(&text_of(p)))
        .unwrap_or_default();
    Verdict::hit(predicted == expected)
}

/// Integer form of a stored value. Strings use their first numeric token.
pub fn to_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => parse_first_number(s),
        _ => None,
    }
}

/// Boolean form of a stored value. Numbers are true when positive; strings
/// are read by keyword.
pub fn to_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f > 0.0),
        Value::String(s) => {
            let text = s.trim().to_lowercase();
            if ["yes", "true", "1"].iter().any(|w| text.contains(w)) {
                Some(true)
            } else if ["no", "false", "0"].iter().any(|w| text.contains(w)) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Null, or a string with nothing but brackets and whitespace
fn is_blank_pair(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s
            .trim()
            .trim_matches(PAIR_WRAPPERS)
            .trim()
            .is_empty(),
        _ => false,
    }
}

/// Ordered, normalized names. A string needs at least two parts.
pub fn to_pair_list(value: &Value, normalizer: &NameNormalizer) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|name| normalizer.normalize(name))
                .collect(),
        ),
        Value::String(s) => {
            let text = s.trim_matches(PAIR_WRAPPERS);
            let parts: Vec<&str> = PAIR_SEPARATOR.split(text).collect();
            if parts.len() >= 2 {
                Some(parts.iter().map(|p| normalizer.normalize(p)).collect())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Full credit for both positions; half credit when a single predicted name
/// matches the first target.
pub fn compare_pairs(predicted: &[String], expected: &[String]) -> f64 {
    match (predicted, expected) {
        ([], _) | (_, []) => 0.0,
        ([p0, p1], [e0, e1]) if p0 == e0 && p1 == e1 => 1.0,
        ([p0], [e0, _]) if p0 == e0 => 0.5,
        _ => 0.0,
    }
}

/// Tokens of a stored set. Lists keep their trimmed elements; free text is
/// split on commas, newlines and whitespace.
pub fn to_token_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| text_of(item).trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        Value::String(s) => s
            .replace('\n', ",")
            .split(',')
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// F1 of two sets; two empty sets agree perfectly
pub fn set_f1(predicted: &BTreeSet<String>, expected: &BTreeSet<String>) -> f64 {
    match (predicted.is_empty(), expected.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let overlap = predicted.intersection(expected).count() as f64;
    let precision = overlap / predicted.len() as f64;
    let recall = overlap / expected.len() as f64;
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}
