//! Archetype dispatch table
//!
//! Each archetype owns one row. A row either names a single rule or, for
//! archetypes whose answer depends on how much history the model saw, one
//! rule per history variant.

use serde_json::Value;

use super::extract::{
    parse_boolean, parse_final_guess, parse_integer, parse_intersection_list, parse_pair_list,
    ExtractedValue,
};
use super::metrics::MetricKind;
use super::scoring::{
    score_boolean, score_integer, score_name, score_pair, score_set, NameNormalizer, Verdict,
};
use crate::dataset::{AnswerShape, HistoryVariant, QuestionArchetype};

pub type ParseFn = fn(&str) -> Option<ExtractedValue>;
pub type ScoreFn = fn(&NameNormalizer, &Value, Option<&Value>) -> Verdict;

/// How one archetype's answers are read and judged
#[derive(Debug, Clone, Copy)]
pub struct AnswerRule {
    pub shape: AnswerShape,
    pub parse: ParseFn,
    pub score: ScoreFn,
    pub metric: MetricKind,
    /// Older prediction files stored the value under this field
    pub legacy_field: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
enum RuleSelector {
    Fixed(AnswerRule),
    ByHistory {
        concise: AnswerRule,
        verbose: AnswerRule,
    },
}

#[derive(Debug, Clone, Copy)]
struct RuleRow {
    archetype: QuestionArchetype,
    selector: RuleSelector,
}

const INTEGER_RULE: AnswerRule = AnswerRule {
    shape: AnswerShape::Integer,
    parse: parse_integer,
    score: score_integer,
    metric: MetricKind::Accuracy,
    legacy_field: None,
};

const BOOLEAN_RULE: AnswerRule = AnswerRule {
    shape: AnswerShape::Boolean,
    parse: parse_boolean,
    score: score_boolean,
    metric: MetricKind::Accuracy,
    legacy_field: None,
};

const PAIR_RULE: AnswerRule = AnswerRule {
    shape: AnswerShape::OrderedPair,
    parse: parse_pair_list,
    score: score_pair,
    metric: MetricKind::Accuracy,
    legacy_field: None,
};

const SET_RULE: AnswerRule = AnswerRule {
    shape: AnswerShape::UnorderedSet,
    parse: parse_intersection_list,
    score: score_set,
    metric: MetricKind::F1,
    legacy_field: Some("pred_intersection"),
};

const NAME_RULE: AnswerRule = AnswerRule {
    shape: AnswerShape::BareString,
    parse: parse_final_guess,
    score: score_name,
    metric: MetricKind::Accuracy,
    legacy_field: None,
};

const fn fixed(archetype: QuestionArchetype, rule: AnswerRule) -> RuleRow {
    RuleRow {
        archetype,
        selector: RuleSelector::Fixed(rule),
    }
}

/// Rows are in declaration order of [`QuestionArchetype`]
static RULES: [RuleRow; 8] = [
    fixed(QuestionArchetype::CountFrequencyTool, INTEGER_RULE),
    fixed(QuestionArchetype::FindDuplicatesTool, BOOLEAN_RULE),
    fixed(QuestionArchetype::FindTargetOffsetsTool, PAIR_RULE),
    fixed(QuestionArchetype::CountCorrectnessEnv, INTEGER_RULE),
    fixed(QuestionArchetype::CountFrequencyEnv, INTEGER_RULE),
    fixed(QuestionArchetype::FindRoundLargestValueEnv, INTEGER_RULE),
    fixed(QuestionArchetype::WeightedSummationEnv, INTEGER_RULE),
    RuleRow {
        archetype: QuestionArchetype::Intersection,
        selector: RuleSelector::ByHistory {
            concise: NAME_RULE,
            verbose: SET_RULE,
        },
    },
];

/// Rule for an archetype under a history variant
pub fn lookup(archetype: QuestionArchetype, history: HistoryVariant) -> AnswerRule {
    let row = &RULES[archetype as usize];
    debug_assert_eq!(row.archetype, archetype);
    match row.selector {
        RuleSelector::Fixed(rule) => rule,
        RuleSelector::ByHistory { concise, verbose } => match history {
            HistoryVariant::Concise => concise,
            HistoryVariant::Verbose => verbose,
        },
    }
}
