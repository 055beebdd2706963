//! Property-based tests for extraction and scoring using proptest

use agentlong_eval::analysis::scoring::{score_pair, score_set, NameNormalizer};
use agentlong_eval::analysis::{AnswerExtractor, ExtractedValue, Verdict};
use agentlong_eval::dataset::{HistoryVariant, KnowledgeVariant, QuestionArchetype};
use proptest::prelude::*;
use serde_json::{json, Value};

// =========================================================================
// Helpers
// =========================================================================

/// `1234567` -> `1,234,567`
fn with_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn extract(archetype: QuestionArchetype, history: HistoryVariant, raw: &str) -> Option<ExtractedValue> {
    AnswerExtractor::default().extract(archetype, history, raw).0
}

fn entity_name() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{2,8}".prop_filter("conjunction", |s| !s.eq_ignore_ascii_case("and"))
}

fn normalizer() -> NameNormalizer {
    NameNormalizer::for_knowledge(KnowledgeVariant::KnowledgeIntensive)
}

// =========================================================================
// Property: integers survive formatting noise
// =========================================================================

proptest! {
    #[test]
    fn prop_integer_plain(n in -1_000_000_000i64..1_000_000_000i64) {
        let raw = format!("Let me think. <answer>{}</answer>", n);
        prop_assert_eq!(
            extract(QuestionArchetype::CountFrequencyEnv, HistoryVariant::Concise, &raw),
            Some(ExtractedValue::Integer(n))
        );
    }

    #[test]
    fn prop_integer_thousands_separators(n in -1_000_000_000i64..1_000_000_000i64) {
        let raw = format!("<answer>The total is {}</answer>", with_thousands(n));
        prop_assert_eq!(
            extract(QuestionArchetype::WeightedSummationEnv, HistoryVariant::Verbose, &raw),
            Some(ExtractedValue::Integer(n))
        );
    }

    #[test]
    fn prop_integer_fraction_truncates(n in -100_000i64..100_000i64, frac in 1u32..1000) {
        let raw = format!("<answer>{}.{}</answer>", n, frac);
        prop_assert_eq!(
            extract(QuestionArchetype::CountCorrectnessEnv, HistoryVariant::Concise, &raw),
            Some(ExtractedValue::Integer(n))
        );
    }

    #[test]
    fn prop_last_span_wins(first in 0i64..1000, second in 0i64..1000) {
        let raw = format!("<answer>{}</answer> hmm, recount: <answer>{}</answer>", first, second);
        prop_assert_eq!(
            extract(QuestionArchetype::CountFrequencyTool, HistoryVariant::Concise, &raw),
            Some(ExtractedValue::Integer(second))
        );
    }

    #[test]
    fn prop_untagged_text_never_parses(text in "[a-zA-Z0-9 ,.]{0,60}") {
        for archetype in QuestionArchetype::all() {
            prop_assert_eq!(extract(archetype, HistoryVariant::Verbose, &text), None);
        }
    }
}

// =========================================================================
// Property: pair scoring
// =========================================================================

proptest! {
    #[test]
    fn prop_pair_self_score(a in entity_name(), b in entity_name()) {
        let gt = json!([a.clone(), b.clone()]);
        let raw = format!("<answer>{} and {}</answer>", a, b);
        let pred = extract(QuestionArchetype::FindTargetOffsetsTool, HistoryVariant::Concise, &raw)
            .map(|v| v.to_json());
        prop_assert_eq!(score_pair(&normalizer(), &gt, pred.as_ref()), Verdict::Scored(1.0));
    }

    #[test]
    fn prop_pair_first_only_is_half(a in entity_name(), b in entity_name()) {
        let gt = json!([a.clone(), b]);
        let pred = json!([a.to_uppercase()]);
        prop_assert_eq!(score_pair(&normalizer(), &gt, Some(&pred)), Verdict::Scored(0.5));
    }
}

// =========================================================================
// Property: set F1
// =========================================================================

fn names_and_shuffle() -> impl Strategy<Value = (Vec<String>, Vec<String>)> {
    prop::collection::vec("[a-z]{1,6}", 0..8)
        .prop_flat_map(|names| (Just(names.clone()), Just(names).prop_shuffle()))
}

proptest! {
    #[test]
    fn prop_f1_ignores_order(
        (gt, gt_shuffled) in names_and_shuffle(),
        (pred, pred_shuffled) in names_and_shuffle(),
    ) {
        let n = normalizer();
        let base = score_set(&n, &json!(gt), Some(&json!(pred)));
        prop_assert_eq!(score_set(&n, &json!(gt_shuffled), Some(&json!(pred_shuffled))), base);
    }

    #[test]
    fn prop_f1_in_unit_range(
        gt in prop::collection::vec("[a-d]", 0..6),
        pred in prop::collection::vec("[a-d]", 0..6),
    ) {
        let verdict = score_set(&normalizer(), &json!(gt), Some(&json!(pred)));
        let score = verdict.score().unwrap();
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn prop_f1_self_is_one(names in prop::collection::vec("[a-z]{1,6}", 0..8)) {
        let value: Value = json!(names);
        prop_assert_eq!(score_set(&normalizer(), &value, Some(&value)), Verdict::Scored(1.0));
    }
}

#[test]
fn test_with_thousands_helper() {
    assert_eq!(with_thousands(0), "0");
    assert_eq!(with_thousands(999), "999");
    assert_eq!(with_thousands(1000), "1,000");
    assert_eq!(with_thousands(-1234567), "-1,234,567");
}
