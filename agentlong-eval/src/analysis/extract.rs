//! Answer extraction from raw model output
//!
//! The model wraps its final answer in `<answer>...</answer>`. Only the last
//! tagged span counts; text outside any span is never scanned. Inside the
//! span the parsers are lenient about formatting: bracketed lists, prose with
//! "and", numbered lists, thousands separators.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rules;
use crate::dataset::{AnswerShape, HistoryVariant, QuestionArchetype};

/// Tag name used when none is configured
pub const DEFAULT_ANSWER_TAG: &str = "answer";

static DEFAULT_TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| tag_pattern(DEFAULT_ANSWER_TAG).expect("default tag pattern"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?[0-9][0-9,]*(?:\.[0-9]+)?").expect("static pattern"));

static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:no|false|not|doesn't|does not|none|neither)\b").expect("static pattern")
});

static AFFIRMATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:yes|true|contain|contains|appear|appears|does|both)\b")
        .expect("static pattern")
});

static AND_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\band\b").expect("static pattern"));

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\n;|]").expect("static pattern"));

static ORDINAL_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(?:[.)]\s*|\s+)").expect("static pattern"));

fn tag_pattern(tag: &str) -> Result<Regex, regex::Error> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>"))
}

/// A typed answer. Serializes to the plain JSON shape stored in
/// prediction records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedValue {
    Integer(i64),
    Boolean(bool),
    List(Vec<String>),
    Text(String),
}

impl ExtractedValue {
    pub fn to_json(&self) -> Value {
        match self {
            ExtractedValue::Integer(n) => Value::from(*n),
            ExtractedValue::Boolean(b) => Value::Bool(*b),
            ExtractedValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            ExtractedValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Isolates the tagged answer span and parses it by shape
#[derive(Debug, Clone)]
pub struct AnswerExtractor {
    tag: Regex,
}

impl Default for AnswerExtractor {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG_PATTERN.clone(),
        }
    }
}

impl AnswerExtractor {
    /// Use `<tag>...</tag>` as the answer delimiters
    pub fn with_tag(tag: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            tag: tag_pattern(tag)?,
        })
    }

    /// Content of the last tagged span, trimmed. `None` when the text has no
    /// complete span.
    pub fn isolate<'a>(&self, raw: &'a str) -> Option<&'a str> {
        self.tag
            .captures_iter(raw)
            .last()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
    }

    /// Interpret a raw response for the given archetype and history variant.
    /// Never fails: an untagged or unparseable response gives `None`.
    pub fn extract(
        &self,
        archetype: QuestionArchetype,
        history: HistoryVariant,
        raw: &str,
    ) -> (Option<ExtractedValue>, AnswerShape) {
        let rule = rules::lookup(archetype, history);
        let value = self.isolate(raw).and_then(rule.parse);
        (value, rule.shape)
    }
}

/// Last numeric token of `text`, fraction truncated toward zero
pub fn parse_number(text: &str) -> Option<i64> {
    let tokens: Vec<&str> = NUMBER.find_iter(text).map(|m| m.as_str()).collect();
    tokens.into_iter().rev().find_map(token_to_int)
}

/// First numeric token of `text`, fraction truncated toward zero
pub fn parse_first_number(text: &str) -> Option<i64> {
    NUMBER.find_iter(text).find_map(|m| token_to_int(m.as_str()))
}

fn token_to_int(token: &str) -> Option<i64> {
    let digits = token.replace(',', "");
    let whole = digits.split('.').next().unwrap_or(&digits);
    whole.parse::<i64>().ok()
}

pub fn parse_integer(span: &str) -> Option<ExtractedValue> {
    parse_number(span).map(ExtractedValue::Integer)
}

/// Negation wins over affirmation; a bare number means `n > 0`.
pub fn parse_boolean(span: &str) -> Option<ExtractedValue> {
    let lower = span.to_lowercase();
    if NEGATION.is_match(&lower) {
        return Some(ExtractedValue::Boolean(false));
    }
    if AFFIRMATION.is_match(&lower) {
        return Some(ExtractedValue::Boolean(true));
    }
    parse_number(span).map(|n| ExtractedValue::Boolean(n > 0))
}

/// Ordered names. A literal list needs at least two non-empty elements;
/// otherwise the prose form is split on commas, "and", `;`, `|` and
/// newlines, with numbering like `1.` removed.
pub fn parse_pair_list(span: &str) -> Option<ExtractedValue> {
    if let Some(items) = parse_literal_list(span) {
        let cleaned = clean_items(items);
        if cleaned.len() >= 2 {
            return Some(ExtractedValue::List(cleaned));
        }
    }

    let fragments: Vec<String> = split_fragments(span)
        .into_iter()
        .map(|chunk| ORDINAL_PREFIX.replace(&chunk, "").trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if fragments.is_empty() {
        None
    } else {
        Some(ExtractedValue::List(fragments))
    }
}

/// Unordered names. An empty span is a valid "nothing in common" answer.
pub fn parse_intersection_list(span: &str) -> Option<ExtractedValue> {
    if span.is_empty() {
        return Some(ExtractedValue::List(Vec::new()));
    }
    if let Some(items) = parse_literal_list(span) {
        return Some(ExtractedValue::List(clean_items(items)));
    }

    let items = split_fragments(span)
        .into_iter()
        .filter(|item| !item.is_empty())
        .collect();
    Some(ExtractedValue::List(items))
}

pub fn parse_final_guess(span: &str) -> Option<ExtractedValue> {
    let guess = span.trim();
    if guess.is_empty() {
        None
    } else {
        Some(ExtractedValue::Text(guess.to_string()))
    }
}

fn clean_items(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn split_fragments(text: &str) -> Vec<String> {
    let normalized = AND_WORD.replace_all(text, ",");
    let normalized = SEPARATORS.replace_all(&normalized, ",");
    normalized.split(',').map(|chunk| chunk.trim().to_string()).collect()
}

/// Parse a bracketed list literal: JSON, or a Python-style list with
/// single-quoted strings and `True`/`False`/`None`. Nested containers and
/// bare words are rejected.
pub fn parse_literal_list(text: &str) -> Option<Vec<String>> {
    let text = text.trim();
    if !(text.starts_with('[') && text.ends_with(']')) {
        return None;
    }

    if let Ok(values) = serde_json::from_str::<Vec<Value>>(text) {
        return values.iter().map(json_literal_text).collect();
    }

    parse_python_list(&text[1..text.len() - 1])
}

fn json_literal_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        Value::Null => Some("None".to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_python_list(body: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let item = if first == '\'' || first == '"' {
            chars.next();
            let mut out = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next()? {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        other => out.push(other),
                    },
                    c if c == first => {
                        closed = true;
                        break;
                    }
                    c => out.push(c),
                }
            }
            if !closed {
                return None;
            }
            out
        } else {
            let mut token = String::new();
            while let Some(c) = chars.next_if(|&c| c != ',') {
                token.push(c);
            }
            let token = token.trim().to_string();
            let is_literal = matches!(token.as_str(), "True" | "False" | "None")
                || token.parse::<f64>().is_ok();
            if !is_literal {
                return None;
            }
            token
        };
        items.push(item);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }

    Some(items)
}
