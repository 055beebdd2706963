//! System prompts and message assembly

use super::labels::{DatasetContext, HistoryVariant, KnowledgeVariant, QuestionArchetype};
use super::Sample;
use crate::providers::Message;

/// Build the full conversation sent to the model: the archetype's system
/// prompt, the transcript without its own system messages, then the question.
pub fn build_messages(
    archetype: QuestionArchetype,
    context: DatasetContext,
    sample: &Sample,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt(archetype, context))];
    messages.extend(sample.transcript().iter().filter(|m| !m.is_system()).cloned());
    let question = sample
        .question
        .clone()
        .map(serde_json::Value::String)
        .unwrap_or(serde_json::Value::Null);
    messages.push(Message::user_value(question));
    messages
}

/// System prompt for an archetype in a given context
pub fn system_prompt(archetype: QuestionArchetype, context: DatasetContext) -> String {
    let vocab = Vocabulary::for_knowledge(context.knowledge);
    use QuestionArchetype::*;

    match (archetype, context.history) {
        (CountFrequencyTool | CountCorrectnessEnv, _) => {
            let mut prompt = format!(
                "You are analyzing a {}. Full conversation history (including tool results and feedback) is provided. \
                 Answer the question based on the tool return values or environment feedback. ",
                vocab.dialogue
            );
            match context.knowledge {
                KnowledgeVariant::KnowledgeIntensive => prompt.push_str(
                    "Wrap your answer in <answer></answer>.\
                     If the answer is a number, answer in arabic numerals (e.g., 3 not three).",
                ),
                KnowledgeVariant::KnowledgeFree => {
                    prompt.push_str("Wrap your final answer in <answer></answer>.")
                }
            }
            prompt
        }
        (CountFrequencyEnv, _) => format!(
            "You are analyzing a {}. Full conversation history with feedback is provided.\n\
             Answer the question by counting occurrences of a property value across all rounds' feedback.\n\
             Wrap your final answer (a number) in <answer></answer>.",
            vocab.dialogue
        ),
        (FindRoundLargestValueEnv, _) => format!(
            "You are analyzing a {}. Full conversation history with feedback is provided.\n\
             Answer the question by identifying which round has the highest {}.\n\
             Wrap your final answer (round number) in <answer></answer>.",
            vocab.dialogue, vocab.largest_value
        ),
        (WeightedSummationEnv, _) => weighted_summation_prompt(&vocab),
        (FindDuplicatesTool, _) => format!(
            "You are analyzing a {}. Full conversation history is provided.\n\
             Answer the question with yes/no or true/false based on whether {} appears in both tool results.\n\
             Wrap your final answer in <answer></answer>.",
            vocab.dialogue, vocab.an_entity
        ),
        (FindTargetOffsetsTool, _) => format!(
            "You are analyzing a {}. Full conversation history is provided.\n\
             Answer the question by identifying the two {} in order.\n\
             Format your answer as: <answer>{} and {}</answer>",
            vocab.dialogue, vocab.entities, vocab.pair_example.0, vocab.pair_example.1
        ),
        (Intersection, HistoryVariant::Verbose) => format!(
            "You are reviewing a {}. Full history messages (including tool results) are provided; \
             infer the intersection list for the target round's tool call. \
             Each round is defined as: user guess -> optional tool call -> feedback. \
             The first round has no tool call; the first tool call appears after the user's second guess (called round 2), and so on. \
             Return only the intersection as a comma-separated list or JSON array. Do not call any tools. \
             Wrap the final list in <answer></answer>.",
            vocab.dialogue
        ),
        (Intersection, HistoryVariant::Concise) => match context.knowledge {
            KnowledgeVariant::KnowledgeIntensive => "You are an expert analyst for a deductive reasoning game. \
                 The full conversation history with system feedback is provided.\n\
                 Your task is to analyze the logical progression and constraints revealed throughout the dialogue \
                 to deduce the hidden target Pokemon.\n\
                 The correct answer must be logically consistent with the entire history of feedback.\n\
                 Return only the Pokemon name. Do not call any tools. Wrap your final answer in <answer></answer>."
                .to_string(),
            KnowledgeVariant::KnowledgeFree => "You are an expert analyst for a deductive reasoning game with masked ids. \
                 The full conversation history with system feedback is provided.\n\
                 Analyze the constraints to deduce the hidden target id (the intersection-consistent answer).\n\
                 Return only the masked id. Do not call any tools. Wrap your final answer in <answer></answer>."
                .to_string(),
        },
    }
}

fn weighted_summation_prompt(vocab: &Vocabulary) -> String {
    let [a, b, c, d, e, f] = vocab.weighted_fields;
    format!(
        "You are analyzing a {dialogue}. Full conversation history with feedback is provided.\n\
         Calculate the weighted scores for two rounds using this weighted rule:\n\
         - {a}: 6 points per correct item\n\
         - {b}: 5 points per correct item\n\
         - {c}: 4 points per correct item\n\
         - {d}: 3 points per correct item\n\
         - {e}: 2 points per correct item\n\
         - {f}: 1 point per correct item\n\
         Example: If a round has {a} correct (6) + 2 {b_plural} correct (5+5) + 1 {d} correct (3), score = 6+5+5+3 = 19.\n\
         Then compute the absolute difference between the two rounds' scores.\n\
         Wrap your final answer (difference value) in <answer></answer>.",
        dialogue = vocab.dialogue,
        b_plural = vocab.weighted_plural,
    )
}

/// Wording that differs between real-name and masked-id transcripts
struct Vocabulary {
    dialogue: &'static str,
    entities: &'static str,
    an_entity: &'static str,
    pair_example: (&'static str, &'static str),
    largest_value: &'static str,
    weighted_fields: [&'static str; 6],
    weighted_plural: &'static str,
}

impl Vocabulary {
    fn for_knowledge(knowledge: KnowledgeVariant) -> Self {
        match knowledge {
            KnowledgeVariant::KnowledgeIntensive => Self {
                dialogue: "guess-the-Pokemon dialogue",
                entities: "Pokemon names",
                an_entity: "a Pokemon",
                pair_example: ("Pokemon1", "Pokemon2"),
                largest_value: "total base stats",
                weighted_fields: [
                    "Type",
                    "Ability",
                    "Base Stats",
                    "Evolution",
                    "Generation",
                    "Other sections",
                ],
                weighted_plural: "Abilities",
            },
            KnowledgeVariant::KnowledgeFree => Self {
                dialogue: "masked guess-the-entity dialogue",
                entities: "entity ids",
                an_entity: "an entity id",
                pair_example: ("id1", "id2"),
                largest_value: "attr_2 total (numeric field)",
                weighted_fields: ["attr_1", "attr_4", "attr_2", "attr_5", "attr_3", "attr_6"],
                weighted_plural: "attr_4 items",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(knowledge: KnowledgeVariant, history: HistoryVariant) -> DatasetContext {
        DatasetContext::new(knowledge, history)
    }

    #[test]
    fn test_every_prompt_asks_for_answer_tag() {
        for archetype in QuestionArchetype::all() {
            for knowledge in [KnowledgeVariant::KnowledgeIntensive, KnowledgeVariant::KnowledgeFree] {
                for history in [HistoryVariant::Concise, HistoryVariant::Verbose] {
                    let prompt = system_prompt(archetype, ctx(knowledge, history));
                    assert!(prompt.contains("<answer>"), "{archetype} {knowledge:?} {history:?}");
                }
            }
        }
    }

    #[test]
    fn test_masked_prompts_hide_domain() {
        let prompt = system_prompt(
            QuestionArchetype::WeightedSummationEnv,
            ctx(KnowledgeVariant::KnowledgeFree, HistoryVariant::Verbose),
        );
        assert!(prompt.contains("attr_1: 6 points"));
        assert!(!prompt.contains("Pokemon"));
    }

    #[test]
    fn test_build_messages_drops_transcript_system() {
        let sample: Sample = serde_json::from_value(json!({
            "id": "1",
            "question": "How many rounds?",
            "messages": [
                {"role": "system", "content": "game rules"},
                {"role": "user", "content": "Is it Pikachu?"},
                {"role": "assistant", "content": "No."}
            ],
            "answer": 2
        }))
        .unwrap();

        let messages = build_messages(
            QuestionArchetype::CountCorrectnessEnv,
            ctx(KnowledgeVariant::KnowledgeIntensive, HistoryVariant::Concise),
            &sample,
        );
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_ne!(messages[0].text(), Some("game rules"));
        assert_eq!(messages[1].text(), Some("Is it Pikachu?"));
        assert_eq!(messages[3].text(), Some("How many rounds?"));
    }
}
