use std::fmt::Write;

use crate::classifier::ClassifyContext;
use crate::llm_client::prompts::{BATCH_INDEX_INSTRUCTION, GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};

const TRUTHFULNESS_TASK: &str = "\
    Task: decide, for each sentence, whether it is fully supported by the truth statements. \
    Approve only when the supporting statements state the same facts and figures. \
    Anything unsupported, exaggerated or unclear is rejected.";

const TONE_TASK: &str = "\
    Task: assign each sentence exactly one tone label from the list below. \
    Use the label text verbatim in `detail`. Never invent labels.";

const SKILL_TASK: &str = "\
    Task: list the job skills from the taxonomy below that each sentence demonstrates. \
    Put the matching taxonomy entries, verbatim and comma-separated, in `detail`. \
    If none apply, set `detail` to \"none\".";

const RESPONSE_SHAPE: &str = r#"Respond with:
{"results": [{"index": <int>, "status": "<string>", "detail": "<string>", "confidence": <0.0-1.0>, "evidence": [<int>, ...]}]}"#;

/// System and user prompt for one classification request.
#[derive(Debug, Clone)]
pub struct ClassifyPrompt {
    pub system: String,
    pub user: String,
}

fn numbered_sentences(batch: &[String]) -> String {
    let mut out = String::new();
    for (i, sentence) in batch.iter().enumerate() {
        let _ = writeln!(out, "[{i}] {sentence}");
    }
    out
}

pub fn build_prompt(batch: &[String], context: &ClassifyContext) -> ClassifyPrompt {
    let (task, context_block, status_rule) = match context {
        ClassifyContext::Truthfulness { truths } => {
            let mut block = String::from("Truth statements:\n");
            for (i, truth) in truths.iter().enumerate() {
                let _ = writeln!(
                    block,
                    "[{i}] ({}) {}",
                    truth.source_entity_tag, truth.statement_text
                );
            }
            (
                format!("{TRUTHFULNESS_TASK}\n{GROUNDING_INSTRUCTION}"),
                block,
                "`status` is \"approved\" or \"rejected\"; `evidence` lists truth numbers.",
            )
        }
        ClassifyContext::Tone { labels } => {
            let mut block = String::from("Tone labels:\n");
            for guide in labels {
                let _ = writeln!(block, "- {}: {}", guide.label, guide.description);
            }
            (
                TONE_TASK.to_string(),
                block,
                "`status` is \"completed\"; `evidence` is empty.",
            )
        }
        ClassifyContext::Skill { taxonomy } => (
            SKILL_TASK.to_string(),
            format!("Skill taxonomy:\n{}\n", taxonomy.join("\n")),
            "`status` is \"completed\"; `evidence` is empty.",
        ),
    };

    ClassifyPrompt {
        system: format!("{JSON_ONLY_SYSTEM}\n{BATCH_INDEX_INSTRUCTION}"),
        user: format!(
            "{task}\n\n{context_block}\nSentences:\n{}\n{status_rule}\n{RESPONSE_SHAPE}",
            numbered_sentences(batch)
        ),
    }
}
