// Shared prompt constants.
// Stage-specific prompts live in classifier/prompts.rs; this file holds the
// cross-cutting fragments every classification request carries.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Every batch response must echo item indices so verdicts can be realigned.
pub const BATCH_INDEX_INSTRUCTION: &str = "\
    You will receive a numbered list of sentences. Return exactly one result per sentence, \
    in any order, each carrying the sentence's `index` from the list. \
    Never merge, skip, or invent indices.";

/// Grounding rule for the truthfulness stage.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: A sentence is supported only if one or more of the numbered truth statements \
    directly state the same facts, figures and entity. Do NOT infer, interpolate, or give \
    credit for plausibility. If no statement supports the sentence, reject it. \
    Cite every supporting statement by its number in `evidence`.";
