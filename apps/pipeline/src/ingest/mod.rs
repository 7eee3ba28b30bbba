//! Sentence ingestion: seed input to validated, deduplicated `CandidateSentence` rows.
//!
//! Two seed formats:
//! - text: `# resume` / `# cover_letter` headers switch the bank, other `#` lines
//!   are comments, each remaining line is a paragraph with an optional `[Entity]`
//!   prefix, split into sentences
//! - JSON: an array of `{text, target_bank, source_entity_tag}`
//!
//! Validation failures are reported per unit; the rest of the input still lands.

pub mod dedup;
pub mod metrics;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingest::dedup::dedup_key;
use crate::ingest::metrics::detect_metric;
use crate::models::sentence::{NewSentence, TargetBank};
use crate::models::UnknownVariant;
use crate::store::{ContentStore, StoreError};

const MIN_WORDS: usize = 3;
const MAX_CHARS: usize = 400;

/// Tokens ending in `.` that do not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "e.g.", "i.e.", "etc.", "vs.", "mr.", "mrs.", "ms.", "dr.", "st.", "jr.", "sr.", "no.",
    "approx.", "u.s.", "u.k.",
];

/// Company suffixes can end a sentence; they only hold it open before another suffix.
const CORPORATE_SUFFIXES: &[&str] = &["co.", "inc.", "ltd.", "corp.", "llc.", "plc."];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty sentence")]
    Empty,

    #[error("too short: {words} words (minimum {MIN_WORDS})")]
    TooShort { words: usize },

    #[error("too long: {chars} characters (maximum {MAX_CHARS})")]
    TooLong { chars: usize },
}

/// Whole-input failures: the seed file itself could not be understood.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid seed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Seed unit {index}: {source}")]
    UnknownBank {
        index: usize,
        #[source]
        source: UnknownVariant,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFormat {
    Text,
    Json,
}

impl SeedFormat {
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some(e) if e.eq_ignore_ascii_case("json") => SeedFormat::Json,
            _ => SeedFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedUnit {
    pub text: String,
    pub target_bank: TargetBank,
    pub source_entity_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonSeedUnit {
    text: String,
    #[serde(default)]
    target_bank: Option<String>,
    #[serde(default)]
    source_entity_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvalidUnit {
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub inserted: Vec<Uuid>,
    /// Ids of the already-stored sentences the duplicates matched.
    pub duplicates: Vec<Uuid>,
    pub invalid: Vec<InvalidUnit>,
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing
// ────────────────────────────────────────────────────────────────────────────

fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim();
    (!tag.is_empty()).then(|| tag.to_string())
}

/// Splits `[Entity] rest` into its tag and remainder.
fn split_entity_prefix(line: &str) -> (Option<String>, &str) {
    if let Some(rest) = line.strip_prefix('[') {
        if let Some((tag, remainder)) = rest.split_once(']') {
            return (normalize_tag(tag), remainder.trim());
        }
    }
    (None, line)
}

/// Whether the `.` ending `sentence` belongs to an abbreviation rather than closing it.
fn ends_with_abbreviation(sentence: &str, next_word: &str) -> bool {
    let last = sentence
        .split_whitespace()
        .last()
        .unwrap_or_default()
        .to_lowercase();
    if CORPORATE_SUFFIXES.contains(&last.as_str()) {
        return CORPORATE_SUFFIXES.contains(&next_word.to_lowercase().as_str());
    }
    let single_initial = last.len() == 2 && last.starts_with(|c: char| c.is_alphabetic());
    ABBREVIATIONS.contains(&last.as_str()) || single_initial
}

/// Splits a paragraph on `.`, `!` and `?` followed by whitespace and a capital
/// letter, digit or quote. Titles, initials and other known abbreviations never
/// split; a company suffix splits unless another suffix follows ("Acme Co. Ltd.").
pub fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = paragraph.char_indices().collect();

    for (pos, (i, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let end = i + c.len_utf8();
        let next_is_space = chars.get(pos + 1).is_some_and(|(_, n)| n.is_whitespace());
        if !next_is_space {
            continue;
        }
        let next_word_starts_sentence = chars[pos + 1..]
            .iter()
            .map(|(_, n)| *n)
            .find(|n| !n.is_whitespace())
            .is_some_and(|n| n.is_uppercase() || n.is_ascii_digit() || n == '"' || n == '\'');
        if !next_word_starts_sentence {
            continue;
        }
        let candidate = &paragraph[start..end];
        let next_word = paragraph[end..].split_whitespace().next().unwrap_or_default();
        if *c == '.' && ends_with_abbreviation(candidate, next_word) {
            continue;
        }
        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
        start = end;
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

pub fn parse_seed_text(input: &str, default_bank: TargetBank) -> Vec<SeedUnit> {
    let mut bank = default_bank;
    let mut units = Vec::new();

    for raw in input.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            if let Ok(next) = header.trim().parse::<TargetBank>() {
                bank = next;
            }
            continue;
        }

        let line = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line);
        let (tag, paragraph) = split_entity_prefix(line);
        for text in split_sentences(paragraph) {
            units.push(SeedUnit {
                text,
                target_bank: bank,
                source_entity_tag: tag.clone(),
            });
        }
    }
    units
}

pub fn parse_seed_json(input: &str, default_bank: TargetBank) -> Result<Vec<SeedUnit>, IngestError> {
    let raw: Vec<JsonSeedUnit> = serde_json::from_str(input)?;
    raw.into_iter()
        .enumerate()
        .map(|(index, unit)| -> Result<SeedUnit, IngestError> {
            let target_bank = match unit.target_bank.as_deref() {
                Some(bank) => bank
                    .parse()
                    .map_err(|source| IngestError::UnknownBank { index, source })?,
                None => default_bank,
            };
            Ok(SeedUnit {
                text: unit.text,
                target_bank,
                source_entity_tag: unit.source_entity_tag.as_deref().and_then(normalize_tag),
            })
        })
        .collect()
}

pub fn parse_seed(
    input: &str,
    format: SeedFormat,
    default_bank: TargetBank,
) -> Result<Vec<SeedUnit>, IngestError> {
    match format {
        SeedFormat::Text => Ok(parse_seed_text(input, default_bank)),
        SeedFormat::Json => parse_seed_json(input, default_bank),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation and storage
// ────────────────────────────────────────────────────────────────────────────

pub fn validate_unit(text: &str) -> Result<(), ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let words = text.split_whitespace().count();
    if words < MIN_WORDS {
        return Err(ValidationError::TooShort { words });
    }
    let chars = text.chars().count();
    if chars > MAX_CHARS {
        return Err(ValidationError::TooLong { chars });
    }
    Ok(())
}

/// Validates and stores each unit. A store failure other than a duplicate stops ingestion.
pub async fn ingest(
    store: &dyn ContentStore,
    units: Vec<SeedUnit>,
) -> Result<IngestReport, IngestError> {
    let mut report = IngestReport::default();

    for unit in units {
        if let Err(reason) = validate_unit(&unit.text) {
            warn!("Skipping seed unit '{}': {reason}", unit.text);
            report.invalid.push(InvalidUnit {
                text: unit.text,
                reason: reason.to_string(),
            });
            continue;
        }

        let text = unit.text.trim().to_string();
        let sentence = NewSentence {
            has_metric: detect_metric(&text),
            dedup_key: dedup_key(&text),
            text,
            target_bank: unit.target_bank,
            source_entity_tag: unit.source_entity_tag,
        };

        match store.insert_sentence(sentence).await {
            Ok(id) => report.inserted.push(id),
            Err(StoreError::DuplicateSentence { existing }) => report.duplicates.push(existing),
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Ingested {} sentences ({} duplicates, {} invalid)",
        report.inserted.len(),
        report.duplicates.len(),
        report.invalid.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;

    #[test]
    fn test_split_after_company_suffix_when_new_sentence_starts() {
        assert_eq!(
            split_sentences("Increased email open rates by 24% at Acme Co. Led a team of 4 marketers."),
            vec![
                "Increased email open rates by 24% at Acme Co.",
                "Led a team of 4 marketers."
            ]
        );
        assert_eq!(
            split_sentences("Joined Acme Co. Ltd. as its first marketer. Built the CRM from scratch."),
            vec![
                "Joined Acme Co. Ltd. as its first marketer.",
                "Built the CRM from scratch."
            ]
        );
        assert_eq!(
            split_sentences("Partnered with Dr. Lee and Globex Inc. on onboarding research"),
            vec!["Partnered with Dr. Lee and Globex Inc. on onboarding research"]
        );
        assert_eq!(
            split_sentences("Grew revenue by 3.5x in a year. Hired 6 engineers! Why? Scale."),
            vec!["Grew revenue by 3.5x in a year.", "Hired 6 engineers!", "Why?", "Scale."]
        );
    }

    #[test]
    fn test_split_ignores_lowercase_continuations_and_initials() {
        assert_eq!(
            split_sentences("Worked with J. Smith on e.g. onboarding flows"),
            vec!["Worked with J. Smith on e.g. onboarding flows"]
        );
    }

    #[test]
    fn test_text_seed_headers_and_entity_prefixes() {
        let input = "\
# resume
[Acme Co.] Increased email open rates by 24% at Acme Co.
- Built lifecycle drip campaigns. Cut churn by 8%.
# a plain comment
# cover_letter
I am excited to bring my lifecycle marketing experience to your team.
";
        let units = parse_seed_text(input, TargetBank::Resume);
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].source_entity_tag.as_deref(), Some("Acme Co."));
        assert_eq!(units[1].text, "Built lifecycle drip campaigns.");
        assert_eq!(units[1].source_entity_tag, None);
        assert_eq!(units[2].text, "Cut churn by 8%.");
        assert_eq!(units[3].target_bank, TargetBank::CoverLetter);
    }

    #[test]
    fn test_json_seed_with_defaults_and_bad_bank() {
        let units = parse_seed_json(
            r#"[{"text": "Led the billing migration to Stripe", "source_entity_tag": " Globex "},
                {"text": "Wrote the onboarding emails", "target_bank": "cover_letter"}]"#,
            TargetBank::Resume,
        )
        .unwrap();
        assert_eq!(units[0].target_bank, TargetBank::Resume);
        assert_eq!(units[0].source_entity_tag.as_deref(), Some("Globex"));
        assert_eq!(units[1].target_bank, TargetBank::CoverLetter);

        let err = parse_seed_json(r#"[{"text": "x y z", "target_bank": "portfolio"}]"#, TargetBank::Resume)
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownBank { index: 0, .. }));
    }

    #[test]
    fn test_validation_limits() {
        assert_eq!(validate_unit("   "), Err(ValidationError::Empty));
        assert_eq!(validate_unit("Led teams"), Err(ValidationError::TooShort { words: 2 }));
        let long = "word ".repeat(100);
        assert_eq!(validate_unit(&long), Err(ValidationError::TooLong { chars: 499 }));
        assert!(validate_unit("Led three teams").is_ok());
    }

    #[tokio::test]
    async fn test_ingest_reports_inserted_duplicates_and_invalid() {
        let store = InMemoryContentStore::new();
        let units = parse_seed_text(
            "[Acme Co.] Increased email open rates by 24% at Acme Co.\nincreased  email open rates by 24% at acme co\nToo short\n",
            TargetBank::Resume,
        );
        let report = ingest(&store, units).await.unwrap();
        assert_eq!(report.inserted.len(), 1);
        assert_eq!(report.duplicates, report.inserted);
        assert_eq!(report.invalid.len(), 1);

        let stored = store.get_sentence(report.inserted[0]).await.unwrap().unwrap();
        assert!(stored.has_metric);
        assert_eq!(stored.source_entity_tag.as_deref(), Some("Acme Co."));
    }
}
