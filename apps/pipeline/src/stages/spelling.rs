use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::classifier::ProviderError;
use crate::models::outcome::StageName;
use crate::models::sentence::CandidateSentence;
use crate::stages::rules::RulesError;
use crate::stages::{Stage, Verdict};

/// Built-in US to UK pairs. No replacement may appear as a source word.
const US_TO_UK: &[(&str, &str)] = &[
    ("analyze", "analyse"),
    ("analyzed", "analysed"),
    ("analyzing", "analysing"),
    ("behavior", "behaviour"),
    ("behaviors", "behaviours"),
    ("canceled", "cancelled"),
    ("catalog", "catalogue"),
    ("catalogs", "catalogues"),
    ("center", "centre"),
    ("centers", "centres"),
    ("centralize", "centralise"),
    ("centralized", "centralised"),
    ("color", "colour"),
    ("colors", "colours"),
    ("customize", "customise"),
    ("customized", "customised"),
    ("defense", "defence"),
    ("digitize", "digitise"),
    ("digitized", "digitised"),
    ("emphasize", "emphasise"),
    ("emphasized", "emphasised"),
    ("favorite", "favourite"),
    ("labor", "labour"),
    ("maximize", "maximise"),
    ("maximized", "maximised"),
    ("minimize", "minimise"),
    ("minimized", "minimised"),
    ("modeled", "modelled"),
    ("modeling", "modelling"),
    ("monetize", "monetise"),
    ("monetized", "monetised"),
    ("optimize", "optimise"),
    ("optimized", "optimised"),
    ("optimizing", "optimising"),
    ("optimization", "optimisation"),
    ("organize", "organise"),
    ("organized", "organised"),
    ("organization", "organisation"),
    ("organizations", "organisations"),
    ("prioritize", "prioritise"),
    ("prioritized", "prioritised"),
    ("prioritization", "prioritisation"),
    ("realize", "realise"),
    ("realized", "realised"),
    ("recognize", "recognise"),
    ("recognized", "recognised"),
    ("specialize", "specialise"),
    ("specialized", "specialised"),
    ("standardize", "standardise"),
    ("standardized", "standardised"),
    ("traveled", "travelled"),
    ("utilize", "utilise"),
    ("utilized", "utilised"),
    ("visualize", "visualise"),
    ("visualized", "visualised"),
    ("visualization", "visualisation"),
];

fn match_case(template: &str, replacement: &str) -> String {
    let mut letters = template.chars().filter(|c| c.is_alphabetic());
    let first_upper = letters.next().is_some_and(char::is_uppercase);
    let rest_upper = template.chars().filter(|c| c.is_alphabetic()).skip(1).all(char::is_uppercase);

    if first_upper && rest_upper && template.chars().count() > 1 {
        replacement.to_uppercase()
    } else if first_upper {
        let mut chars = replacement.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    } else {
        replacement.to_string()
    }
}

/// Local dictionary substitution. Always completes; rewrites the canonical text
/// when anything changed.
pub struct SpellingNormalizerStage {
    dictionary: HashMap<String, String>,
}

impl SpellingNormalizerStage {
    pub fn new() -> Self {
        Self {
            dictionary: US_TO_UK
                .iter()
                .map(|(us, uk)| (us.to_string(), uk.to_string()))
                .collect(),
        }
    }

    /// Built-in dictionary plus `overrides`. Fails if any word inside a
    /// replacement is itself a source word, since normalisation would then not
    /// be idempotent.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, RulesError> {
        let mut stage = Self::new();
        for (us, uk) in overrides {
            let (us, uk) = (us.trim().to_lowercase(), uk.trim().to_lowercase());
            if us.is_empty() || uk.is_empty() || !us.chars().all(char::is_alphabetic) {
                return Err(RulesError::Invalid(format!(
                    "invalid spelling pair '{us}' -> '{uk}'"
                )));
            }
            stage.dictionary.insert(us, uk);
        }
        // normalize() re-tokenises on non-alphabetic characters, so every
        // alphabetic run of a replacement is looked up again on a second pass.
        if let Some(word) = stage
            .dictionary
            .values()
            .flat_map(|uk| uk.split(|c: char| !c.is_alphabetic()))
            .find(|word| stage.dictionary.contains_key(*word))
        {
            return Err(RulesError::Invalid(format!(
                "spelling replacement word '{word}' is itself a source word"
            )));
        }
        Ok(stage)
    }

    fn push_word(&self, out: &mut String, word: &str) -> usize {
        match self.dictionary.get(&word.to_lowercase()) {
            Some(replacement) => {
                out.push_str(&match_case(word, replacement));
                1
            }
            None => {
                out.push_str(word);
                0
            }
        }
    }

    /// Returns the normalised text and the number of replaced words.
    pub fn normalize(&self, text: &str) -> (String, usize) {
        let mut out = String::with_capacity(text.len() + 8);
        let mut replaced = 0;
        let mut word_start: Option<usize> = None;

        for (i, c) in text.char_indices() {
            if c.is_alphabetic() {
                word_start.get_or_insert(i);
            } else {
                if let Some(start) = word_start.take() {
                    replaced += self.push_word(&mut out, &text[start..i]);
                }
                out.push(c);
            }
        }
        if let Some(start) = word_start {
            replaced += self.push_word(&mut out, &text[start..]);
        }
        (out, replaced)
    }

    pub fn evaluate(&self, text: &str) -> Verdict {
        let (normalized, replaced) = self.normalize(text);
        if replaced == 0 || normalized == text {
            Verdict::Completed("unchanged".to_string())
        } else {
            Verdict::Normalized {
                text: normalized,
                detail: format!("normalized:{replaced}"),
            }
        }
    }
}

impl Default for SpellingNormalizerStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for SpellingNormalizerStage {
    fn name(&self) -> StageName {
        StageName::Spelling
    }

    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError> {
        Ok(batch.iter().map(|s| self.evaluate(&s.text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_dictionary_is_closed() {
        assert!(SpellingNormalizerStage::with_overrides(&BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_normalizes_and_counts() {
        let stage = SpellingNormalizerStage::new();
        assert_eq!(
            stage.evaluate("Optimized the color palette for the catalog"),
            Verdict::Normalized {
                text: "Optimised the colour palette for the catalogue".to_string(),
                detail: "normalized:3".to_string(),
            }
        );
    }

    #[test]
    fn test_unchanged_text_completes_without_rewrite() {
        let stage = SpellingNormalizerStage::new();
        assert_eq!(
            stage.evaluate("Increased email open rates by 24% at Acme Co."),
            Verdict::Completed("unchanged".to_string())
        );
    }

    #[test]
    fn test_case_is_preserved() {
        let stage = SpellingNormalizerStage::new();
        let (text, _) = stage.normalize("COLOR, Color and color-coded behavior.");
        assert_eq!(text, "COLOUR, Colour and colour-coded behaviour.");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let stage = SpellingNormalizerStage::new();
        for input in [
            "Organized 3 analyzing workshops at the Center for Labor Studies",
            "Prioritized MINIMIZED costs; customized dashboards",
            "Led the café's favorite menu redesign",
        ] {
            let (once, _) = stage.normalize(input);
            let (twice, replaced) = stage.normalize(&once);
            assert_eq!(once, twice);
            assert_eq!(replaced, 0);
        }
    }

    #[test]
    fn test_override_that_chains_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("colour".to_string(), "color".to_string());
        let err = SpellingNormalizerStage::with_overrides(&overrides).err().unwrap();
        assert!(err.to_string().contains("source word"));
    }

    #[test]
    fn test_override_with_hyphenated_source_word_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("email".to_string(), "e-mail".to_string());
        overrides.insert("mail".to_string(), "post".to_string());
        let err = SpellingNormalizerStage::with_overrides(&overrides).err().unwrap();
        assert!(err.to_string().contains("'mail'"));
    }

    #[test]
    fn test_hyphenated_override_stays_idempotent() {
        let mut overrides = BTreeMap::new();
        overrides.insert("email".to_string(), "e-mail".to_string());
        let stage = SpellingNormalizerStage::with_overrides(&overrides).unwrap();
        let (once, _) = stage.normalize("Ran email campaigns");
        let (twice, replaced) = stage.normalize(&once);
        assert_eq!(once, "Ran e-mail campaigns");
        assert_eq!(twice, once);
        assert_eq!(replaced, 0);
    }

    #[test]
    fn test_valid_override_is_applied() {
        let mut overrides = BTreeMap::new();
        overrides.insert("program".to_string(), "programme".to_string());
        let stage = SpellingNormalizerStage::with_overrides(&overrides).unwrap();
        let (text, replaced) = stage.normalize("Ran the mentoring program");
        assert_eq!(text, "Ran the mentoring programme");
        assert_eq!(replaced, 1);
    }
}
