use async_trait::async_trait;

use crate::classifier::ProviderError;
use crate::models::outcome::StageName;
use crate::models::sentence::CandidateSentence;
use crate::stages::rules::RuleSet;
use crate::stages::{Stage, Verdict};

/// Lowercased word tokens. Letters, digits and inner apostrophes or hyphens
/// stay inside a word; everything else separates words.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .map(|w| w.trim_matches(|c| c == '\'' || c == '-').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &[String]) -> bool {
    !phrase.is_empty() && tokens.windows(phrase.len()).any(|w| w == phrase)
}

/// Local, deterministic gate on required keyword categories and forbidden terms.
pub struct KeywordFilterStage {
    /// (category, tokenized terms), sorted by category.
    categories: Vec<(String, Vec<Vec<String>>)>,
    forbidden: Vec<(String, Vec<String>)>,
}

impl KeywordFilterStage {
    pub fn new(rules: &RuleSet) -> Self {
        let categories = rules
            .keyword_categories
            .iter()
            .map(|(name, terms)| {
                let phrases = terms
                    .iter()
                    .map(|t| tokenize(t))
                    .filter(|p| !p.is_empty())
                    .collect();
                (name.clone(), phrases)
            })
            .collect();
        let forbidden = rules
            .forbidden_terms
            .iter()
            .map(|t| (t.trim().to_lowercase(), tokenize(t)))
            .filter(|(_, p)| !p.is_empty())
            .collect();
        Self {
            categories,
            forbidden,
        }
    }

    pub fn evaluate(&self, text: &str) -> Verdict {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Verdict::Rejected("no-keyword-match".to_string());
        }

        if let Some((term, _)) = self
            .forbidden
            .iter()
            .find(|(_, phrase)| contains_phrase(&tokens, phrase))
        {
            return Verdict::Rejected(format!("forbidden-term:{term}"));
        }

        let matched: Vec<&str> = self
            .categories
            .iter()
            .filter(|(_, phrases)| phrases.iter().any(|p| contains_phrase(&tokens, p)))
            .map(|(name, _)| name.as_str())
            .collect();

        if matched.is_empty() {
            Verdict::Rejected("no-keyword-match".to_string())
        } else {
            Verdict::Approved(format!("matched:{}", matched.join(",")))
        }
    }
}

#[async_trait]
impl Stage for KeywordFilterStage {
    fn name(&self) -> StageName {
        StageName::KeywordFilter
    }

    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError> {
        Ok(batch.iter().map(|s| self.evaluate(&s.text)).collect())
    }
}
