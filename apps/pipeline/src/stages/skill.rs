use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::classifier::{align_to_batch, Classifier, ClassifyContext, ProviderError};
use crate::models::outcome::StageName;
use crate::models::sentence::{format_skill_detail, CandidateSentence, NO_SKILLS_DETAIL};
use crate::stages::{Stage, Verdict};

/// Matches sentences against the job-skill taxonomy. Never rejects.
pub struct SkillMatcherStage {
    classifier: Arc<dyn Classifier>,
    taxonomy: Vec<String>,
    /// Lowercased name to canonical spelling.
    canonical: HashMap<String, String>,
}

impl SkillMatcherStage {
    pub fn new(taxonomy: &[String], classifier: Arc<dyn Classifier>) -> Self {
        let taxonomy: Vec<String> = taxonomy
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let canonical = taxonomy
            .iter()
            .map(|s| (s.to_lowercase(), s.clone()))
            .collect();
        Self {
            classifier,
            taxonomy,
            canonical,
        }
    }

    /// Validates one provider answer against the taxonomy.
    pub fn interpret(&self, detail: &str) -> Verdict {
        let detail = detail.trim();
        if detail.eq_ignore_ascii_case(NO_SKILLS_DETAIL) {
            return Verdict::Completed(NO_SKILLS_DETAIL.to_string());
        }

        let mut known: Vec<String> = Vec::new();
        let mut unknown: Vec<&str> = Vec::new();
        for raw in detail.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match self.canonical.get(&raw.to_lowercase()) {
                Some(skill) if !known.contains(skill) => known.push(skill.clone()),
                Some(_) => {}
                None => unknown.push(raw),
            }
        }

        if !known.is_empty() {
            Verdict::Completed(format_skill_detail(&known))
        } else if unknown.is_empty() {
            Verdict::Retry("empty-skill-output".to_string())
        } else {
            Verdict::Retry(format!("unknown-skills:{}", unknown.join(",")))
        }
    }
}

#[async_trait]
impl Stage for SkillMatcherStage {
    fn name(&self) -> StageName {
        StageName::Skill
    }

    async fn ready(&self, _batch: &[CandidateSentence]) {
        self.classifier.ready().await;
    }

    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError> {
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let context = ClassifyContext::Skill {
            taxonomy: self.taxonomy.clone(),
        };
        let results = self.classifier.classify(&texts, &context).await?;

        Ok(align_to_batch(batch.len(), results)
            .into_iter()
            .map(|slot| match slot {
                Some(c) if c.is_malformed() => Verdict::Retry("malformed-verdict".to_string()),
                Some(c) => self.interpret(&c.detail),
                None => Verdict::Retry("missing-skill-verdict".to_string()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FnClassifier;

    fn stage() -> SkillMatcherStage {
        SkillMatcherStage::new(
            &["Email Marketing".to_string(), "data analysis".to_string()],
            Arc::new(FnClassifier::scenario()),
        )
    }

    #[test]
    fn test_skills_are_canonicalised() {
        assert_eq!(
            stage().interpret("email marketing, DATA ANALYSIS, email marketing"),
            Verdict::Completed("Email Marketing, data analysis".to_string())
        );
    }

    #[test]
    fn test_unknown_skills_are_dropped_when_some_match() {
        assert_eq!(
            stage().interpret("data analysis, juggling"),
            Verdict::Completed("data analysis".to_string())
        );
    }

    #[test]
    fn test_only_unknown_skills_is_retried() {
        assert_eq!(
            stage().interpret("juggling"),
            Verdict::Retry("unknown-skills:juggling".to_string())
        );
        assert_eq!(stage().interpret(""), Verdict::Retry("empty-skill-output".to_string()));
    }

    #[test]
    fn test_explicit_none_completes() {
        assert_eq!(stage().interpret(" None "), Verdict::Completed("none".to_string()));
    }
}
