//! The five evaluation stages and their shared capability.
//!
//! A stage only turns a batch of sentences into verdicts. Cohort selection,
//! retries, timeouts and commits belong to `pipeline::runner`.

pub mod keyword;
pub mod rules;
pub mod skill;
pub mod spelling;
pub mod tone;
pub mod truthfulness;

use std::sync::Arc;

use async_trait::async_trait;

use crate::classifier::{Classifier, ProviderError};
use crate::corpus::CorpusHandle;
use crate::models::outcome::{OutcomeStatus, StageName};
use crate::models::sentence::CandidateSentence;

pub use keyword::KeywordFilterStage;
pub use rules::{RuleSet, RulesError};
pub use skill::SkillMatcherStage;
pub use spelling::SpellingNormalizerStage;
pub use tone::ToneClassifierStage;
pub use truthfulness::TruthfulnessStage;

/// What a stage decided for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved(String),
    Rejected(String),
    Completed(String),
    /// Completed with a rewritten canonical text.
    Normalized { text: String, detail: String },
    /// No usable answer for this item; the runner retries it within the batch budget.
    Retry(String),
}

impl Verdict {
    /// Status this verdict commits as. `None` for `Retry`, which never commits directly.
    pub fn status(&self) -> Option<OutcomeStatus> {
        match self {
            Verdict::Approved(_) => Some(OutcomeStatus::Approved),
            Verdict::Rejected(_) => Some(OutcomeStatus::Rejected),
            Verdict::Completed(_) | Verdict::Normalized { .. } => Some(OutcomeStatus::Completed),
            Verdict::Retry(_) => None,
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Local stages never call the classification service.
    fn is_local(&self) -> bool {
        !self.name().is_ai_backed()
    }

    /// Splits a cohort into batches. Default: fixed-size chunks in cohort order.
    fn partition(
        &self,
        cohort: Vec<CandidateSentence>,
        batch_size: usize,
    ) -> Vec<Vec<CandidateSentence>> {
        chunk(cohort, batch_size)
    }

    /// Resolves once `classify_batch` may call the classification service.
    async fn ready(&self, _batch: &[CandidateSentence]) {}

    /// Returns one verdict per input sentence, in input order.
    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError>;
}

pub(crate) fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// The production registry, in pipeline order.
pub fn default_stages(
    rules: &RuleSet,
    corpus: CorpusHandle,
    classifier: Arc<dyn Classifier>,
) -> Result<Vec<Arc<dyn Stage>>, RulesError> {
    Ok(vec![
        Arc::new(KeywordFilterStage::new(rules)),
        Arc::new(TruthfulnessStage::new(corpus, Arc::clone(&classifier))),
        Arc::new(SpellingNormalizerStage::with_overrides(&rules.spelling_overrides)?),
        Arc::new(ToneClassifierStage::new(Arc::clone(&classifier))),
        Arc::new(SkillMatcherStage::new(&rules.skill_taxonomy, classifier)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FnClassifier;

    #[test]
    fn test_chunk_keeps_order_and_remainder() {
        let batches = chunk((0..12).collect::<Vec<_>>(), 5);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec![10, 11]);
        assert_eq!(chunk(Vec::<u8>::new(), 5).len(), 0);
        assert_eq!(chunk(vec![1, 2], 0).len(), 2);
    }

    #[test]
    fn test_default_registry_follows_stage_order() {
        let stages = default_stages(
            &RuleSet::default(),
            CorpusHandle::default(),
            Arc::new(FnClassifier::scenario()),
        )
        .unwrap();
        let names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, StageName::ALL.to_vec());
        assert!(stages[0].is_local());
        assert!(!stages[1].is_local());
        assert!(stages[2].is_local());
    }

    #[test]
    fn test_retry_verdict_has_no_status() {
        assert_eq!(Verdict::Retry("timeout".to_string()).status(), None);
        assert_eq!(
            Verdict::Normalized {
                text: "colour".to_string(),
                detail: "normalized:1".to_string()
            }
            .status(),
            Some(OutcomeStatus::Completed)
        );
    }
}
