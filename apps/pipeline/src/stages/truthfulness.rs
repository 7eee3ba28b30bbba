//! Truthfulness evaluation against the truth corpus.
//!
//! Fail-closed: a sentence is approved only when the provider explicitly
//! approves it *and* cites at least one valid truth from the supplied context.
//! Every other per-item answer is a rejection. Envelope-level failures are
//! `ProviderError`s and retried by the runner.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::classifier::{align_to_batch, Classification, Classifier, ClassifyContext, ProviderError};
use crate::corpus::{AtomicTruth, CorpusHandle};
use crate::models::outcome::StageName;
use crate::models::sentence::CandidateSentence;
use crate::stages::{chunk, Stage, Verdict};

pub struct TruthfulnessStage {
    corpus: CorpusHandle,
    classifier: Arc<dyn Classifier>,
}

fn tag_key(sentence: &CandidateSentence) -> Option<String> {
    sentence
        .source_entity_tag
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
}

/// Applies the fail-closed rule to one aligned provider answer.
pub(crate) fn judge(slot: Option<Classification>, truths: &[AtomicTruth]) -> Verdict {
    let Some(result) = slot else {
        return Verdict::Rejected("no-verdict".to_string());
    };
    if result.is_malformed() {
        return Verdict::Retry("malformed-verdict".to_string());
    }
    if !result.is_approved() {
        return Verdict::Rejected("unsupported".to_string());
    }
    if result.evidence.is_empty() {
        return Verdict::Rejected("uncited-approval".to_string());
    }
    if result.evidence.iter().any(|i| *i >= truths.len()) {
        return Verdict::Rejected("invalid-evidence".to_string());
    }

    let mut cited = result.evidence.clone();
    cited.sort_unstable();
    cited.dedup();
    let statements: Vec<&str> = cited
        .iter()
        .map(|i| truths[*i].statement_text.as_str())
        .collect();
    Verdict::Approved(format!("cited:{}", statements.join(" | ")))
}

impl TruthfulnessStage {
    pub fn new(corpus: CorpusHandle, classifier: Arc<dyn Classifier>) -> Self {
        Self { corpus, classifier }
    }
}

#[async_trait]
impl Stage for TruthfulnessStage {
    fn name(&self) -> StageName {
        StageName::Truthfulness
    }

    /// Groups by entity tag first so each batch has exactly one truth subset.
    fn partition(
        &self,
        cohort: Vec<CandidateSentence>,
        batch_size: usize,
    ) -> Vec<Vec<CandidateSentence>> {
        let mut order: Vec<Option<String>> = Vec::new();
        let mut groups: HashMap<Option<String>, Vec<CandidateSentence>> = HashMap::new();
        for sentence in cohort {
            let key = tag_key(&sentence);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(sentence);
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .flat_map(|group| chunk(group, batch_size))
            .collect()
    }

    async fn ready(&self, batch: &[CandidateSentence]) {
        let tag = batch.first().and_then(|s| s.source_entity_tag.as_deref());
        let calls_provider = !self.corpus.snapshot().for_entity(tag).is_empty();
        if calls_provider {
            self.classifier.ready().await;
        }
    }

    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError> {
        let Some(first) = batch.first() else {
            return Ok(Vec::new());
        };
        let tag = first.source_entity_tag.as_deref();
        let truths = self.corpus.snapshot().for_entity(tag);

        if truths.is_empty() {
            let reason = match tag {
                Some(tag) => format!("no-truth-context:{}", tag.trim()),
                None => "no-truth-context".to_string(),
            };
            debug!(batch_size = batch.len(), "{reason}, rejecting without provider call");
            return Ok(vec![Verdict::Rejected(reason); batch.len()]);
        }

        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let context = ClassifyContext::Truthfulness {
            truths: truths.clone(),
        };
        let results = self.classifier.classify(&texts, &context).await?;

        Ok(align_to_batch(batch.len(), results)
            .into_iter()
            .map(|slot| judge(slot, &truths))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::FnClassifier;
    use crate::corpus::TruthCorpus;
    use crate::models::sentence::TargetBank;
    use chrono::Utc;
    use uuid::Uuid;

    fn sentence(text: &str, tag: Option<&str>) -> CandidateSentence {
        CandidateSentence {
            id: Uuid::new_v4(),
            text: text.to_string(),
            original_text: None,
            target_bank: TargetBank::Resume,
            source_entity_tag: tag.map(String::from),
            has_metric: true,
            created_at: Utc::now(),
        }
    }

    fn corpus() -> CorpusHandle {
        CorpusHandle::new(
            TruthCorpus::parse_text(
                "[Acme Co.] Increased email campaign open rates by 24%\n[Globex] Migrated billing to Stripe in 6 weeks\n",
            )
            .unwrap(),
        )
    }

    fn truth(text: &str) -> AtomicTruth {
        AtomicTruth {
            source_entity_tag: "Acme Co.".to_string(),
            statement_text: text.to_string(),
        }
    }

    #[test]
    fn test_judge_is_fail_closed() {
        let truths = vec![truth("Increased email campaign open rates by 24%")];
        let approved = |evidence: Vec<usize>| {
            Some(Classification {
                status: "approved".to_string(),
                evidence,
                ..Default::default()
            })
        };

        assert!(matches!(judge(approved(vec![0]), &truths), Verdict::Approved(_)));
        assert_eq!(judge(approved(vec![]), &truths), Verdict::Rejected("uncited-approval".to_string()));
        assert_eq!(judge(approved(vec![3]), &truths), Verdict::Rejected("invalid-evidence".to_string()));
        assert_eq!(judge(None, &truths), Verdict::Rejected("no-verdict".to_string()));
        let maybe = Some(Classification {
            status: "probably".to_string(),
            evidence: vec![0],
            ..Default::default()
        });
        assert_eq!(judge(maybe, &truths), Verdict::Rejected("unsupported".to_string()));
    }

    #[tokio::test]
    async fn test_unreadable_item_is_retried_while_siblings_are_judged() {
        let classifier = Arc::new(FnClassifier::new(|_, batch, _| {
            let body = (0..batch.len())
                .map(|i| {
                    if i == 2 {
                        format!(r#"{{"index":{i},"status":"approved","confidence":"high","evidence":[0]}}"#)
                    } else {
                        format!(r#"{{"index":{i},"status":"approved","evidence":[0]}}"#)
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            let envelope: crate::classifier::ClassificationEnvelope =
                serde_json::from_str(&format!(r#"{{"results":[{body}]}}"#)).unwrap();
            Ok(envelope.into_results())
        }));
        let stage = TruthfulnessStage::new(corpus(), classifier);
        let batch: Vec<_> = (0..5)
            .map(|i| sentence(&format!("Increased email open rates by 24% ({i})"), Some("Acme Co.")))
            .collect();
        let verdicts = stage.classify_batch(&batch).await.unwrap();

        assert_eq!(verdicts[2], Verdict::Retry("malformed-verdict".to_string()));
        for i in [0, 1, 3, 4] {
            assert!(matches!(verdicts[i], Verdict::Approved(_)), "item {i}: {:?}", verdicts[i]);
        }
    }

    #[test]
    fn test_partition_groups_by_entity_then_chunks() {
        let stage = TruthfulnessStage::new(corpus(), Arc::new(FnClassifier::scenario()));
        let cohort = vec![
            sentence("a1", Some("Acme Co.")),
            sentence("g1", Some("Globex")),
            sentence("a2", Some("acme co.")),
            sentence("u1", None),
            sentence("a3", Some("Acme Co.")),
        ];
        let batches = stage.partition(cohort, 2);
        let texts: Vec<Vec<&str>> = batches
            .iter()
            .map(|b| b.iter().map(|s| s.text.as_str()).collect())
            .collect();
        assert_eq!(texts, vec![vec!["a1", "a2"], vec!["a3"], vec!["g1"], vec!["u1"]]);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_rejected_without_provider_call() {
        let classifier = Arc::new(FnClassifier::scenario());
        let stage = TruthfulnessStage::new(corpus(), classifier.clone());
        let verdicts = stage
            .classify_batch(&[sentence("Shipped the Initech portal", Some("Initech"))])
            .await
            .unwrap();
        assert_eq!(verdicts, vec![Verdict::Rejected("no-truth-context:Initech".to_string())]);
        assert_eq!(classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_supported_sentence_is_approved_with_citation() {
        let stage = TruthfulnessStage::new(corpus(), Arc::new(FnClassifier::scenario()));
        let verdicts = stage
            .classify_batch(&[
                sentence("Increased email open rates by 24% at Acme Co.", Some("Acme Co.")),
                sentence("Tripled newsletter revenue at Acme Co.", Some("Acme Co.")),
            ])
            .await
            .unwrap();
        assert_eq!(
            verdicts[0],
            Verdict::Approved("cited:Increased email campaign open rates by 24%".to_string())
        );
        assert_eq!(verdicts[1], Verdict::Rejected("unsupported".to_string()));
    }

    #[tokio::test]
    async fn test_transient_error_propagates_for_runner_retry() {
        let classifier = Arc::new(FnClassifier::new(|_, _, _| {
            Err(ProviderError::Transient("malformed envelope".to_string()))
        }));
        let stage = TruthfulnessStage::new(corpus(), classifier);
        let err = stage
            .classify_batch(&[sentence("Increased email open rates by 24%", Some("Acme Co."))])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient(_)));
    }
}
