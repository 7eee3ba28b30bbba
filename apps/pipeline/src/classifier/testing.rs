//! Classifier doubles for unit and coordinator tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::classifier::{Classification, Classifier, ClassifyContext, ClassifyTask, ProviderError};

type Responder = dyn Fn(usize, &[String], &ClassifyContext) -> Result<Vec<Classification>, ProviderError>
    + Send
    + Sync;

/// Classifier driven by a closure. The closure receives the zero-based call
/// number, so scripts can fail the first N calls and then answer.
pub struct FnClassifier {
    responder: Box<Responder>,
    calls: AtomicUsize,
    log: Mutex<Vec<(ClassifyTask, Vec<String>)>>,
}

impl FnClassifier {
    pub fn new(
        responder: impl Fn(usize, &[String], &ClassifyContext) -> Result<Vec<Classification>, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request like a well-behaved provider would for the demo corpus.
    pub fn scenario() -> Self {
        Self::new(|_, batch, context| Ok(scenario_response(batch, context)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, task: ClassifyTask) -> usize {
        self.log.lock().unwrap().iter().filter(|(t, _)| *t == task).count()
    }

    pub fn batches(&self) -> Vec<(ClassifyTask, Vec<String>)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for FnClassifier {
    async fn classify(
        &self,
        batch: &[String],
        context: &ClassifyContext,
    ) -> Result<Vec<Classification>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push((context.task(), batch.to_vec()));
        (self.responder)(call, batch, context)
    }
}

fn significant_words(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '%')
                .to_lowercase()
        })
        .filter(|w| w.len() >= 3 || w.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

/// Deterministic stand-in for the provider:
/// - truthfulness approves when a truth shares four significant words, citing it
/// - tone answers `confident`
/// - skill answers `email marketing` for sentences mentioning email, else `none`
pub fn scenario_response(batch: &[String], context: &ClassifyContext) -> Vec<Classification> {
    batch
        .iter()
        .enumerate()
        .map(|(index, sentence)| {
            let mut result = Classification {
                index: Some(index),
                confidence: 0.9,
                ..Default::default()
            };
            match context {
                ClassifyContext::Truthfulness { truths } => {
                    let words = significant_words(sentence);
                    let support = truths.iter().position(|t| {
                        significant_words(&t.statement_text)
                            .intersection(&words)
                            .count()
                            >= 4
                    });
                    match support {
                        Some(i) => {
                            result.status = "approved".to_string();
                            result.evidence = vec![i];
                        }
                        None => {
                            result.status = "rejected".to_string();
                            result.detail = "no supporting statement".to_string();
                        }
                    }
                }
                ClassifyContext::Tone { .. } => {
                    result.status = "completed".to_string();
                    result.detail = "confident".to_string();
                }
                ClassifyContext::Skill { .. } => {
                    result.status = "completed".to_string();
                    result.detail = if sentence.to_lowercase().contains("email") {
                        "email marketing".to_string()
                    } else {
                        "none".to_string()
                    };
                }
            }
            result
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::AtomicTruth;

    #[test]
    fn test_scenario_truthfulness_cites_overlapping_truth() {
        let context = ClassifyContext::Truthfulness {
            truths: vec![
                AtomicTruth {
                    source_entity_tag: "Acme Co.".to_string(),
                    statement_text: "Managed a team of 4 lifecycle marketers".to_string(),
                },
                AtomicTruth {
                    source_entity_tag: "Acme Co.".to_string(),
                    statement_text: "Increased email campaign open rates by 24%".to_string(),
                },
            ],
        };
        let results = scenario_response(
            &["Increased email open rates by 24% at Acme Co.".to_string()],
            &context,
        );
        assert!(results[0].is_approved());
        assert_eq!(results[0].evidence, vec![1]);
    }

    #[tokio::test]
    async fn test_fn_classifier_counts_calls_per_task() {
        let classifier = FnClassifier::scenario();
        let context = ClassifyContext::Tone { labels: vec![] };
        classifier.classify(&["Led the team".to_string()], &context).await.unwrap();
        assert_eq!(classifier.calls(), 1);
        assert_eq!(classifier.calls_for(ClassifyTask::Tone), 1);
        assert_eq!(classifier.calls_for(ClassifyTask::Skill), 0);
    }
}
