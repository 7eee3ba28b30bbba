//! Classifier: the AI classification seam used by the truthfulness, tone and skill stages.
//!
//! Production: `LlmClassifier` (Claude via `LlmClient`, shared RPM limiter).
//! Tests: the doubles in `classifier::testing`.
//!
//! Stages hold an `Arc<dyn Classifier>` and never know which backend answers.

pub mod llm;
pub mod prompts;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::corpus::AtomicTruth;
use crate::llm_client::LlmError;

pub use llm::LlmClassifier;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Worth another attempt: timeouts, rate limits, overload, malformed envelopes.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Retrying cannot help: bad credentials, rejected request shape. Aborts the run.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl From<LlmError> for ProviderError {
    fn from(err: LlmError) -> Self {
        if err.is_retryable() {
            ProviderError::Transient(err.to_string())
        } else {
            ProviderError::Permanent(err.to_string())
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request / response models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyTask {
    Truthfulness,
    Tone,
    Skill,
}

/// A tone label with the cue description shown to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGuide {
    pub label: String,
    pub description: String,
}

/// Per-batch context sent along with the sentences.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyContext {
    /// Numbered truth statements; `evidence` indices point into this list.
    Truthfulness { truths: Vec<AtomicTruth> },
    Tone { labels: Vec<LabelGuide> },
    Skill { taxonomy: Vec<String> },
}

impl ClassifyContext {
    pub fn task(&self) -> ClassifyTask {
        match self {
            ClassifyContext::Truthfulness { .. } => ClassifyTask::Truthfulness,
            ClassifyContext::Tone { .. } => ClassifyTask::Tone,
            ClassifyContext::Skill { .. } => ClassifyTask::Skill,
        }
    }
}

/// One per-sentence verdict as returned by the provider.
///
/// Every field is defaulted so a partially filled item still parses; the stage
/// decides what a missing field means.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Classification {
    /// Position of the sentence in the submitted batch.
    #[serde(default)]
    pub index: Option<usize>,
    /// `approved` / `rejected` for truthfulness; informational elsewhere.
    #[serde(default)]
    pub status: String,
    /// Tone label, comma-separated skills, or a short reason.
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub confidence: f32,
    /// Indices of the supporting truth statements.
    #[serde(default)]
    pub evidence: Vec<usize>,
}

/// Status given to an item whose fields could not be read.
pub const MALFORMED_STATUS: &str = "malformed";

impl Classification {
    pub fn is_approved(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("approved")
    }

    pub fn is_malformed(&self) -> bool {
        self.status == MALFORMED_STATUS
    }

    /// Parses one item, keeping its index when only other fields are bad.
    fn from_item(item: serde_json::Value) -> Self {
        let index = item
            .get("index")
            .and_then(serde_json::Value::as_u64)
            .and_then(|i| usize::try_from(i).ok());
        serde_json::from_value(item).unwrap_or_else(|_| Classification {
            index,
            status: MALFORMED_STATUS.to_string(),
            ..Default::default()
        })
    }
}

/// Accepts both `{"results": [...]}` and a bare array.
///
/// Items are kept as raw values so one unreadable item does not fail the batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ClassificationEnvelope {
    Wrapped { results: Vec<serde_json::Value> },
    Bare(Vec<serde_json::Value>),
}

impl ClassificationEnvelope {
    pub(crate) fn into_results(self) -> Vec<Classification> {
        let items = match self {
            ClassificationEnvelope::Wrapped { results } => results,
            ClassificationEnvelope::Bare(results) => results,
        };
        items.into_iter().map(Classification::from_item).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// The classification service trait. Implement this to swap providers without
/// touching stages or the runner.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Waits until the provider will accept another request. Callers await this
    /// outside the per-call timeout.
    async fn ready(&self) {}

    async fn classify(
        &self,
        batch: &[String],
        context: &ClassifyContext,
    ) -> Result<Vec<Classification>, ProviderError>;
}

/// Maps provider results back onto batch positions.
///
/// Indexed results are placed by index; an index seen twice leaves that slot
/// empty since the verdict is ambiguous. Unindexed results are used positionally
/// only when the whole response is unindexed and exactly batch-sized.
pub fn align_to_batch(batch_len: usize, results: Vec<Classification>) -> Vec<Option<Classification>> {
    let mut slots: Vec<Option<Classification>> = vec![None; batch_len];

    if results.len() == batch_len && results.iter().all(|r| r.index.is_none()) {
        for (slot, result) in slots.iter_mut().zip(results) {
            *slot = Some(result);
        }
        return slots;
    }

    let mut seen = vec![0usize; batch_len];
    for result in &results {
        if let Some(i) = result.index.filter(|i| *i < batch_len) {
            seen[i] += 1;
        }
    }
    for result in results {
        if let Some(i) = result.index.filter(|i| *i < batch_len && seen[*i] == 1) {
            slots[i] = Some(result);
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(index: usize, status: &str) -> Classification {
        Classification {
            index: Some(index),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_align_places_by_index() {
        let aligned = align_to_batch(3, vec![indexed(2, "rejected"), indexed(0, "approved")]);
        assert_eq!(aligned[0].as_ref().map(|c| c.is_approved()), Some(true));
        assert!(aligned[1].is_none());
        assert_eq!(aligned[2].as_ref().map(|c| c.status.as_str()), Some("rejected"));
    }

    #[test]
    fn test_align_drops_duplicated_and_out_of_range_indices() {
        let aligned = align_to_batch(
            2,
            vec![indexed(0, "approved"), indexed(0, "rejected"), indexed(7, "approved")],
        );
        assert!(aligned.iter().all(Option::is_none));
    }

    #[test]
    fn test_align_positional_when_unindexed_and_exact() {
        let results = vec![Classification::default(), Classification::default()];
        assert!(align_to_batch(2, results).iter().all(Option::is_some));

        let short = vec![Classification::default()];
        assert!(align_to_batch(2, short).iter().all(Option::is_none));
    }

    #[test]
    fn test_envelope_accepts_wrapped_and_bare() {
        let wrapped: ClassificationEnvelope =
            serde_json::from_str(r#"{"results":[{"index":0,"status":"approved","evidence":[1]}]}"#)
                .unwrap();
        let results = wrapped.into_results();
        assert_eq!(results[0].evidence, vec![1]);
        assert_eq!(results[0].confidence, 0.0);

        let bare: ClassificationEnvelope =
            serde_json::from_str(r#"[{"index":1,"detail":"confident"}]"#).unwrap();
        assert_eq!(bare.into_results()[0].detail, "confident");
    }

    #[test]
    fn test_one_unreadable_item_keeps_the_rest_of_the_batch() {
        let envelope: ClassificationEnvelope = serde_json::from_str(
            r#"{"results":[
                {"index":0,"status":"approved","evidence":[0]},
                {"index":1,"status":"approved","evidence":[0]},
                {"index":2,"status":"approved","confidence":"high","evidence":[0]},
                {"index":3,"status":"rejected"},
                "not an object"
            ]}"#,
        )
        .unwrap();
        let results = envelope.into_results();
        assert_eq!(results.len(), 5);
        assert!(results[..2].iter().all(Classification::is_approved));
        assert!(results[2].is_malformed());
        assert_eq!(results[2].index, Some(2));
        assert_eq!(results[3].status, "rejected");
        assert!(results[4].is_malformed());
        assert_eq!(results[4].index, None);

        let aligned = align_to_batch(4, results);
        assert!(aligned.iter().all(Option::is_some));
        assert!(aligned[2].as_ref().is_some_and(Classification::is_malformed));
    }

    #[test]
    fn test_llm_errors_split_into_transient_and_permanent() {
        let transient: ProviderError = LlmError::Api {
            status: 529,
            message: "overloaded".to_string(),
        }
        .into();
        assert!(matches!(transient, ProviderError::Transient(_)));

        let permanent: ProviderError = LlmError::Api {
            status: 401,
            message: "invalid x-api-key".to_string(),
        }
        .into();
        assert!(matches!(permanent, ProviderError::Permanent(_)));
    }
}
