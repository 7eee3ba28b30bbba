//! Content store: the persistent, append-only stage ledger.
//!
//! `ContentStore` is the seam between the pipeline and its storage. Two backends:
//! `PgContentStore` (production, sqlx/Postgres) and `InMemoryContentStore`
//! (tests and `run --dry-run`). Both enforce the gating invariant and the
//! one-outcome-per-(sentence, stage) rule at commit time.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::outcome::{OutcomeStatus, StageName, StageOutcome};
use crate::models::run::PipelineRun;
use crate::models::sentence::{CandidateSentence, NewSentence, ProductionSentence, TargetBank};
use crate::models::UnknownVariant;

pub use memory::InMemoryContentStore;
pub use postgres::PgContentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Outcome already recorded for sentence {sentence_id} at stage {stage}")]
    DuplicateOutcome { sentence_id: Uuid, stage: StageName },

    #[error(
        "Out-of-order outcome for sentence {sentence_id}: stage {stage} requires an approved or completed {required} outcome"
    )]
    OutOfOrder {
        sentence_id: Uuid,
        stage: StageName,
        required: StageName,
    },

    #[error("Stage {stage} cannot record status '{status}'")]
    InvalidStatus {
        stage: StageName,
        status: OutcomeStatus,
    },

    #[error("Sentence already ingested as {existing}")]
    DuplicateSentence { existing: Uuid },

    #[error("Sentence {0} not found")]
    NotFound(Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors that indicate a broken ledger discipline rather than a storage fault.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateOutcome { .. }
                | StoreError::OutOfOrder { .. }
                | StoreError::InvalidStatus { .. }
        )
    }
}

/// The pipeline's view of durable storage.
///
/// Carried as `Arc<dyn ContentStore>` so the coordinator never knows which backend it runs on.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Inserts a new sentence. Fails with `DuplicateSentence` when its dedup key exists.
    async fn insert_sentence(&self, sentence: NewSentence) -> Result<Uuid, StoreError>;

    async fn get_sentence(&self, id: Uuid) -> Result<Option<CandidateSentence>, StoreError>;

    /// Looks a sentence up by its dedup key, so whitespace and case differences still match.
    async fn find_by_text(&self, text: &str) -> Result<Option<CandidateSentence>, StoreError>;

    /// The current cohort for `stage`, without claiming it.
    async fn get_pending(&self, stage: StageName) -> Result<Vec<CandidateSentence>, StoreError>;

    /// Selects up to `limit` cohort members not claimed by a live run and claims them for `run_id`.
    /// Claims older than `ttl` are treated as abandoned.
    async fn claim_pending(
        &self,
        stage: StageName,
        run_id: Uuid,
        limit: usize,
        ttl: Duration,
    ) -> Result<Vec<CandidateSentence>, StoreError>;

    /// Restarts the ttl of the claims `run_id` still holds among `ids` and
    /// returns those ids. Ids missing from the result were taken over by another run.
    async fn touch_claims(
        &self,
        stage: StageName,
        run_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Drops every claim held by `run_id`. Returns how many were released.
    async fn release_claims(&self, run_id: Uuid) -> Result<u64, StoreError>;

    /// Appends one outcome. Enforces gating, status legality and uniqueness.
    async fn record_outcome(
        &self,
        sentence_id: Uuid,
        stage: StageName,
        status: OutcomeStatus,
        detail: &str,
    ) -> Result<StageOutcome, StoreError>;

    /// Rewrites the canonical text and records the spelling outcome atomically.
    /// The first pre-normalization text is kept in `original_text`.
    async fn record_normalization(
        &self,
        sentence_id: Uuid,
        normalized_text: &str,
        detail: &str,
    ) -> Result<StageOutcome, StoreError>;

    async fn outcomes_for(&self, sentence_id: Uuid) -> Result<Vec<StageOutcome>, StoreError>;

    async fn all_outcomes(&self) -> Result<Vec<StageOutcome>, StoreError>;

    /// Sentences with `skill = completed` for the given bank.
    async fn get_production_ready(
        &self,
        bank: TargetBank,
    ) -> Result<Vec<ProductionSentence>, StoreError>;

    /// Removes `error` outcomes (optionally for one stage) so the sentences re-enter their cohort.
    /// Removed rows are archived, never silently dropped.
    async fn reset_errors(&self, stage: Option<StageName>) -> Result<u64, StoreError>;

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError>;
}

/// Non-rejecting stages may only write `completed` or `error`.
pub(crate) fn check_status(stage: StageName, status: OutcomeStatus) -> Result<(), StoreError> {
    let legal = match status {
        OutcomeStatus::Rejected => stage.can_reject(),
        OutcomeStatus::Approved => stage.can_reject(),
        OutcomeStatus::Completed => !stage.can_reject(),
        OutcomeStatus::Error => true,
    };
    if legal {
        Ok(())
    } else {
        Err(StoreError::InvalidStatus { stage, status })
    }
}

/// Gating check shared by both backends: `prior` is the status recorded at the previous stage.
pub(crate) fn check_gate(
    sentence_id: Uuid,
    stage: StageName,
    prior: Option<OutcomeStatus>,
) -> Result<(), StoreError> {
    match stage.previous() {
        None => Ok(()),
        Some(_) if prior.is_some_and(|s| s.is_terminal_positive()) => Ok(()),
        Some(required) => Err(StoreError::OutOfOrder {
            sentence_id,
            stage,
            required,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejecting_stages_cannot_complete() {
        assert!(check_status(StageName::KeywordFilter, OutcomeStatus::Approved).is_ok());
        assert!(check_status(StageName::Truthfulness, OutcomeStatus::Rejected).is_ok());
        assert!(check_status(StageName::KeywordFilter, OutcomeStatus::Completed).is_err());
    }

    #[test]
    fn test_non_rejecting_stages_only_complete_or_error() {
        for stage in [StageName::Spelling, StageName::Tone, StageName::Skill] {
            assert!(check_status(stage, OutcomeStatus::Completed).is_ok());
            assert!(check_status(stage, OutcomeStatus::Error).is_ok());
            assert!(check_status(stage, OutcomeStatus::Rejected).is_err());
            assert!(check_status(stage, OutcomeStatus::Approved).is_err());
        }
    }

    #[test]
    fn test_gate_requires_terminal_positive_prior() {
        let id = Uuid::new_v4();
        assert!(check_gate(id, StageName::KeywordFilter, None).is_ok());
        assert!(check_gate(id, StageName::Truthfulness, Some(OutcomeStatus::Approved)).is_ok());
        assert!(check_gate(id, StageName::Tone, Some(OutcomeStatus::Completed)).is_ok());
        assert!(matches!(
            check_gate(id, StageName::Truthfulness, Some(OutcomeStatus::Rejected)),
            Err(StoreError::OutOfOrder { required: StageName::KeywordFilter, .. })
        ));
        assert!(check_gate(id, StageName::Skill, None).is_err());
    }
}
