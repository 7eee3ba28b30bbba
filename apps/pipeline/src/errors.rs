use thiserror::Error;

use crate::models::outcome::StageName;
use crate::store::StoreError;

/// Run-level error type.
///
/// Per-sentence failures never surface here: they become `error` or `rejected`
/// outcomes in the ledger. Anything returned as a `PipelineError` stops the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Permanent provider error at stage {stage}: {message}")]
    PermanentProvider { stage: StageName, message: String },

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable code recorded in run reports.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::PermanentProvider { .. } => "PERMANENT_PROVIDER_ERROR",
            PipelineError::DataIntegrity(_) => "DATA_INTEGRITY_ERROR",
            PipelineError::Store(_) => "STORE_ERROR",
            PipelineError::Configuration(_) => "CONFIGURATION_ERROR",
            PipelineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Logs the error at the level its severity warrants.
    pub fn log(&self) {
        match self {
            PipelineError::PermanentProvider { stage, message } => {
                tracing::error!(stage = %stage, "Permanent provider error, aborting run: {message}");
            }
            PipelineError::DataIntegrity(msg) => {
                tracing::error!("Data integrity violation, aborting run: {msg}");
            }
            PipelineError::Store(e) => tracing::error!("Store error: {e}"),
            PipelineError::Configuration(msg) => tracing::error!("Configuration error: {msg}"),
            PipelineError::Internal(e) => tracing::error!("Internal error: {e:?}"),
        }
    }
}

impl From<StoreError> for PipelineError {
    /// Duplicate and out-of-order writes are programming bugs, not storage hiccups.
    fn from(err: StoreError) -> Self {
        if err.is_integrity_violation() {
            PipelineError::DataIntegrity(err.to_string())
        } else {
            PipelineError::Store(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_duplicate_outcome_maps_to_data_integrity() {
        let err: PipelineError = StoreError::DuplicateOutcome {
            sentence_id: Uuid::new_v4(),
            stage: StageName::Tone,
        }
        .into();
        assert_eq!(err.code(), "DATA_INTEGRITY_ERROR");
    }

    #[test]
    fn test_not_found_stays_a_store_error() {
        let err: PipelineError = StoreError::NotFound(Uuid::new_v4()).into();
        assert_eq!(err.code(), "STORE_ERROR");
    }

    #[test]
    fn test_permanent_provider_message_names_stage() {
        let err = PipelineError::PermanentProvider {
            stage: StageName::Truthfulness,
            message: "invalid x-api-key".to_string(),
        };
        assert!(err.to_string().contains("truthfulness"));
        assert_eq!(err.code(), "PERMANENT_PROVIDER_ERROR");
    }
}
