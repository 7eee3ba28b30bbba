use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::outcome::{OutcomeStatus, StageName, StageOutcome};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub approved: usize,
    pub rejected: usize,
    pub completed: usize,
    pub error: usize,
}

impl StageCounts {
    pub fn bump(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Approved => self.approved += 1,
            OutcomeStatus::Rejected => self.rejected += 1,
            OutcomeStatus::Completed => self.completed += 1,
            OutcomeStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.approved + self.rejected + self.completed + self.error
    }
}

/// A sentence that ended the run with a terminal `error` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub sentence_id: Uuid,
    pub stage: StageName,
    pub cause: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Why a run stopped before draining its cohorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortInfo {
    pub code: String,
    pub message: String,
}

/// One coordinator invocation: counts every outcome it wrote and every sentence it errored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stage_counts: BTreeMap<StageName, StageCounts>,
    pub errors: Vec<ErrorRecord>,
    pub abort: Option<AbortInfo>,
}

impl PipelineRun {
    pub fn start(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            stage_counts: StageName::ALL
                .iter()
                .map(|stage| (*stage, StageCounts::default()))
                .collect(),
            errors: Vec::new(),
            abort: None,
        }
    }

    pub fn record(&mut self, outcome: &StageOutcome) {
        self.stage_counts
            .entry(outcome.stage)
            .or_default()
            .bump(outcome.status);

        if outcome.status == OutcomeStatus::Error {
            self.errors.push(ErrorRecord {
                sentence_id: outcome.sentence_id,
                stage: outcome.stage,
                cause: outcome.detail.clone(),
            });
        }
    }

    pub fn close(&mut self, status: RunStatus, abort: Option<AbortInfo>) {
        self.status = status;
        self.abort = abort;
        self.completed_at = Some(Utc::now());
    }

    pub fn counts(&self, stage: StageName) -> StageCounts {
        self.stage_counts.get(&stage).copied().unwrap_or_default()
    }

    /// Total outcome rows written during this run.
    pub fn outcomes_written(&self) -> usize {
        self.stage_counts.values().map(StageCounts::total).sum()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
