use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::outcome::StageName;
use crate::models::run::{AbortInfo, ErrorRecord, PipelineRun, RunStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageLine {
    pub stage: StageName,
    pub approved: usize,
    pub rejected: usize,
    pub completed: usize,
    pub error: usize,
}

/// Operator-facing summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub stages: Vec<StageLine>,
    pub errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortInfo>,
}

impl From<&PipelineRun> for RunReport {
    fn from(run: &PipelineRun) -> Self {
        let stages = StageName::ALL
            .iter()
            .map(|stage| {
                let counts = run.counts(*stage);
                StageLine {
                    stage: *stage,
                    approved: counts.approved,
                    rejected: counts.rejected,
                    completed: counts.completed,
                    error: counts.error,
                }
            })
            .collect();

        Self {
            run_id: run.run_id,
            status: run.status,
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_ms: run.duration_ms(),
            stages,
            errors: run.errors.clone(),
            abort: run.abort.clone(),
        }
    }
}

impl RunReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let duration = self
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "run {}  status={}  duration={duration}", self.run_id, self.status.as_str());
        if let Some(abort) = &self.abort {
            let _ = writeln!(out, "aborted: {} {}", abort.code, abort.message);
        }

        let _ = writeln!(
            out,
            "{:<16}{:>10}{:>10}{:>11}{:>7}",
            "stage", "approved", "rejected", "completed", "error"
        );
        for line in &self.stages {
            let _ = writeln!(
                out,
                "{:<16}{:>10}{:>10}{:>11}{:>7}",
                line.stage.as_str(),
                line.approved,
                line.rejected,
                line.completed,
                line.error
            );
        }

        if !self.errors.is_empty() {
            let _ = writeln!(out, "errors:");
            for e in &self.errors {
                let _ = writeln!(out, "  {} {} {}", e.sentence_id, e.stage, e.cause);
            }
        }
        out
    }
}
