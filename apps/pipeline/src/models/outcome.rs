use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::UnknownVariant;

/// The five evaluation stages, declared in their fixed pipeline order.
/// `Ord` follows declaration order, so sorting by stage sorts by pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    KeywordFilter,
    Truthfulness,
    Spelling,
    Tone,
    Skill,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        StageName::KeywordFilter,
        StageName::Truthfulness,
        StageName::Spelling,
        StageName::Tone,
        StageName::Skill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::KeywordFilter => "keyword_filter",
            StageName::Truthfulness => "truthfulness",
            StageName::Spelling => "spelling",
            StageName::Tone => "tone",
            StageName::Skill => "skill",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The stage whose terminal-positive outcome gates this one.
    pub fn previous(&self) -> Option<StageName> {
        match self.index() {
            0 => None,
            i => Some(Self::ALL[i - 1]),
        }
    }

    /// Only the keyword filter and truthfulness stages may reject a sentence.
    pub fn can_reject(&self) -> bool {
        matches!(self, StageName::KeywordFilter | StageName::Truthfulness)
    }

    /// Stages that call the external classification service.
    pub fn is_ai_backed(&self) -> bool {
        matches!(
            self,
            StageName::Truthfulness | StageName::Tone | StageName::Skill
        )
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str() == s.trim())
            .copied()
            .ok_or_else(|| UnknownVariant::new("stage", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Approved,
    Rejected,
    Completed,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Approved => "approved",
            OutcomeStatus::Rejected => "rejected",
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Error => "error",
        }
    }

    /// `approved` and `completed` let a sentence advance to the next stage.
    pub fn is_terminal_positive(&self) -> bool {
        matches!(self, OutcomeStatus::Approved | OutcomeStatus::Completed)
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approved" => Ok(OutcomeStatus::Approved),
            "rejected" => Ok(OutcomeStatus::Rejected),
            "completed" => Ok(OutcomeStatus::Completed),
            "error" => Ok(OutcomeStatus::Error),
            other => Err(UnknownVariant::new("outcome status", other)),
        }
    }
}

/// One row of the append-only stage ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub sentence_id: Uuid,
    pub stage: StageName,
    pub status: OutcomeStatus,
    pub detail: String,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StageOutcomeRow {
    pub sentence_id: Uuid,
    pub stage: String,
    pub status: String,
    pub detail: String,
    pub evaluated_at: DateTime<Utc>,
}

impl TryFrom<StageOutcomeRow> for StageOutcome {
    type Error = UnknownVariant;

    fn try_from(row: StageOutcomeRow) -> Result<Self, Self::Error> {
        Ok(StageOutcome {
            sentence_id: row.sentence_id,
            stage: row.stage.parse()?,
            status: row.status.parse()?,
            detail: row.detail,
            evaluated_at: row.evaluated_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ledger audit
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerViolation {
    /// Outcome exists for a stage whose predecessor is missing or not terminal-positive.
    UngatedOutcome {
        sentence_id: Uuid,
        stage: StageName,
        prior_status: Option<OutcomeStatus>,
    },
    /// A non-rejecting stage recorded `rejected`.
    IllegalRejection { sentence_id: Uuid, stage: StageName },
    /// More than one outcome for the same (sentence, stage).
    DuplicateOutcome { sentence_id: Uuid, stage: StageName },
}

/// Scans a full ledger and reports every gating-invariant violation.
pub fn verify_ledger(outcomes: &[StageOutcome]) -> Vec<LedgerViolation> {
    let mut by_key: HashMap<(Uuid, StageName), OutcomeStatus> = HashMap::new();
    let mut violations = Vec::new();

    for outcome in outcomes {
        if by_key
            .insert((outcome.sentence_id, outcome.stage), outcome.status)
            .is_some()
        {
            violations.push(LedgerViolation::DuplicateOutcome {
                sentence_id: outcome.sentence_id,
                stage: outcome.stage,
            });
        }
    }

    for outcome in outcomes {
        if outcome.status == OutcomeStatus::Rejected && !outcome.stage.can_reject() {
            violations.push(LedgerViolation::IllegalRejection {
                sentence_id: outcome.sentence_id,
                stage: outcome.stage,
            });
        }

        if let Some(prev) = outcome.stage.previous() {
            let prior_status = by_key.get(&(outcome.sentence_id, prev)).copied();
            if !prior_status.is_some_and(|s| s.is_terminal_positive()) {
                violations.push(LedgerViolation::UngatedOutcome {
                    sentence_id: outcome.sentence_id,
                    stage: outcome.stage,
                    prior_status,
                });
            }
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: Uuid, stage: StageName, status: OutcomeStatus) -> StageOutcome {
        StageOutcome {
            sentence_id: id,
            stage,
            status,
            detail: String::new(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(StageName::KeywordFilter.previous(), None);
        assert_eq!(
            StageName::Spelling.previous(),
            Some(StageName::Truthfulness)
        );
        assert!(StageName::KeywordFilter < StageName::Skill);
    }

    #[test]
    fn test_stage_name_round_trips_through_str() {
        for stage in StageName::ALL {
            assert_eq!(stage.as_str().parse::<StageName>().unwrap(), stage);
        }
        assert!("grammar".parse::<StageName>().is_err());
    }

    #[test]
    fn test_only_first_two_stages_reject() {
        let rejecting: Vec<_> = StageName::ALL.iter().filter(|s| s.can_reject()).collect();
        assert_eq!(
            rejecting,
            vec![&StageName::KeywordFilter, &StageName::Truthfulness]
        );
    }

    #[test]
    fn test_terminal_positive_statuses() {
        assert!(OutcomeStatus::Approved.is_terminal_positive());
        assert!(OutcomeStatus::Completed.is_terminal_positive());
        assert!(!OutcomeStatus::Rejected.is_terminal_positive());
        assert!(!OutcomeStatus::Error.is_terminal_positive());
    }

    #[test]
    fn test_clean_ledger_has_no_violations() {
        let id = Uuid::new_v4();
        let ledger = vec![
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Approved),
            outcome(id, StageName::Truthfulness, OutcomeStatus::Approved),
            outcome(id, StageName::Spelling, OutcomeStatus::Completed),
        ];
        assert!(verify_ledger(&ledger).is_empty());
    }

    #[test]
    fn test_outcome_after_rejection_is_flagged() {
        let id = Uuid::new_v4();
        let ledger = vec![
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Rejected),
            outcome(id, StageName::Truthfulness, OutcomeStatus::Approved),
        ];
        let violations = verify_ledger(&ledger);
        assert_eq!(
            violations,
            vec![LedgerViolation::UngatedOutcome {
                sentence_id: id,
                stage: StageName::Truthfulness,
                prior_status: Some(OutcomeStatus::Rejected),
            }]
        );
    }

    #[test]
    fn test_skipped_stage_is_flagged() {
        let id = Uuid::new_v4();
        let ledger = vec![
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Approved),
            outcome(id, StageName::Spelling, OutcomeStatus::Completed),
        ];
        assert_eq!(verify_ledger(&ledger).len(), 1);
    }

    #[test]
    fn test_rejection_in_non_rejecting_stage_is_flagged() {
        let id = Uuid::new_v4();
        let ledger = vec![
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Approved),
            outcome(id, StageName::Truthfulness, OutcomeStatus::Approved),
            outcome(id, StageName::Spelling, OutcomeStatus::Rejected),
        ];
        assert!(verify_ledger(&ledger).contains(&LedgerViolation::IllegalRejection {
            sentence_id: id,
            stage: StageName::Spelling,
        }));
    }

    #[test]
    fn test_duplicate_outcome_is_flagged() {
        let id = Uuid::new_v4();
        let ledger = vec![
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Approved),
            outcome(id, StageName::KeywordFilter, OutcomeStatus::Approved),
        ];
        assert_eq!(
            verify_ledger(&ledger),
            vec![LedgerViolation::DuplicateOutcome {
                sentence_id: id,
                stage: StageName::KeywordFilter,
            }]
        );
    }
}
