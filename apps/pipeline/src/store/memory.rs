use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ingest::dedup::dedup_key;
use crate::models::outcome::{OutcomeStatus, StageName, StageOutcome};
use crate::models::run::PipelineRun;
use crate::models::sentence::{CandidateSentence, NewSentence, ProductionSentence, TargetBank};
use crate::store::{check_gate, check_status, ContentStore, StoreError};

struct Claim {
    run_id: Uuid,
    claimed_at: Instant,
}

#[derive(Default)]
struct State {
    sentences: HashMap<Uuid, CandidateSentence>,
    /// Insertion order, so cohorts come back oldest-first like the SQL backend.
    order: Vec<Uuid>,
    dedup: HashMap<String, Uuid>,
    outcomes: HashMap<(Uuid, StageName), StageOutcome>,
    ledger: Vec<(Uuid, StageName)>,
    resets: Vec<StageOutcome>,
    claims: HashMap<(Uuid, StageName), Claim>,
    runs: HashMap<Uuid, PipelineRun>,
}

impl State {
    fn status(&self, id: Uuid, stage: StageName) -> Option<OutcomeStatus> {
        self.outcomes.get(&(id, stage)).map(|o| o.status)
    }

    fn is_eligible(&self, id: Uuid, stage: StageName) -> bool {
        if self.outcomes.contains_key(&(id, stage)) {
            return false;
        }
        match stage.previous() {
            None => true,
            Some(prev) => self
                .status(id, prev)
                .is_some_and(|s| s.is_terminal_positive()),
        }
    }

    fn cohort(&self, stage: StageName) -> impl Iterator<Item = &CandidateSentence> + '_ {
        self.order
            .iter()
            .filter(move |id| self.is_eligible(**id, stage))
            .filter_map(|id| self.sentences.get(id))
    }

    fn append(
        &mut self,
        sentence_id: Uuid,
        stage: StageName,
        status: OutcomeStatus,
        detail: &str,
    ) -> Result<StageOutcome, StoreError> {
        check_status(stage, status)?;
        if !self.sentences.contains_key(&sentence_id) {
            return Err(StoreError::NotFound(sentence_id));
        }
        if self.outcomes.contains_key(&(sentence_id, stage)) {
            return Err(StoreError::DuplicateOutcome { sentence_id, stage });
        }
        let prior = stage.previous().and_then(|prev| self.status(sentence_id, prev));
        check_gate(sentence_id, stage, prior)?;

        let outcome = StageOutcome {
            sentence_id,
            stage,
            status,
            detail: detail.to_string(),
            evaluated_at: Utc::now(),
        };
        self.outcomes.insert((sentence_id, stage), outcome.clone());
        self.ledger.push((sentence_id, stage));
        Ok(outcome)
    }
}

/// `ContentStore` held entirely in process memory.
///
/// Used by `run --dry-run` and by tests. Enforces the same ledger rules as the
/// Postgres backend, and counts outcome writes so tests can assert idempotence.
#[derive(Default)]
pub struct InMemoryContentStore {
    state: Mutex<State>,
    outcome_writes: AtomicU64,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryContentStore {
    /// Number of outcome rows successfully written since construction.
    pub fn outcome_writes(&self) -> u64 {
        self.outcome_writes.load(Ordering::SeqCst)
    }

    /// Outcomes archived by `reset_errors`.
    pub async fn archived_resets(&self) -> Vec<StageOutcome> {
        self.state.lock().await.resets.clone()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn insert_sentence(&self, sentence: NewSentence) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.dedup.get(&sentence.dedup_key) {
            return Err(StoreError::DuplicateSentence {
                existing: *existing,
            });
        }

        let id = Uuid::new_v4();
        state.dedup.insert(sentence.dedup_key, id);
        state.sentences.insert(
            id,
            CandidateSentence {
                id,
                text: sentence.text,
                original_text: None,
                target_bank: sentence.target_bank,
                source_entity_tag: sentence.source_entity_tag,
                has_metric: sentence.has_metric,
                created_at: Utc::now(),
            },
        );
        state.order.push(id);
        Ok(id)
    }

    async fn get_sentence(&self, id: Uuid) -> Result<Option<CandidateSentence>, StoreError> {
        Ok(self.state.lock().await.sentences.get(&id).cloned())
    }

    async fn find_by_text(&self, text: &str) -> Result<Option<CandidateSentence>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .dedup
            .get(&dedup_key(text))
            .and_then(|id| state.sentences.get(id))
            .cloned())
    }

    async fn get_pending(&self, stage: StageName) -> Result<Vec<CandidateSentence>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cohort(stage).cloned().collect())
    }

    async fn claim_pending(
        &self,
        stage: StageName,
        run_id: Uuid,
        limit: usize,
        ttl: Duration,
    ) -> Result<Vec<CandidateSentence>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let claimable: Vec<CandidateSentence> = state
            .cohort(stage)
            .filter(|s| match state.claims.get(&(s.id, stage)) {
                Some(claim) => now.duration_since(claim.claimed_at) >= ttl,
                None => true,
            })
            .take(limit)
            .cloned()
            .collect();

        for sentence in &claimable {
            state.claims.insert(
                (sentence.id, stage),
                Claim {
                    run_id,
                    claimed_at: now,
                },
            );
        }
        Ok(claimable)
    }

    async fn touch_claims(
        &self,
        stage: StageName,
        run_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(claim) = state.claims.get_mut(&(*id, stage)) {
                if claim.run_id == run_id {
                    claim.claimed_at = now;
                    held.push(*id);
                }
            }
        }
        Ok(held)
    }

    async fn release_claims(&self, run_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.claims.len();
        state.claims.retain(|_, claim| claim.run_id != run_id);
        Ok((before - state.claims.len()) as u64)
    }

    async fn record_outcome(
        &self,
        sentence_id: Uuid,
        stage: StageName,
        status: OutcomeStatus,
        detail: &str,
    ) -> Result<StageOutcome, StoreError> {
        let outcome = self
            .state
            .lock()
            .await
            .append(sentence_id, stage, status, detail)?;
        self.outcome_writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn record_normalization(
        &self,
        sentence_id: Uuid,
        normalized_text: &str,
        detail: &str,
    ) -> Result<StageOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let outcome = state.append(
            sentence_id,
            StageName::Spelling,
            OutcomeStatus::Completed,
            detail,
        )?;

        if let Some(sentence) = state.sentences.get_mut(&sentence_id) {
            if sentence.text != normalized_text {
                let previous = std::mem::replace(&mut sentence.text, normalized_text.to_string());
                sentence.original_text.get_or_insert(previous);
            }
        }
        self.outcome_writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn outcomes_for(&self, sentence_id: Uuid) -> Result<Vec<StageOutcome>, StoreError> {
        let state = self.state.lock().await;
        let mut outcomes: Vec<StageOutcome> = StageName::ALL
            .iter()
            .filter_map(|stage| state.outcomes.get(&(sentence_id, *stage)).cloned())
            .collect();
        outcomes.sort_by_key(|o| o.stage);
        Ok(outcomes)
    }

    async fn all_outcomes(&self) -> Result<Vec<StageOutcome>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter_map(|key| state.outcomes.get(key).cloned())
            .collect())
    }

    async fn get_production_ready(
        &self,
        bank: TargetBank,
    ) -> Result<Vec<ProductionSentence>, StoreError> {
        let state = self.state.lock().await;
        let ready = state
            .order
            .iter()
            .filter_map(|id| state.sentences.get(id))
            .filter(|s| s.target_bank == bank)
            .filter_map(|s| {
                let skill = state.outcomes.get(&(s.id, StageName::Skill))?;
                if skill.status != OutcomeStatus::Completed {
                    return None;
                }
                let tone = state.outcomes.get(&(s.id, StageName::Tone))?;
                Some(ProductionSentence::from_details(
                    s.id,
                    s.text.clone(),
                    s.target_bank,
                    &tone.detail,
                    &skill.detail,
                ))
            })
            .collect();
        Ok(ready)
    }

    async fn reset_errors(&self, stage: Option<StageName>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let targets: Vec<(Uuid, StageName)> = state
            .outcomes
            .iter()
            .filter(|(_, o)| o.status == OutcomeStatus::Error)
            .filter(|(_, o)| stage.map_or(true, |s| s == o.stage))
            .map(|(key, _)| *key)
            .collect();

        for key in &targets {
            if let Some(outcome) = state.outcomes.remove(key) {
                state.resets.push(outcome);
            }
        }
        state.ledger.retain(|key| !targets.contains(key));
        Ok(targets.len() as u64)
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .runs
            .insert(run.run_id, run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.state.lock().await.runs.get(&run_id).cloned())
    }
}
