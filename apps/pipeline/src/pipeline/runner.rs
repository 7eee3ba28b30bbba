//! Generic stage driver: claims a cohort, batches it, invokes the stage and
//! commits every verdict. One `StageRunner` per stage per run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classifier::ProviderError;
use crate::errors::PipelineError;
use crate::models::outcome::{OutcomeStatus, StageName, StageOutcome};
use crate::models::sentence::CandidateSentence;
use crate::pipeline::retry::RetryPolicy;
use crate::stages::{Stage, Verdict};
use crate::store::ContentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    pub batch_size: usize,
    /// Concurrent batches per AI stage. Local stages always run one batch at a time.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    /// Maximum sentences claimed per pass.
    pub cohort_limit: usize,
    pub claim_ttl: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            concurrency: 4,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            cohort_limit: 200,
            claim_ttl: Duration::from_secs(900),
        }
    }
}

/// Stop signals shared by every loop of a run.
///
/// `cancel` is graceful: in-flight calls finish and commit, nothing new starts.
/// `abort` is immediate: in-flight calls are dropped uncommitted.
#[derive(Debug, Clone, Default)]
pub struct RunSignals {
    pub cancel: CancellationToken,
    pub abort: CancellationToken,
}

impl RunSignals {
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.abort.cancelled() => {}
        }
    }
}

/// Result of one claim-and-process pass.
#[derive(Debug, Default)]
pub struct PassResult {
    pub claimed: usize,
    pub outcomes: Vec<StageOutcome>,
    /// Set when the pass hit a run-ending error. Outcomes committed before it are still listed.
    pub fatal: Option<PipelineError>,
}

pub struct StageRunner {
    stage: Arc<dyn Stage>,
    store: Arc<dyn ContentStore>,
    settings: RunnerSettings,
    run_id: Uuid,
}

impl StageRunner {
    pub fn new(
        stage: Arc<dyn Stage>,
        store: Arc<dyn ContentStore>,
        settings: RunnerSettings,
        run_id: Uuid,
    ) -> Self {
        Self {
            stage,
            store,
            settings,
            run_id,
        }
    }

    pub fn stage_name(&self) -> StageName {
        self.stage.name()
    }

    /// Claims the current cohort and processes it to completion.
    pub async fn run_pass(&self, signals: &RunSignals) -> PassResult {
        let stage = self.stage.name();
        let cohort = match self
            .store
            .claim_pending(stage, self.run_id, self.settings.cohort_limit, self.settings.claim_ttl)
            .await
        {
            Ok(cohort) => cohort,
            Err(e) => {
                return PassResult {
                    fatal: Some(e.into()),
                    ..PassResult::default()
                }
            }
        };
        if cohort.is_empty() {
            return PassResult::default();
        }

        let claimed = cohort.len();
        let ids: Vec<Uuid> = cohort.iter().map(|s| s.id).collect();
        let batches = self.stage.partition(cohort, self.settings.batch_size);
        let concurrency = if self.stage.is_local() {
            1
        } else {
            self.settings.concurrency.max(1)
        };
        debug!(
            run_id = %self.run_id,
            stage = %stage,
            claimed,
            batches = batches.len(),
            concurrency,
            "Processing cohort"
        );

        let finished = CancellationToken::new();
        let work = async {
            let results: Vec<Result<Vec<StageOutcome>, (Vec<StageOutcome>, PipelineError)>> =
                stream::iter(batches)
                    .map(|batch| self.run_batch(batch, signals))
                    .buffer_unordered(concurrency)
                    .collect()
                    .await;
            finished.cancel();
            results
        };
        let (results, ()) = tokio::join!(work, self.hold_claims(&ids, &finished));

        let mut pass = PassResult {
            claimed,
            ..PassResult::default()
        };
        for result in results {
            match result {
                Ok(outcomes) => pass.outcomes.extend(outcomes),
                Err((outcomes, err)) => {
                    pass.outcomes.extend(outcomes);
                    if pass.fatal.is_none() {
                        pass.fatal = Some(err);
                    } else {
                        err.log();
                    }
                }
            }
        }
        pass
    }

    /// Restarts the claim ttl every third of its length until the pass is finished,
    /// so batches queued behind slow calls are not reclaimed by another run.
    async fn hold_claims(&self, ids: &[Uuid], finished: &CancellationToken) {
        let stage = self.stage.name();
        let interval = self.settings.claim_ttl / 3;
        loop {
            tokio::select! {
                _ = finished.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = self.store.touch_claims(stage, self.run_id, ids).await {
                warn!(run_id = %self.run_id, stage = %stage, "Failed to refresh claims: {e}");
            }
        }
    }

    /// Drops the items whose claim another run has taken over.
    async fn keep_held(&self, pending: &mut Vec<CandidateSentence>) -> Result<(), PipelineError> {
        let stage = self.stage.name();
        let ids: Vec<Uuid> = pending.iter().map(|s| s.id).collect();
        let held = self.store.touch_claims(stage, self.run_id, &ids).await?;
        if held.len() < pending.len() {
            warn!(
                run_id = %self.run_id,
                stage = %stage,
                lost = pending.len() - held.len(),
                "Claims taken over by another run, skipping those sentences"
            );
            pending.retain(|s| held.contains(&s.id));
        }
        Ok(())
    }

    /// Runs one batch under the retry budget.
    ///
    /// Items with a definitive verdict commit as soon as it arrives; only the
    /// remainder is resubmitted. Items still unresolved when the budget runs out
    /// commit as `error`. On a fatal error the already-committed outcomes are
    /// returned alongside it.
    async fn run_batch(
        &self,
        batch: Vec<CandidateSentence>,
        signals: &RunSignals,
    ) -> Result<Vec<StageOutcome>, (Vec<StageOutcome>, PipelineError)> {
        let stage = self.stage.name();
        let mut committed: Vec<StageOutcome> = Vec::with_capacity(batch.len());
        let mut pending = batch;
        let mut causes: HashMap<Uuid, String> = HashMap::new();
        let mut attempts = 0u32;

        while !pending.is_empty() {
            if signals.is_stopping() {
                return Ok(committed);
            }
            tokio::select! {
                biased;
                _ = signals.stopped() => return Ok(committed),
                _ = self.stage.ready(&pending) => {}
            }
            if let Err(e) = self.keep_held(&mut pending).await {
                return Err((committed, e));
            }
            if pending.is_empty() {
                break;
            }
            attempts += 1;

            let call = tokio::time::timeout(
                self.settings.call_timeout,
                self.stage.classify_batch(&pending),
            );
            let response = tokio::select! {
                biased;
                _ = signals.abort.cancelled() => return Ok(committed),
                response = call => response,
            };

            match response {
                Err(_) => {
                    let cause = format!(
                        "timeout after {}s",
                        self.settings.call_timeout.as_secs_f32()
                    );
                    for sentence in &pending {
                        causes.insert(sentence.id, cause.clone());
                    }
                }
                Ok(Err(ProviderError::Permanent(message))) => {
                    return Err((committed, PipelineError::PermanentProvider { stage, message }));
                }
                Ok(Err(ProviderError::Transient(message))) => {
                    for sentence in &pending {
                        causes.insert(sentence.id, message.clone());
                    }
                }
                Ok(Ok(verdicts)) => {
                    let mut verdicts = verdicts.into_iter();
                    let mut unresolved = Vec::new();
                    for sentence in pending.drain(..) {
                        match verdicts.next() {
                            Some(Verdict::Retry(cause)) => {
                                causes.insert(sentence.id, cause);
                                unresolved.push(sentence);
                            }
                            None => {
                                causes.insert(sentence.id, "missing-verdict".to_string());
                                unresolved.push(sentence);
                            }
                            Some(verdict) => match self.commit(&sentence, verdict).await {
                                Ok(outcome) => committed.push(outcome),
                                Err(e) => return Err((committed, e)),
                            },
                        }
                    }
                    pending = unresolved;
                }
            }

            if pending.is_empty() {
                break;
            }

            if !self.settings.retry.allows_another(attempts) {
                for sentence in pending.drain(..) {
                    let cause = causes
                        .remove(&sentence.id)
                        .unwrap_or_else(|| "retries exhausted".to_string());
                    warn!(
                        run_id = %self.run_id,
                        stage = %stage,
                        sentence_id = %sentence.id,
                        attempts,
                        "Retry budget exhausted: {cause}"
                    );
                    match self
                        .store
                        .record_outcome(sentence.id, stage, OutcomeStatus::Error, &cause)
                        .await
                    {
                        Ok(outcome) => committed.push(outcome),
                        Err(e) => return Err((committed, e.into())),
                    }
                }
                break;
            }

            let delay = self.settings.retry.delay_for(attempts);
            warn!(
                run_id = %self.run_id,
                stage = %stage,
                batch_size = pending.len(),
                attempt = attempts,
                "Batch attempt failed, retrying after {}ms",
                delay.as_millis()
            );
            tokio::select! {
                _ = signals.stopped() => return Ok(committed),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(committed)
    }

    async fn commit(
        &self,
        sentence: &CandidateSentence,
        verdict: Verdict,
    ) -> Result<StageOutcome, PipelineError> {
        let stage = self.stage.name();
        let Some(status) = verdict.status() else {
            return Err(PipelineError::Internal(anyhow::anyhow!(
                "retry verdict reached commit for sentence {}",
                sentence.id
            )));
        };
        let outcome = match verdict {
            Verdict::Normalized { text, detail } => {
                self.store
                    .record_normalization(sentence.id, &text, &detail)
                    .await?
            }
            Verdict::Approved(detail)
            | Verdict::Rejected(detail)
            | Verdict::Completed(detail)
            | Verdict::Retry(detail) => {
                self.store
                    .record_outcome(sentence.id, stage, status, &detail)
                    .await?
            }
        };
        Ok(outcome)
    }
}
