//! Drives the registered stages as concurrent loops over persisted eligibility.
//!
//! Each stage loop repeatedly claims its cohort and processes it. A stage is
//! finished once its upstream stage has finished and a pass finds nothing left
//! to claim. Stages talk to each other only through the store: a commit by
//! stage N is what makes a sentence eligible for stage N+1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::outcome::{verify_ledger, StageName, StageOutcome};
use crate::models::run::{AbortInfo, PipelineRun, RunStatus};
use crate::pipeline::runner::{RunSignals, RunnerSettings, StageRunner};
use crate::stages::Stage;
use crate::store::ContentStore;

/// Upper bound on how long an idle stage waits before re-checking its cohort.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct PipelineCoordinator {
    stages: Vec<Arc<dyn Stage>>,
    store: Arc<dyn ContentStore>,
    settings: RunnerSettings,
}

impl PipelineCoordinator {
    /// Fails unless `stages` covers every stage exactly once, in pipeline order.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        store: Arc<dyn ContentStore>,
        settings: RunnerSettings,
    ) -> Result<Self, PipelineError> {
        let names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        if names != StageName::ALL {
            return Err(PipelineError::Configuration(format!(
                "stage registry must be {:?}, got {:?}",
                StageName::ALL,
                names
            )));
        }
        Ok(Self {
            stages,
            store,
            settings,
        })
    }

    /// Runs every stage until its cohort is drained, the run is cancelled, or a
    /// fatal error aborts it. The returned run is already persisted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let mut run = PipelineRun::start(run_id);
        self.store.save_run(&run).await?;
        info!(run_id = %run_id, "Pipeline run started");

        let signals = RunSignals {
            cancel: cancel.clone(),
            abort: CancellationToken::new(),
        };
        let done: Vec<AtomicBool> = self.stages.iter().map(|_| AtomicBool::new(false)).collect();
        let wake: Vec<Notify> = self.stages.iter().map(|_| Notify::new()).collect();

        let loops = self.stages.iter().enumerate().map(|(index, stage)| {
            let runner = StageRunner::new(
                Arc::clone(stage),
                Arc::clone(&self.store),
                self.settings.clone(),
                run_id,
            );
            self.stage_loop(index, runner, &done, &wake, &signals)
        });
        let results = join_all(loops).await;

        let mut fatal: Option<PipelineError> = None;
        for (outcomes, err) in results {
            for outcome in &outcomes {
                run.record(outcome);
            }
            if let Some(err) = err {
                if fatal.is_none() {
                    fatal = Some(err);
                }
            }
        }

        match self.store.release_claims(run_id).await {
            Ok(released) if released > 0 => {
                info!(run_id = %run_id, released, "Released unfinished claims")
            }
            Ok(_) => {}
            Err(e) => warn!(run_id = %run_id, "Failed to release claims: {e}"),
        }

        match self.store.all_outcomes().await {
            Ok(ledger) => {
                for violation in verify_ledger(&ledger) {
                    error!(run_id = %run_id, ?violation, "Ledger gating violation");
                }
            }
            Err(e) => warn!(run_id = %run_id, "Skipping ledger audit: {e}"),
        }

        match fatal {
            Some(err) => {
                err.log();
                run.close(
                    RunStatus::Aborted,
                    Some(AbortInfo {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }),
                );
            }
            None if cancel.is_cancelled() => run.close(RunStatus::Cancelled, None),
            None => run.close(RunStatus::Completed, None),
        }
        self.store.save_run(&run).await?;

        info!(
            run_id = %run_id,
            status = run.status.as_str(),
            outcomes = run.outcomes_written(),
            errors = run.errors.len(),
            duration_ms = run.duration_ms().unwrap_or_default(),
            "Pipeline run finished"
        );
        Ok(run)
    }

    async fn stage_loop(
        &self,
        index: usize,
        runner: StageRunner,
        done: &[AtomicBool],
        wake: &[Notify],
        signals: &RunSignals,
    ) -> (Vec<StageOutcome>, Option<PipelineError>) {
        let stage = runner.stage_name();
        let downstream = wake.get(index + 1);
        let mut outcomes = Vec::new();
        let mut fatal = None;

        loop {
            if signals.is_stopping() {
                break;
            }
            // Read before the pass: every upstream commit made before the flag
            // flipped is then visible to this pass's claim.
            let upstream_done = index == 0 || done[index - 1].load(Ordering::SeqCst);

            let pass = runner.run_pass(signals).await;
            if !pass.outcomes.is_empty() {
                if let Some(next) = downstream {
                    next.notify_one();
                }
            }
            outcomes.extend(pass.outcomes);

            if let Some(err) = pass.fatal {
                signals.abort.cancel();
                fatal = Some(err);
                break;
            }

            if pass.claimed == 0 {
                if upstream_done {
                    break;
                }
                tokio::select! {
                    _ = wake[index].notified() => {}
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = signals.stopped() => {}
                }
            }
        }

        done[index].store(true, Ordering::SeqCst);
        if let Some(next) = downstream {
            next.notify_one();
        }
        info!(stage = %stage, outcomes = outcomes.len(), "Stage loop finished");
        (outcomes, fatal)
    }
}
