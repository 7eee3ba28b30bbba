use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::ingest::dedup::dedup_key;
use crate::models::outcome::{OutcomeStatus, StageName, StageOutcome, StageOutcomeRow};
use crate::models::run::PipelineRun;
use crate::models::sentence::{
    CandidateSentence, NewSentence, ProductionRow, ProductionSentence, SentenceRow, TargetBank,
};
use crate::store::{check_gate, check_status, ContentStore, StoreError};

/// Eligibility predicate shared by `get_pending` and `claim_pending`.
/// `$1` is the stage, `$2` the previous stage (NULL for the first stage).
const COHORT_PREDICATE: &str = r#"
    NOT EXISTS (
        SELECT 1 FROM stage_outcomes o
        WHERE o.sentence_id = s.id AND o.stage = $1
    )
    AND (
        $2::text IS NULL OR EXISTS (
            SELECT 1 FROM stage_outcomes p
            WHERE p.sentence_id = s.id AND p.stage = $2
              AND p.status IN ('approved', 'completed')
        )
    )
"#;

/// Postgres-backed ledger. Every commit runs in a transaction that locks the
/// sentence row, re-checks gating and relies on `UNIQUE (sentence_id, stage)`
/// as the final guard against double writes.
#[derive(Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_sentences(rows: Vec<SentenceRow>) -> Result<Vec<CandidateSentence>, StoreError> {
    rows.into_iter()
        .map(|row| CandidateSentence::try_from(row).map_err(StoreError::from))
        .collect()
}

fn to_outcomes(rows: Vec<StageOutcomeRow>) -> Result<Vec<StageOutcome>, StoreError> {
    rows.into_iter()
        .map(|row| StageOutcome::try_from(row).map_err(StoreError::from))
        .collect()
}

/// Gated append inside an open transaction.
async fn append_outcome(
    conn: &mut PgConnection,
    sentence_id: Uuid,
    stage: StageName,
    status: OutcomeStatus,
    detail: &str,
) -> Result<StageOutcome, StoreError> {
    check_status(stage, status)?;

    let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM sentences WHERE id = $1 FOR UPDATE")
        .bind(sentence_id)
        .fetch_optional(&mut *conn)
        .await?;
    if locked.is_none() {
        return Err(StoreError::NotFound(sentence_id));
    }

    let prior = match stage.previous() {
        Some(prev) => {
            let status: Option<String> = sqlx::query_scalar(
                "SELECT status FROM stage_outcomes WHERE sentence_id = $1 AND stage = $2",
            )
            .bind(sentence_id)
            .bind(prev.as_str())
            .fetch_optional(&mut *conn)
            .await?;
            status.map(|s| s.parse::<OutcomeStatus>()).transpose()?
        }
        None => None,
    };
    check_gate(sentence_id, stage, prior)?;

    let row: Option<StageOutcomeRow> = sqlx::query_as(
        r#"
        INSERT INTO stage_outcomes (sentence_id, stage, status, detail)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (sentence_id, stage) DO NOTHING
        RETURNING sentence_id, stage, status, detail, evaluated_at
        "#,
    )
    .bind(sentence_id)
    .bind(stage.as_str())
    .bind(status.as_str())
    .bind(detail)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(StageOutcome::try_from(row)?),
        None => Err(StoreError::DuplicateOutcome { sentence_id, stage }),
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn insert_sentence(&self, sentence: NewSentence) -> Result<Uuid, StoreError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO sentences (id, text, target_bank, source_entity_tag, has_metric, dedup_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dedup_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&sentence.text)
        .bind(sentence.target_bank.as_str())
        .bind(&sentence.source_entity_tag)
        .bind(sentence.has_metric)
        .bind(&sentence.dedup_key)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing: Uuid = sqlx::query_scalar("SELECT id FROM sentences WHERE dedup_key = $1")
            .bind(&sentence.dedup_key)
            .fetch_one(&self.pool)
            .await?;
        Err(StoreError::DuplicateSentence { existing })
    }

    async fn get_sentence(&self, id: Uuid) -> Result<Option<CandidateSentence>, StoreError> {
        let row: Option<SentenceRow> = sqlx::query_as(
            r#"
            SELECT id, text, original_text, target_bank, source_entity_tag, has_metric, created_at
            FROM sentences WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CandidateSentence::try_from).transpose()?)
    }

    async fn find_by_text(&self, text: &str) -> Result<Option<CandidateSentence>, StoreError> {
        let row: Option<SentenceRow> = sqlx::query_as(
            r#"
            SELECT id, text, original_text, target_bank, source_entity_tag, has_metric, created_at
            FROM sentences WHERE dedup_key = $1
            "#,
        )
        .bind(dedup_key(text))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CandidateSentence::try_from).transpose()?)
    }

    async fn get_pending(&self, stage: StageName) -> Result<Vec<CandidateSentence>, StoreError> {
        let query = format!(
            r#"
            SELECT s.id, s.text, s.original_text, s.target_bank, s.source_entity_tag,
                   s.has_metric, s.created_at
            FROM sentences s
            WHERE {COHORT_PREDICATE}
            ORDER BY s.created_at, s.id
            "#
        );
        let rows: Vec<SentenceRow> = sqlx::query_as(&query)
            .bind(stage.as_str())
            .bind(stage.previous().map(|p| p.as_str()))
            .fetch_all(&self.pool)
            .await?;
        to_sentences(rows)
    }

    async fn claim_pending(
        &self,
        stage: StageName,
        run_id: Uuid,
        limit: usize,
        ttl: Duration,
    ) -> Result<Vec<CandidateSentence>, StoreError> {
        // Rows locked by a concurrent claimer are skipped, not waited on.
        let query = format!(
            r#"
            WITH candidates AS (
                SELECT s.id
                FROM sentences s
                WHERE {COHORT_PREDICATE}
                  AND NOT EXISTS (
                      SELECT 1 FROM stage_claims c
                      WHERE c.sentence_id = s.id AND c.stage = $1
                        AND c.claimed_at > now() - make_interval(secs => $4)
                  )
                ORDER BY s.created_at, s.id
                LIMIT $3
                FOR UPDATE OF s SKIP LOCKED
            ),
            claimed AS (
                INSERT INTO stage_claims (sentence_id, stage, run_id, claimed_at)
                SELECT id, $1, $5, now() FROM candidates
                ON CONFLICT (sentence_id, stage) DO UPDATE
                    SET run_id = EXCLUDED.run_id, claimed_at = EXCLUDED.claimed_at
                    WHERE stage_claims.claimed_at <= now() - make_interval(secs => $4)
                RETURNING sentence_id
            )
            SELECT s.id, s.text, s.original_text, s.target_bank, s.source_entity_tag,
                   s.has_metric, s.created_at
            FROM sentences s
            JOIN claimed ON claimed.sentence_id = s.id
            ORDER BY s.created_at, s.id
            "#
        );

        let rows: Vec<SentenceRow> = sqlx::query_as(&query)
            .bind(stage.as_str())
            .bind(stage.previous().map(|p| p.as_str()))
            .bind(limit as i64)
            .bind(ttl.as_secs_f64())
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        debug!(stage = %stage, run_id = %run_id, claimed = rows.len(), "Claimed cohort");
        to_sentences(rows)
    }

    async fn touch_claims(
        &self,
        stage: StageName,
        run_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Uuid>, StoreError> {
        let held: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE stage_claims SET claimed_at = now()
            WHERE stage = $1 AND run_id = $2 AND sentence_id = ANY($3)
            RETURNING sentence_id
            "#,
        )
        .bind(stage.as_str())
        .bind(run_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(held)
    }

    async fn release_claims(&self, run_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM stage_claims WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn record_outcome(
        &self,
        sentence_id: Uuid,
        stage: StageName,
        status: OutcomeStatus,
        detail: &str,
    ) -> Result<StageOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let outcome = append_outcome(&mut tx, sentence_id, stage, status, detail).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn record_normalization(
        &self,
        sentence_id: Uuid,
        normalized_text: &str,
        detail: &str,
    ) -> Result<StageOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let outcome = append_outcome(
            &mut tx,
            sentence_id,
            StageName::Spelling,
            OutcomeStatus::Completed,
            detail,
        )
        .await?;

        sqlx::query(
            r#"
            UPDATE sentences
            SET original_text = COALESCE(original_text, text), text = $2
            WHERE id = $1 AND text <> $2
            "#,
        )
        .bind(sentence_id)
        .bind(normalized_text)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn outcomes_for(&self, sentence_id: Uuid) -> Result<Vec<StageOutcome>, StoreError> {
        let rows: Vec<StageOutcomeRow> = sqlx::query_as(
            r#"
            SELECT sentence_id, stage, status, detail, evaluated_at
            FROM stage_outcomes WHERE sentence_id = $1
            "#,
        )
        .bind(sentence_id)
        .fetch_all(&self.pool)
        .await?;

        let mut outcomes = to_outcomes(rows)?;
        outcomes.sort_by_key(|o| o.stage);
        Ok(outcomes)
    }

    async fn all_outcomes(&self) -> Result<Vec<StageOutcome>, StoreError> {
        let rows: Vec<StageOutcomeRow> = sqlx::query_as(
            "SELECT sentence_id, stage, status, detail, evaluated_at FROM stage_outcomes ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        to_outcomes(rows)
    }

    async fn get_production_ready(
        &self,
        bank: TargetBank,
    ) -> Result<Vec<ProductionSentence>, StoreError> {
        let rows: Vec<ProductionRow> = sqlx::query_as(
            r#"
            SELECT s.id, s.text, s.target_bank, t.detail AS tone, k.detail AS skills
            FROM sentences s
            JOIN stage_outcomes k
              ON k.sentence_id = s.id AND k.stage = 'skill' AND k.status = 'completed'
            JOIN stage_outcomes t
              ON t.sentence_id = s.id AND t.stage = 'tone'
            WHERE s.target_bank = $1
            ORDER BY s.created_at, s.id
            "#,
        )
        .bind(bank.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| ProductionSentence::try_from(row).map_err(StoreError::from))
            .collect()
    }

    async fn reset_errors(&self, stage: Option<StageName>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            WITH removed AS (
                DELETE FROM stage_outcomes
                WHERE status = 'error' AND ($1::text IS NULL OR stage = $1)
                RETURNING sentence_id, stage, status, detail, evaluated_at
            )
            INSERT INTO outcome_resets (sentence_id, stage, status, detail, evaluated_at)
            SELECT sentence_id, stage, status, detail, evaluated_at FROM removed
            "#,
        )
        .bind(stage.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let report = serde_json::to_value(run)?;
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (run_id, started_at, completed_at, status, report)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO UPDATE
                SET completed_at = EXCLUDED.completed_at,
                    status = EXCLUDED.status,
                    report = EXCLUDED.report
            "#,
        )
        .bind(run.run_id)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.status.as_str())
        .bind(report)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>, StoreError> {
        let report: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT report FROM pipeline_runs WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(report.map(serde_json::from_value).transpose()?)
    }
}
