use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Idempotent DDL for the pipeline tables. Executed statement by statement.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sentences (
        id                UUID PRIMARY KEY,
        text              TEXT NOT NULL,
        original_text     TEXT,
        target_bank       TEXT NOT NULL CHECK (target_bank IN ('resume', 'cover_letter')),
        source_entity_tag TEXT,
        has_metric        BOOLEAN NOT NULL DEFAULT FALSE,
        dedup_key         TEXT NOT NULL UNIQUE,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stage_outcomes (
        id           BIGSERIAL PRIMARY KEY,
        sentence_id  UUID NOT NULL REFERENCES sentences (id),
        stage        TEXT NOT NULL,
        status       TEXT NOT NULL CHECK (status IN ('approved', 'rejected', 'completed', 'error')),
        detail       TEXT NOT NULL DEFAULT '',
        evaluated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (sentence_id, stage)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outcome_resets (
        id           BIGSERIAL PRIMARY KEY,
        sentence_id  UUID NOT NULL,
        stage        TEXT NOT NULL,
        status       TEXT NOT NULL,
        detail       TEXT NOT NULL,
        evaluated_at TIMESTAMPTZ NOT NULL,
        reset_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stage_claims (
        sentence_id UUID NOT NULL REFERENCES sentences (id),
        stage       TEXT NOT NULL,
        run_id      UUID NOT NULL,
        claimed_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (sentence_id, stage)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pipeline_runs (
        run_id       UUID PRIMARY KEY,
        started_at   TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ,
        status       TEXT NOT NULL,
        report       JSONB NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_stage_outcomes_stage_status ON stage_outcomes (stage, status)",
    "CREATE INDEX IF NOT EXISTS idx_stage_claims_run ON stage_claims (run_id)",
];

/// Creates the pipeline tables if they are missing. Safe to call on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply pipeline schema")?;
    }
    info!("Pipeline schema ready ({} statements)", SCHEMA.len());
    Ok(())
}
