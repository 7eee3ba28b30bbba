use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::pipeline::{RetryPolicy, RunnerSettings};

/// Application configuration loaded from environment variables.
///
/// Connection settings are optional here so that offline commands (`--dry-run`,
/// `corpus-check`) work without them; commands that need one call `require_*`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub truth_corpus_path: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    pub rust_log: String,
    pub tuning: PipelineTuning,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Config {
            database_url: non_empty("DATABASE_URL"),
            anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
            truth_corpus_path: non_empty("TRUTH_CORPUS_PATH").map(PathBuf::from),
            rules_path: non_empty("PIPELINE_RULES_PATH").map(PathBuf::from),
            rust_log: non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            tuning: PipelineTuning::from_lookup(&lookup)?,
        })
    }

    pub fn require_database_url(&self) -> Result<&str> {
        required(self.database_url.as_deref(), "DATABASE_URL")
    }

    pub fn require_api_key(&self) -> Result<&str> {
        required(self.anthropic_api_key.as_deref(), "ANTHROPIC_API_KEY")
    }

    pub fn require_corpus_path(&self) -> Result<&PathBuf> {
        self.truth_corpus_path
            .as_ref()
            .context("Required environment variable 'TRUTH_CORPUS_PATH' is not set")
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value.with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Batching, concurrency and retry knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTuning {
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
    pub cohort_limit: usize,
    pub claim_ttl_secs: u64,
    pub requests_per_minute: NonZeroU32,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            batch_size: 5,
            concurrency: 4,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            call_timeout_secs: 60,
            cohort_limit: 200,
            claim_ttl_secs: 900,
            requests_per_minute: NonZeroU32::MIN.saturating_add(49),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        _ => Ok(default),
    }
}

impl PipelineTuning {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let tuning = Self {
            batch_size: parse_or(lookup, "PIPELINE_BATCH_SIZE", d.batch_size)?,
            concurrency: parse_or(lookup, "PIPELINE_CONCURRENCY", d.concurrency)?,
            max_attempts: parse_or(lookup, "PIPELINE_MAX_ATTEMPTS", d.max_attempts)?,
            base_delay_ms: parse_or(lookup, "PIPELINE_BASE_DELAY_MS", d.base_delay_ms)?,
            max_delay_ms: parse_or(lookup, "PIPELINE_MAX_DELAY_MS", d.max_delay_ms)?,
            call_timeout_secs: parse_or(lookup, "PIPELINE_CALL_TIMEOUT_SECS", d.call_timeout_secs)?,
            cohort_limit: parse_or(lookup, "PIPELINE_COHORT_LIMIT", d.cohort_limit)?,
            claim_ttl_secs: parse_or(lookup, "PIPELINE_CLAIM_TTL_SECS", d.claim_ttl_secs)?,
            requests_per_minute: parse_or(lookup, "LLM_REQUESTS_PER_MINUTE", d.requests_per_minute)?,
        };
        anyhow::ensure!(tuning.batch_size > 0, "PIPELINE_BATCH_SIZE must be at least 1");
        anyhow::ensure!(tuning.concurrency > 0, "PIPELINE_CONCURRENCY must be at least 1");
        anyhow::ensure!(tuning.max_attempts > 0, "PIPELINE_MAX_ATTEMPTS must be at least 1");
        anyhow::ensure!(
            tuning.base_delay_ms <= tuning.max_delay_ms,
            "PIPELINE_BASE_DELAY_MS must not exceed PIPELINE_MAX_DELAY_MS"
        );
        anyhow::ensure!(tuning.call_timeout_secs > 0, "PIPELINE_CALL_TIMEOUT_SECS must be at least 1");
        anyhow::ensure!(
            tuning.claim_ttl_secs >= 2 * tuning.call_timeout_secs,
            "PIPELINE_CLAIM_TTL_SECS must be at least twice PIPELINE_CALL_TIMEOUT_SECS"
        );
        Ok(tuning)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                jitter: true,
            },
            call_timeout: self.call_timeout(),
            cohort_limit: self.cohort_limit,
            claim_ttl: Duration::from_secs(self.claim_ttl_secs),
        }
    }
}
