mod classifier;
mod config;
mod corpus;
mod db;
mod errors;
mod ingest;
mod llm_client;
mod models;
mod pipeline;
mod stages;
mod state;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::Config;
use crate::corpus::CorpusHandle;
use crate::db::{create_pool, ensure_schema};
use crate::ingest::{ingest, parse_seed, SeedFormat};
use crate::models::outcome::StageName;
use crate::models::run::RunStatus;
use crate::models::sentence::TargetBank;
use crate::pipeline::RunReport;
use crate::state::PipelineState;
use crate::store::{ContentStore, InMemoryContentStore, PgContentStore};

#[derive(Parser, Debug)]
#[command(name = "pipeline", version, about = "Sentence evaluation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Loads candidate sentences from a seed file (plain text or JSON).
    Ingest {
        file: PathBuf,
        /// Bank for units that do not name one.
        #[arg(long, default_value = "resume")]
        bank: TargetBank,
    },
    /// Runs every stage until all cohorts are drained.
    Run {
        /// Use a throwaway in-memory store instead of Postgres.
        #[arg(long)]
        dry_run: bool,
        /// Seed file loaded into the in-memory store before a dry run.
        #[arg(long, requires = "dry_run")]
        seed: Option<PathBuf>,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Prints production-ready sentences for one bank as JSON.
    Feed {
        #[arg(long)]
        bank: TargetBank,
    },
    /// Makes error outcomes eligible for reprocessing.
    ResetErrors {
        #[arg(long)]
        stage: Option<StageName>,
    },
    /// Shows the report of a past run.
    Report {
        run_id: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Shows one sentence and every outcome recorded for it.
    Inspect {
        /// Sentence id.
        #[arg(required_unless_present = "text", conflicts_with = "text")]
        id: Option<Uuid>,
        /// Look the sentence up by its text instead.
        #[arg(long)]
        text: Option<String>,
    },
    /// Counts the sentences currently eligible for each stage.
    Pending,
    /// Validates the truth corpus and rule file without touching the store.
    CorpusCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sentence pipeline v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Ingest { file, bank } => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            let units = read_seed(&file, bank)?;
            let report = ingest(state.store.as_ref(), units).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run {
            dry_run,
            seed,
            json,
        } => {
            let store: Arc<dyn ContentStore> = if dry_run {
                info!("Dry run: using in-memory store");
                Arc::new(InMemoryContentStore::new())
            } else {
                connect(&config).await?
            };
            let state = PipelineState::new(store, config)?;
            if let Some(seed) = seed {
                let report = ingest(state.store.as_ref(), read_seed(&seed, TargetBank::Resume)?).await?;
                info!("Dry run seeded with {} sentences", report.inserted.len());
            }
            run_pipeline(&state, dry_run, json).await?;
        }
        Commands::Feed { bank } => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            let feed = state.store.get_production_ready(bank).await?;
            println!("{}", serde_json::to_string_pretty(&feed)?);
        }
        Commands::ResetErrors { stage } => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            let reset = state.store.reset_errors(stage).await?;
            let scope = stage.map(|s| s.to_string()).unwrap_or_else(|| "all stages".to_string());
            println!("Reset {reset} error outcomes ({scope})");
        }
        Commands::Report { run_id, json } => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            let run = state
                .store
                .get_run(run_id)
                .await?
                .with_context(|| format!("No run with id {run_id}"))?;
            print_report(&RunReport::from(&run), json)?;
        }
        Commands::Inspect { id, text } => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            let sentence = match (id, text) {
                (Some(id), _) => state.store.get_sentence(id).await?,
                (None, Some(text)) => state.store.find_by_text(&text).await?,
                (None, None) => bail!("Pass a sentence id or --text"),
            }
            .context("No matching sentence")?;
            let outcomes = state.store.outcomes_for(sentence.id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "sentence": sentence,
                    "outcomes": outcomes,
                }))?
            );
        }
        Commands::Pending => {
            let state = PipelineState::new(connect(&config).await?, config)?;
            for stage in StageName::ALL {
                let pending = state.store.get_pending(stage).await?;
                println!("{:<14} {}", stage.as_str(), pending.len());
            }
        }
        Commands::CorpusCheck => {
            let state = PipelineState::new(Arc::new(InMemoryContentStore::new()), config)?;
            let corpus = state.load_corpus()?;
            println!(
                "{} truths across {} entities",
                corpus.len(),
                corpus.entity_count()
            );
            for (entity, count) in corpus.entity_summary() {
                println!("  {entity}: {count}");
            }
            println!(
                "{} keyword categories, {} forbidden terms, {} taxonomy skills",
                state.rules.keyword_categories.len(),
                state.rules.forbidden_terms.len(),
                state.rules.skill_taxonomy.len()
            );
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<Arc<dyn ContentStore>> {
    let pool = create_pool(config.require_database_url()?).await?;
    ensure_schema(&pool).await?;
    Ok(Arc::new(PgContentStore::new(pool)))
}

fn read_seed(path: &Path, default_bank: TargetBank) -> Result<Vec<ingest::SeedUnit>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let format = SeedFormat::from_extension(path.extension().and_then(|e| e.to_str()));
    Ok(parse_seed(&input, format, default_bank)?)
}

async fn run_pipeline(state: &PipelineState, dry_run: bool, json: bool) -> Result<()> {
    let corpus = state.load_corpus()?;
    info!(
        "Truth corpus loaded: {} truths across {} entities",
        corpus.len(),
        corpus.entity_count()
    );
    let corpus = CorpusHandle::new(corpus);
    let coordinator = state.coordinator(corpus.clone(), state.classifier()?)?;
    #[cfg(unix)]
    spawn_corpus_reload(state.clone(), corpus);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight batches");
            on_signal.cancel();
        }
    });

    let run = coordinator.run(cancel).await?;
    print_report(&RunReport::from(&run), json)?;

    if dry_run {
        for bank in [TargetBank::Resume, TargetBank::CoverLetter] {
            let feed = state.store.get_production_ready(bank).await?;
            if !feed.is_empty() {
                println!("{bank}:\n{}", serde_json::to_string_pretty(&feed)?);
            }
        }
    }

    if run.status == RunStatus::Aborted {
        let reason = run
            .abort
            .map(|a| format!("{}: {}", a.code, a.message))
            .unwrap_or_default();
        bail!("Run {} aborted ({reason})", run.run_id);
    }
    Ok(())
}

/// Reloads the truth corpus on SIGHUP. Batches already sent keep the snapshot they started with.
#[cfg(unix)]
fn spawn_corpus_reload(state: PipelineState, corpus: CorpusHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Corpus reload on SIGHUP unavailable: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match state.reload_corpus(&corpus) {
                Ok(truths) => info!("Truth corpus reloaded: {truths} truths"),
                Err(e) => warn!("Truth corpus reload failed, keeping current snapshot: {e:#}"),
            }
        }
    });
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}
