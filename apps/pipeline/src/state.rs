use std::sync::Arc;

use anyhow::{Context, Result};

use crate::classifier::llm::LlmClassifier;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::corpus::{CorpusHandle, TruthCorpus};
use crate::errors::PipelineError;
use crate::llm_client::LlmClient;
use crate::pipeline::PipelineCoordinator;
use crate::stages::{default_stages, RuleSet};
use crate::store::ContentStore;

/// Everything a command needs, assembled once at startup.
#[derive(Clone)]
pub struct PipelineState {
    pub store: Arc<dyn ContentStore>,
    pub config: Config,
    pub rules: RuleSet,
}

impl PipelineState {
    pub fn new(store: Arc<dyn ContentStore>, config: Config) -> Result<Self> {
        let rules = RuleSet::load(config.rules_path.as_deref())
            .context("Failed to load pipeline rules")?;
        Ok(Self {
            store,
            config,
            rules,
        })
    }

    /// Loads the truth corpus named by `TRUTH_CORPUS_PATH`. An empty corpus is refused.
    pub fn load_corpus(&self) -> Result<TruthCorpus> {
        let path = self.config.require_corpus_path()?;
        let corpus = TruthCorpus::load(path)
            .with_context(|| format!("Failed to load truth corpus from {}", path.display()))?;
        anyhow::ensure!(
            !corpus.is_empty(),
            "Truth corpus at {} contains no truths",
            path.display()
        );
        Ok(corpus)
    }

    /// Re-reads the corpus into `handle`. On failure the current snapshot stays in place.
    pub fn reload_corpus(&self, handle: &CorpusHandle) -> Result<usize> {
        let corpus = self.load_corpus()?;
        let truths = corpus.len();
        handle.replace(corpus);
        Ok(truths)
    }

    /// Claude-backed classifier shared by all AI stages.
    pub fn classifier(&self) -> Result<Arc<dyn Classifier>> {
        let api_key = self.config.require_api_key()?.to_string();
        let llm = LlmClient::new(api_key, self.config.tuning.call_timeout())?;
        Ok(Arc::new(LlmClassifier::new(
            llm,
            self.config.tuning.requests_per_minute,
        )))
    }

    pub fn coordinator(
        &self,
        corpus: CorpusHandle,
        classifier: Arc<dyn Classifier>,
    ) -> Result<PipelineCoordinator, PipelineError> {
        let stages = default_stages(&self.rules, corpus, classifier)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        PipelineCoordinator::new(
            stages,
            Arc::clone(&self.store),
            self.config.tuning.runner_settings(),
        )
    }
}
