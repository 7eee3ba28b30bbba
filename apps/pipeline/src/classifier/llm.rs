use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::debug;

use crate::classifier::prompts::build_prompt;
use crate::classifier::{
    Classification, ClassificationEnvelope, Classifier, ClassifyContext, ProviderError,
};
use crate::llm_client::LlmClient;

/// Claude-backed classifier.
///
/// All AI stages share one instance, so the requests-per-minute quota applies
/// to the whole pipeline rather than per stage.
#[derive(Clone)]
pub struct LlmClassifier {
    llm: LlmClient,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl LlmClassifier {
    pub fn new(llm: LlmClient, requests_per_minute: NonZeroU32) -> Self {
        Self {
            llm,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(requests_per_minute))),
        }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn ready(&self) {
        self.limiter.until_ready().await;
    }

    async fn classify(
        &self,
        batch: &[String],
        context: &ClassifyContext,
    ) -> Result<Vec<Classification>, ProviderError> {
        let prompt = build_prompt(batch, context);
        debug!(task = ?context.task(), batch_size = batch.len(), "Sending classification request");

        let envelope: ClassificationEnvelope =
            self.llm.call_json(&prompt.user, &prompt.system).await?;
        Ok(envelope.into_results())
    }
}
