//! Tone classification: assigns each sentence one label from a fixed taxonomy.
//!
//! Cues shown to the classifier come from the verb sets recruiters associate
//! with each register. The stage never rejects; an unknown label is retried.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::{align_to_batch, Classifier, ClassifyContext, LabelGuide, ProviderError};
use crate::models::outcome::StageName;
use crate::models::sentence::CandidateSentence;
use crate::models::UnknownVariant;
use crate::stages::{Stage, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneLabel {
    Confident,
    Collaborative,
    Analytical,
    Enthusiastic,
    Formal,
    Humble,
}

impl ToneLabel {
    pub const ALL: [ToneLabel; 6] = [
        ToneLabel::Confident,
        ToneLabel::Collaborative,
        ToneLabel::Analytical,
        ToneLabel::Enthusiastic,
        ToneLabel::Formal,
        ToneLabel::Humble,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToneLabel::Confident => "confident",
            ToneLabel::Collaborative => "collaborative",
            ToneLabel::Analytical => "analytical",
            ToneLabel::Enthusiastic => "enthusiastic",
            ToneLabel::Formal => "formal",
            ToneLabel::Humble => "humble",
        }
    }

    /// Typical verbs and phrasing for the label.
    pub fn cue_verbs(&self) -> &'static [&'static str] {
        match self {
            ToneLabel::Confident => &["Led", "Drove", "Delivered", "Increased", "Launched", "Owned"],
            ToneLabel::Collaborative => &[
                "Partnered with",
                "Contributed to",
                "Collaborated on",
                "Facilitated",
                "Supported",
            ],
            ToneLabel::Analytical => &["Analysed", "Modelled", "Measured", "Evaluated", "Investigated"],
            ToneLabel::Enthusiastic => &["Championed", "Thrilled to", "Excited to", "Passionate about"],
            ToneLabel::Formal => &["Administered", "Oversaw", "Ensured compliance", "Coordinated"],
            ToneLabel::Humble => &["Helped", "Learned", "Assisted", "Had the opportunity to"],
        }
    }

    pub fn guide(&self) -> LabelGuide {
        LabelGuide {
            label: self.as_str().to_string(),
            description: format!("phrasing like {}", self.cue_verbs().join(", ")),
        }
    }
}

impl fmt::Display for ToneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToneLabel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_matches(|c: char| !c.is_alphabetic()).to_lowercase();
        Self::ALL
            .iter()
            .find(|label| label.as_str() == wanted)
            .copied()
            .ok_or_else(|| UnknownVariant::new("tone label", s))
    }
}

pub struct ToneClassifierStage {
    classifier: Arc<dyn Classifier>,
}

impl ToneClassifierStage {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    fn context() -> ClassifyContext {
        ClassifyContext::Tone {
            labels: ToneLabel::ALL.iter().map(ToneLabel::guide).collect(),
        }
    }
}

#[async_trait]
impl Stage for ToneClassifierStage {
    fn name(&self) -> StageName {
        StageName::Tone
    }

    async fn ready(&self, _batch: &[CandidateSentence]) {
        self.classifier.ready().await;
    }

    async fn classify_batch(
        &self,
        batch: &[CandidateSentence],
    ) -> Result<Vec<Verdict>, ProviderError> {
        let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
        let results = self.classifier.classify(&texts, &Self::context()).await?;

        Ok(align_to_batch(batch.len(), results)
            .into_iter()
            .map(|slot| match slot {
                None => Verdict::Retry("missing-tone-verdict".to_string()),
                Some(c) if c.is_malformed() => Verdict::Retry("malformed-verdict".to_string()),
                Some(c) => match c.detail.parse::<ToneLabel>() {
                    Ok(label) => Verdict::Completed(label.to_string()),
                    Err(_) => Verdict::Retry(format!("unknown-tone-label:{}", c.detail.trim())),
                },
            })
            .collect())
    }
}
