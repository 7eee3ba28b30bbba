use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::UnknownVariant;

/// Detail value recorded by the skill stage when no taxonomy skill applies.
pub const NO_SKILLS_DETAIL: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetBank {
    Resume,
    CoverLetter,
}

impl TargetBank {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetBank::Resume => "resume",
            TargetBank::CoverLetter => "cover_letter",
        }
    }
}

impl fmt::Display for TargetBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetBank {
    type Err = UnknownVariant;

    /// Accepts `cover-letter` and `cover letter` as spellings of `cover_letter`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "resume" => Ok(TargetBank::Resume),
            "cover_letter" => Ok(TargetBank::CoverLetter),
            _ => Err(UnknownVariant::new("target bank", s)),
        }
    }
}

/// A candidate sentence owned by the pipeline.
///
/// `text` is canonical and may be rewritten by the spelling stage; `original_text`
/// holds the pre-normalization text once a rewrite has happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSentence {
    pub id: Uuid,
    pub text: String,
    pub original_text: Option<String>,
    pub target_bank: TargetBank,
    pub source_entity_tag: Option<String>,
    pub has_metric: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert payload produced by the ingestor.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSentence {
    pub text: String,
    pub target_bank: TargetBank,
    pub source_entity_tag: Option<String>,
    pub has_metric: bool,
    /// Normalised text used to reject re-ingestion of the same unit.
    pub dedup_key: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct SentenceRow {
    pub id: Uuid,
    pub text: String,
    pub original_text: Option<String>,
    pub target_bank: String,
    pub source_entity_tag: Option<String>,
    pub has_metric: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SentenceRow> for CandidateSentence {
    type Error = UnknownVariant;

    fn try_from(row: SentenceRow) -> Result<Self, Self::Error> {
        Ok(CandidateSentence {
            id: row.id,
            text: row.text,
            original_text: row.original_text,
            target_bank: row.target_bank.parse()?,
            source_entity_tag: row.source_entity_tag,
            has_metric: row.has_metric,
            created_at: row.created_at,
        })
    }
}

/// A sentence that completed the skill stage, shaped for downstream document generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSentence {
    pub sentence_id: Uuid,
    pub text: String,
    pub target_bank: TargetBank,
    pub tone: String,
    pub skill_tags: Vec<String>,
}

impl ProductionSentence {
    pub fn from_details(
        sentence_id: Uuid,
        text: String,
        target_bank: TargetBank,
        tone_detail: &str,
        skill_detail: &str,
    ) -> Self {
        Self {
            sentence_id,
            text,
            target_bank,
            tone: tone_detail.trim().to_string(),
            skill_tags: parse_skill_detail(skill_detail),
        }
    }
}

/// Formats canonical skills as the skill stage's `detail` value.
pub fn format_skill_detail(skills: &[String]) -> String {
    if skills.is_empty() {
        NO_SKILLS_DETAIL.to_string()
    } else {
        skills.join(", ")
    }
}

pub fn parse_skill_detail(detail: &str) -> Vec<String> {
    let detail = detail.trim();
    if detail.is_empty() || detail == NO_SKILLS_DETAIL {
        return Vec::new();
    }
    detail
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductionRow {
    pub id: Uuid,
    pub text: String,
    pub target_bank: String,
    pub tone: String,
    pub skills: String,
}

impl TryFrom<ProductionRow> for ProductionSentence {
    type Error = UnknownVariant;

    fn try_from(row: ProductionRow) -> Result<Self, Self::Error> {
        Ok(ProductionSentence::from_details(
            row.id,
            row.text,
            row.target_bank.parse()?,
            &row.tone,
            &row.skills,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_bank_accepts_common_spellings() {
        assert_eq!("resume".parse::<TargetBank>().unwrap(), TargetBank::Resume);
        assert_eq!(
            "Cover-Letter".parse::<TargetBank>().unwrap(),
            TargetBank::CoverLetter
        );
        assert_eq!(
            "cover letter".parse::<TargetBank>().unwrap(),
            TargetBank::CoverLetter
        );
        assert!("portfolio".parse::<TargetBank>().is_err());
    }

    #[test]
    fn test_skill_detail_formats_and_parses() {
        let skills = vec!["email marketing".to_string(), "analytics".to_string()];
        let detail = format_skill_detail(&skills);
        assert_eq!(detail, "email marketing, analytics");
        assert_eq!(parse_skill_detail(&detail), skills);
    }

    #[test]
    fn test_empty_skills_use_none_marker() {
        assert_eq!(format_skill_detail(&[]), NO_SKILLS_DETAIL);
        assert!(parse_skill_detail(NO_SKILLS_DETAIL).is_empty());
        assert!(parse_skill_detail("  ").is_empty());
    }

    #[test]
    fn test_production_sentence_from_details() {
        let id = Uuid::new_v4();
        let sentence = ProductionSentence::from_details(
            id,
            "Increased email open rates by 24% at Acme Co.".to_string(),
            TargetBank::Resume,
            "confident",
            "email marketing",
        );
        assert_eq!(sentence.tone, "confident");
        assert_eq!(sentence.skill_tags, vec!["email marketing".to_string()]);
    }
}
