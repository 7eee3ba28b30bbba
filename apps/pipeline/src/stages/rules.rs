//! Stage rule set: keyword categories, forbidden terms, skill taxonomy and
//! spelling overrides. Built-in defaults, optionally replaced field by field
//! from a TOML file (`PIPELINE_RULES_PATH`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("Failed to read rules file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid rules TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid rule set: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Category name to match-any terms. A sentence needs one category to pass.
    pub keyword_categories: BTreeMap<String, Vec<String>>,
    /// Match-none terms. Any hit rejects, whatever categories matched.
    pub forbidden_terms: Vec<String>,
    pub skill_taxonomy: Vec<String>,
    /// Extra US to UK pairs layered over the built-in dictionary.
    pub spelling_overrides: BTreeMap<String, String>,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        let mut keyword_categories = BTreeMap::new();
        keyword_categories.insert(
            "email".to_string(),
            terms(&["email", "newsletter", "drip campaign", "lifecycle", "mailing list"]),
        );
        keyword_categories.insert(
            "metrics".to_string(),
            terms(&[
                "increased", "reduced", "grew", "boosted", "cut", "saved", "open rates",
                "conversion", "revenue", "retention", "roi",
            ]),
        );
        keyword_categories.insert(
            "leadership".to_string(),
            terms(&["led", "managed", "mentored", "hired", "coached"]),
        );
        keyword_categories.insert(
            "analytics".to_string(),
            terms(&["analysed", "analyzed", "dashboard", "a/b test", "attribution", "segmentation"]),
        );
        keyword_categories.insert(
            "automation".to_string(),
            terms(&["automated", "workflow", "integration", "crm"]),
        );

        Self {
            keyword_categories,
            forbidden_terms: terms(&["rockstar", "ninja", "guru", "synergy", "world-class"]),
            skill_taxonomy: terms(&[
                "email marketing",
                "marketing automation",
                "data analysis",
                "a/b testing",
                "team leadership",
                "project management",
                "copywriting",
                "crm management",
                "seo",
                "stakeholder management",
            ]),
            spelling_overrides: BTreeMap::new(),
        }
    }
}

impl RuleSet {
    pub fn from_toml(input: &str) -> Result<Self, RulesError> {
        let rules: RuleSet = toml::from_str(input)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RulesError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rules = Self::from_toml(&content)?;
        info!(
            "Loaded rule set from {} ({} categories, {} forbidden terms, {} skills)",
            path.display(),
            rules.keyword_categories.len(),
            rules.forbidden_terms.len(),
            rules.skill_taxonomy.len()
        );
        Ok(rules)
    }

    pub fn validate(&self) -> Result<(), RulesError> {
        if self.keyword_categories.is_empty() {
            return Err(RulesError::Invalid(
                "at least one keyword category is required".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .keyword_categories
            .iter()
            .find(|(_, terms)| terms.iter().all(|t| t.trim().is_empty()))
        {
            return Err(RulesError::Invalid(format!(
                "keyword category '{name}' has no terms"
            )));
        }
        if self.skill_taxonomy.iter().all(|s| s.trim().is_empty()) {
            return Err(RulesError::Invalid(
                "skill taxonomy must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let rules = RuleSet::default();
        assert!(rules.validate().is_ok());
        assert!(rules.keyword_categories.contains_key("email"));
        assert!(rules.keyword_categories.contains_key("metrics"));
        assert!(rules.skill_taxonomy.contains(&"email marketing".to_string()));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let rules = RuleSet::from_toml(
            r#"
            forbidden_terms = ["guaranteed"]

            [keyword_categories]
            payments = ["stripe", "billing"]
            "#,
        )
        .unwrap();
        assert_eq!(rules.forbidden_terms, vec!["guaranteed".to_string()]);
        assert_eq!(rules.keyword_categories.len(), 1);
        assert_eq!(rules.skill_taxonomy, RuleSet::default().skill_taxonomy);
    }

    #[test]
    fn test_empty_category_is_rejected() {
        let err = RuleSet::from_toml("[keyword_categories]\nempty = []\n").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_load_reads_file_and_defaults_without_path() {
        assert_eq!(RuleSet::load(None).unwrap(), RuleSet::default());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "skill_taxonomy = [\"seo\"]").unwrap();
        let rules = RuleSet::load(Some(file.path())).unwrap();
        assert_eq!(rules.skill_taxonomy, vec!["seo".to_string()]);
    }
}
