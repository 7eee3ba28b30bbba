//! Truth corpus: verified factual statements grounding the truthfulness stage.
//!
//! Loaded once, frozen, then shared as `Arc` snapshots. A reload builds a new
//! corpus and swaps the snapshot; batches already holding the old one finish with it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Failed to read truth corpus {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed truth on line {line}: expected '[Entity] statement'")]
    Malformed { line: usize },

    #[error("Invalid truth corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTruth {
    pub source_entity_tag: String,
    pub statement_text: String,
}

fn entity_key(tag: &str) -> String {
    tag.trim().to_lowercase()
}

#[derive(Debug, Default)]
pub struct TruthCorpus {
    truths: Vec<AtomicTruth>,
    by_entity: HashMap<String, Vec<usize>>,
}

impl TruthCorpus {
    pub fn new(truths: Vec<AtomicTruth>) -> Self {
        let mut by_entity: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, truth) in truths.iter().enumerate() {
            by_entity
                .entry(entity_key(&truth.source_entity_tag))
                .or_default()
                .push(i);
        }
        Self { truths, by_entity }
    }

    /// Parses the line format: `[Entity] statement`. Blank lines and `#` comments are skipped.
    pub fn parse_text(input: &str) -> Result<Self, CorpusError> {
        let mut truths = Vec::new();
        for (i, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || CorpusError::Malformed { line: i + 1 };
            let rest = line.strip_prefix('[').ok_or_else(malformed)?;
            let (tag, statement) = rest.split_once(']').ok_or_else(malformed)?;
            let (tag, statement) = (tag.trim(), statement.trim());
            if tag.is_empty() || statement.is_empty() {
                return Err(malformed());
            }
            truths.push(AtomicTruth {
                source_entity_tag: tag.to_string(),
                statement_text: statement.to_string(),
            });
        }
        Ok(Self::new(truths))
    }

    pub fn parse_json(input: &str) -> Result<Self, CorpusError> {
        let truths: Vec<AtomicTruth> = serde_json::from_str(input)?;
        Ok(Self::new(truths))
    }

    /// Loads by extension: `.json` as an array of truths, anything else as the line format.
    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let content = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let corpus = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::parse_json(&content)?,
            _ => Self::parse_text(&content)?,
        };
        info!(
            "Loaded truth corpus from {} ({} truths, {} entities)",
            path.display(),
            corpus.len(),
            corpus.entity_count()
        );
        Ok(corpus)
    }

    /// Truths for an entity tag (case-insensitive), or the whole corpus when untagged.
    pub fn for_entity(&self, tag: Option<&str>) -> Vec<AtomicTruth> {
        match tag {
            None => self.truths.clone(),
            Some(tag) => self
                .by_entity
                .get(&entity_key(tag))
                .map(|idx| idx.iter().map(|i| self.truths[*i].clone()).collect())
                .unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.truths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.truths.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    /// Entity tags with their truth counts, sorted by tag.
    pub fn entity_summary(&self) -> Vec<(String, usize)> {
        let mut summary: Vec<(String, usize)> = self
            .by_entity
            .values()
            .map(|idx| (self.truths[idx[0]].source_entity_tag.clone(), idx.len()))
            .collect();
        summary.sort();
        summary
    }
}

/// Shared, swappable handle to the current corpus snapshot.
#[derive(Debug, Clone, Default)]
pub struct CorpusHandle {
    current: Arc<RwLock<Arc<TruthCorpus>>>,
}

impl CorpusHandle {
    pub fn new(corpus: TruthCorpus) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(corpus))),
        }
    }

    pub fn snapshot(&self) -> Arc<TruthCorpus> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace(&self, corpus: TruthCorpus) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(corpus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
# verified claims
[Acme Co.] Increased email campaign open rates by 24%

[Acme Co.] Managed a team of 4 lifecycle marketers
[Globex] Migrated billing to Stripe in 6 weeks
";

    #[test]
    fn test_parse_text_groups_by_entity() {
        let corpus = TruthCorpus::parse_text(SAMPLE).unwrap();
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.entity_count(), 2);
        assert_eq!(corpus.for_entity(Some("acme co.")).len(), 2);
        assert_eq!(corpus.for_entity(Some(" GLOBEX ")).len(), 1);
        assert!(corpus.for_entity(Some("Initech")).is_empty());
        assert_eq!(corpus.for_entity(None).len(), 3);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = TruthCorpus::parse_text("[Acme] ok statement\nno brackets here").unwrap_err();
        assert!(matches!(err, CorpusError::Malformed { line: 2 }));
        assert!(TruthCorpus::parse_text("[] empty tag").is_err());
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"[{{"source_entity_tag": "Acme Co.", "statement_text": "Increased email campaign open rates by 24%"}}]"#
        )
        .unwrap();
        let corpus = TruthCorpus::load(file.path()).unwrap();
        assert_eq!(corpus.for_entity(None)[0].source_entity_tag, "Acme Co.");
    }

    #[test]
    fn test_load_text_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let corpus = TruthCorpus::load(file.path()).unwrap();
        assert_eq!(
            corpus.entity_summary(),
            vec![("Acme Co.".to_string(), 2), ("Globex".to_string(), 1)]
        );
    }

    #[test]
    fn test_handle_swaps_snapshot_without_disturbing_holders() {
        let handle = CorpusHandle::new(TruthCorpus::parse_text(SAMPLE).unwrap());
        let held = handle.snapshot();
        handle.replace(TruthCorpus::default());
        assert_eq!(held.len(), 3);
        assert!(handle.snapshot().is_empty());
    }
}
