use std::{collections::HashSet, fs, path::Path};

use crate::error::ConfigError;

/// Ordered class list; index `i` names the model's `i`-th output score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self, ConfigError> {
        if labels.is_empty() {
            return Err(ConfigError::EmptyVocabulary);
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(ConfigError::DuplicateLabel(label.clone()));
            }
        }
        Ok(Self { labels })
    }

    /// The 26 uppercase letters, used when no label file is configured.
    pub fn alphabet() -> Self {
        Self {
            labels: ('A'..='Z').map(String::from).collect(),
        }
    }

    /// Loads labels from a JSON array (`.json`) or a plain text file with one
    /// label per line. Blank lines are skipped.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let labels = if is_json {
            serde_json::from_str::<Vec<String>>(&raw).map_err(|source| {
                ConfigError::ParseLabels {
                    path: path.to_path_buf(),
                    source,
                }
            })?
        } else {
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect()
        };

        Self::new(labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }
}
