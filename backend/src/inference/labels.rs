use std::path::Path;

use crate::config::ConfigError;

/// Ordered category names; the position is the model's class index.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    categories: Vec<String>,
}

impl Vocabulary {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let vocabulary = Self::from_lines(&raw);
        if vocabulary.is_empty() {
            return Err(ConfigError::EmptyVocabulary(path.display().to_string()));
        }
        Ok(vocabulary)
    }

    pub fn from_lines(raw: &str) -> Self {
        let categories = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { categories }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.categories.get(index).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}
