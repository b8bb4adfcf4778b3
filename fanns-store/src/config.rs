use std::fs::read_to_string;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Memory,
    Off,
}

impl JournalMode {
    pub fn pragma_value(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Memory => "MEMORY",
            JournalMode::Off => "OFF",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    Off,
    #[default]
    Normal,
    Full,
}

impl Synchronous {
    pub fn pragma_value(&self) -> &'static str {
        match self {
            Synchronous::Off => "OFF",
            Synchronous::Normal => "NORMAL",
            Synchronous::Full => "FULL",
        }
    }
}

/// Tunables for opening a store. Every key is optional in the TOML form.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Rows fetched per round trip by lazy queries.
    pub page_size: usize,
    pub journal_mode: JournalMode,
    pub synchronous: Synchronous,
    /// Transcript names with this prefix skip annotation-map resolution.
    pub native_transcript_prefix: String,
    /// Protein names with this prefix skip annotation-map resolution.
    pub native_protein_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            page_size: DEFAULT_PAGE_SIZE,
            journal_mode: JournalMode::default(),
            synchronous: Synchronous::default(),
            native_transcript_prefix: "ENST".to_string(),
            native_protein_prefix: "ENSP".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreConfigError {
    #[error("page_size must be greater than zero")]
    InvalidPageSize,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type StoreConfigResult<T> = std::result::Result<T, StoreConfigError>;

impl StoreConfig {
    pub fn validate(&self) -> StoreConfigResult<()> {
        if self.page_size == 0 {
            return Err(StoreConfigError::InvalidPageSize);
        }
        Ok(())
    }
}

impl TryFrom<&str> for StoreConfig {
    type Error = StoreConfigError;

    fn try_from(toml_str: &str) -> Result<Self, Self::Error> {
        let config: StoreConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}

impl TryFrom<&Path> for StoreConfig {
    type Error = StoreConfigError;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        let toml_str = read_to_string(path)?;
        StoreConfig::try_from(toml_str.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use std::path::PathBuf;

    #[rstest]
    fn test_try_from_toml() {
        let path = PathBuf::from("tests/data/store.toml");
        let config = StoreConfig::try_from(path.as_path()).unwrap();

        assert_eq!(config.page_size, 250);
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.synchronous, Synchronous::Off);
        assert_eq!(config.native_transcript_prefix, "ENST");
        assert_eq!(config.native_protein_prefix, "ENSP");
    }

    #[rstest]
    fn test_empty_toml_gives_defaults() {
        let config = StoreConfig::try_from("").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.journal_mode, JournalMode::Wal);
    }

    #[rstest]
    fn test_zero_page_size_is_rejected() {
        let result = StoreConfig::try_from("page_size = 0");
        assert!(matches!(result, Err(StoreConfigError::InvalidPageSize)));
    }

    #[rstest]
    #[case("journal_mode = \"fast\"")]
    #[case("page_size = \"many\"")]
    fn test_malformed_toml(#[case] toml_str: &str) {
        assert!(matches!(
            StoreConfig::try_from(toml_str),
            Err(StoreConfigError::Toml(_))
        ));
    }

    #[rstest]
    fn test_missing_file() {
        let path = PathBuf::from("tests/data/does_not_exist.toml");
        assert!(matches!(
            StoreConfig::try_from(path.as_path()),
            Err(StoreConfigError::Io(_))
        ));
    }
}
