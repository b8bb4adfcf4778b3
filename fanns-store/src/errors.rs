use std::io;
use std::path::PathBuf;

use fanns_core::CoordinateError;
use thiserror::Error;

use crate::config::StoreConfigError;

/// Error type for every store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A coordinate component outside its alphabet or bit width.
    #[error(transparent)]
    InvalidCoordinate(#[from] CoordinateError),

    #[error("Variant {variant} already exists for transcript '{transcript}'")]
    DuplicateVariant { variant: String, transcript: String },

    #[error("Predictor '{0}' already exists")]
    PredictorAlreadyExists(String),

    #[error("Unknown predictor: '{0}'")]
    UnknownPredictor(String),

    #[error("Invalid predictor '{id}': {reason}")]
    InvalidPredictor { id: String, reason: String },

    #[error("Unknown annotation map: '{0}'")]
    UnknownMap(String),

    /// A partial coordinate filter without its anchoring position.
    #[error("Incomplete {coordinate} filter: '{missing}' is required")]
    IncompleteFilter {
        coordinate: &'static str,
        missing: &'static str,
    },

    #[error("Unknown filter field: '{0}'")]
    UnknownField(String),

    #[error("Invalid identifier '{0}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier(String),

    #[error("Invalid score for predictor '{predictor}': {value}")]
    InvalidScore { predictor: String, value: f64 },

    #[error("Row {0} not found")]
    RowNotFound(i64),

    #[error("Database not found: {0:?}")]
    DatabaseNotFound(PathBuf),

    #[error("Not a variant score store: {0:?}")]
    NotAStore(PathBuf),

    #[error("Incompatible schema version '{found}', this build requires '{required}'")]
    IncompatibleVersion { found: String, required: String },

    #[error("Store was opened read-only")]
    ReadOnly,

    #[error(transparent)]
    Config(#[from] StoreConfigError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Check that `id` can be used as part of a table name.
pub fn validate_identifier(id: &str) -> Result<()> {
    let mut bytes = id.bytes();
    let valid = match bytes.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == b'_')
                && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("sift")]
    #[case("_private")]
    #[case("PolyPhen2_hdiv")]
    #[case("uniprot")]
    fn test_valid_identifiers(#[case] id: &str) {
        assert!(validate_identifier(id).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("2sift")]
    #[case("gene-symbol")]
    #[case("map; DROP TABLE variants")]
    #[case("ümlaut")]
    fn test_invalid_identifiers(#[case] id: &str) {
        assert!(matches!(
            validate_identifier(id),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
