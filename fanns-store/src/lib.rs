//! # Embedded store of predictor scores for single-nucleotide variants
//!
//! The store keeps, per DNA variant and transcript, the protein change it
//! causes and a sparse set of named numeric scores ("predictors"). Variants
//! are keyed by the packed codes of `fanns-core`, so a point look-up is one
//! integer comparison and a partial coordinate becomes a small set of keys.
//!
//! ## Modules
//!
//! - `store` - [`ScoreStore`] handles, write transactions and lazy queries
//! - `planner` - filters, query requests and key-set expansion
//! - `identifiers` - transcript and protein name interning
//! - `annotation` - priority-ordered cross-reference maps
//! - `predictor` - the catalogue of score columns and their statistics
//! - `schema` - the persisted SQLite layout
//! - `config` - TOML-configurable tunables
//! - `errors` - the [`StoreError`] taxonomy

pub mod annotation;
pub mod config;
pub mod errors;
pub mod identifiers;
pub mod planner;
pub mod predictor;
pub mod rows;
pub mod schema;
pub mod store;
pub mod utils;

pub use annotation::{AnnotationMap, AnnotationMapRegistry, IdentifierSource};
pub use config::{JournalMode, StoreConfig, StoreConfigError, Synchronous};
pub use errors::{Result, StoreError};
pub use identifiers::{IdentifierInterner, IdentifierKind};
pub use planner::{Field, PlanOutcome, QueryFilter, QueryPlan, QueryPlanner, QueryRequest};
pub use predictor::{Predictor, PredictorKind, PredictorRegistry, PredictorStats};
pub use rows::{NewVariant, ScoredRow};
pub use schema::StoreMetadata;
pub use store::{DnaVariants, QueryRows, RowSelector, ScoreStore, StoreTransaction};
