//! On-disk layout of a store.
//!
//! Tables:
//!
//! - `meta` - one row with the schema version, creation time and initialized flag
//! - `id_transcript`, `id_protein` - interned names
//! - `variants` - one row per (DNA code, transcript) with the protein coordinate
//! - `scores` - sparse long-format predictor values keyed by (row, predictor)
//! - `predictors` - predictor catalogue and statistics
//! - `annotations` - annotation map catalogue, plus one `ann_<id>` table per map

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};

/// Schema version written by and required by this build.
pub const DB_VERSION: &str = "01";

/// Largest number of values bound into one `IN (...)` list when batching look-ups.
pub const MAX_IN_LIST: usize = 500;

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        db_version    TEXT NOT NULL,
        creation_time TEXT NOT NULL,
        initialized   INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS id_transcript (
        transcript_id   INTEGER PRIMARY KEY,
        transcript_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS id_protein (
        protein_id   INTEGER PRIMARY KEY,
        protein_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS variants (
        id            INTEGER PRIMARY KEY,
        dna_code      INTEGER NOT NULL,
        transcript_id INTEGER REFERENCES id_transcript (transcript_id),
        prot_code     INTEGER,
        protein_id    INTEGER REFERENCES id_protein (protein_id),
        UNIQUE (dna_code, transcript_id)
    );

    CREATE TABLE IF NOT EXISTS scores (
        row_id        INTEGER NOT NULL REFERENCES variants (id),
        predictor_key INTEGER NOT NULL REFERENCES predictors (predictor_key),
        value         REAL NOT NULL,
        PRIMARY KEY (row_id, predictor_key)
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS predictors (
        predictor_key INTEGER PRIMARY KEY,
        id            TEXT NOT NULL UNIQUE,
        type          TEXT NOT NULL,
        source        TEXT,
        min           REAL,
        max           REAL,
        count         INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS annotations (
        id       TEXT PRIMARY KEY,
        type     TEXT NOT NULL,
        name     TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0
    );
";

/// Indices that can be dropped during bulk imports. The uniqueness
/// constraint on `variants` is part of the table and is never dropped.
const SECONDARY_INDICES: [(&str, &str); 3] = [
    ("variants_by_transcript", "variants (transcript_id)"),
    ("variants_by_protein", "variants (protein_id, prot_code)"),
    ("scores_by_predictor", "scores (predictor_key, value)"),
];

/// Contents of the `meta` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreMetadata {
    pub version: String,
    pub creation_time: String,
    pub initialized: bool,
}

impl StoreMetadata {
    /// Creation time as a timestamp, if it was written in RFC 3339 form.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.creation_time)
            .ok()
            .map(|time| time.with_timezone(&Utc))
    }
}

/// True if `conn` already holds a store schema.
pub fn has_schema(conn: &Connection) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create every table and secondary index, and write the `meta` row.
pub fn create(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    create_indices(conn)?;
    conn.execute(
        "INSERT INTO meta (db_version, creation_time, initialized) VALUES (?1, ?2, 0)",
        params![DB_VERSION, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn metadata(conn: &Connection) -> Result<StoreMetadata> {
    let metadata = conn
        .query_row(
            "SELECT db_version, creation_time, initialized FROM meta LIMIT 1",
            [],
            |row| {
                Ok(StoreMetadata {
                    version: row.get(0)?,
                    creation_time: row.get(1)?,
                    initialized: row.get(2)?,
                })
            },
        )
        .optional()?;
    metadata.ok_or_else(|| StoreError::IncompatibleVersion {
        found: String::new(),
        required: DB_VERSION.to_string(),
    })
}

/// Metadata of the store in `conn`, if its schema version is the one this build writes.
pub fn check_version(conn: &Connection) -> Result<StoreMetadata> {
    let metadata = metadata(conn)?;
    if metadata.version != DB_VERSION {
        return Err(StoreError::IncompatibleVersion {
            found: metadata.version,
            required: DB_VERSION.to_string(),
        });
    }
    Ok(metadata)
}

pub fn set_initialized(conn: &Connection, initialized: bool) -> Result<()> {
    conn.execute("UPDATE meta SET initialized = ?1", params![initialized])?;
    Ok(())
}

pub fn create_indices(conn: &Connection) -> Result<()> {
    for (name, target) in SECONDARY_INDICES {
        conn.execute_batch(&format!("CREATE INDEX IF NOT EXISTS {name} ON {target}"))?;
    }
    Ok(())
}

pub fn drop_indices(conn: &Connection) -> Result<()> {
    for (name, _) in SECONDARY_INDICES {
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {name}"))?;
    }
    Ok(())
}

/// Table holding the entries of annotation map `map_id`.
///
/// `map_id` must already be validated with
/// [`validate_identifier`](crate::errors::validate_identifier).
pub fn map_table(map_id: &str) -> String {
    format!("ann_{map_id}")
}

pub fn create_map_table(conn: &Connection, map_id: &str) -> Result<()> {
    let table = map_table(map_id);
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            internal_id   INTEGER NOT NULL,
            external_name TEXT NOT NULL,
            PRIMARY KEY (internal_id, external_name)
        ) WITHOUT ROWID;
        CREATE INDEX IF NOT EXISTS {table}_by_name ON {table} (external_name);"
    ))?;
    Ok(())
}

pub fn drop_map_table(conn: &Connection, map_id: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", map_table(map_id)))?;
    Ok(())
}
