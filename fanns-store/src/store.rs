//! The variant score store.
//!
//! A [`ScoreStore`] is one handle on an SQLite file (or an in-memory
//! database). It owns the identifier caches and the predictor and map
//! catalogues, so every handle sees a consistent view of its own writes
//! without any process-wide state.
//!
//! Reads go straight through the handle. Every mutation goes through a
//! [`StoreTransaction`] obtained from [`ScoreStore::transaction`]; dropping
//! the transaction without committing rolls it back and reloads the caches.
//!
//! # Example
//!
//! ```
//! use fanns_core::DnaVariant;
//! use fanns_store::{NewVariant, PredictorKind, QueryFilter, QueryRequest, ScoreStore};
//!
//! let mut store = ScoreStore::in_memory().unwrap();
//! let mut tx = store.transaction().unwrap();
//! tx.add_predictor_column("sift", PredictorKind::Source, &[]).unwrap();
//! let variant = DnaVariant::parse("17", "+", 7577121, "G", "A").unwrap();
//! tx.insert(&NewVariant::new(variant).with_transcript("T1").with_score("sift", 0.02))
//!     .unwrap();
//! tx.commit().unwrap();
//!
//! let filter = QueryFilter::from_pairs([("chr", "17"), ("pos", "7577121"), ("ref", "G")]).unwrap();
//! let rows: Vec<_> = store
//!     .select(&QueryRequest::new(filter).predictors(&["sift"]))
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].score("sift"), Some(0.02));
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use fanns_core::{DnaVariant, ProteinChange, decode_dna, decode_protein};
use fxhash::FxHashMap;
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, params, params_from_iter};

use crate::annotation::{AnnotationMap, AnnotationMapRegistry};
use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::identifiers::{IdentifierKind, Identifiers};
use crate::planner::{Field, PlanOutcome, QueryFilter, QueryPlan, QueryPlanner, QueryRequest};
use crate::predictor::{Predictor, PredictorKind, PredictorRegistry};
use crate::rows::{NewVariant, ScoredRow};
use crate::schema::{self, MAX_IN_LIST, StoreMetadata};

/// Rows targeted by [`StoreTransaction::update_scores`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowSelector {
    Id(i64),
    Filter(QueryFilter),
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[derive(Debug)]
pub struct ScoreStore {
    conn: Connection,
    path: Option<PathBuf>,
    config: StoreConfig,
    read_only: bool,
    identifiers: Identifiers,
    maps: AnnotationMapRegistry,
    predictors: PredictorRegistry,
}

impl ScoreStore {
    /// Open `path` for writing, creating the file and the schema if needed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, StoreConfig::default())
    }

    pub fn create_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::configure(&conn, &config, true)?;
        if !schema::has_schema(&conn)? {
            schema::create(&conn)?;
            info!("Created variant score store at {:?}", path);
        }
        Self::from_connection(conn, Some(path.to_path_buf()), config, false)
    }

    /// Open an existing store for writing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::DatabaseNotFound(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        if !schema::has_schema(&conn)? {
            return Err(StoreError::NotAStore(path.to_path_buf()));
        }
        Self::configure(&conn, &config, true)?;
        Self::from_connection(conn, Some(path.to_path_buf()), config, false)
    }

    /// Open an existing store for reading only. Reads never observe
    /// uncommitted writes of other handles.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_read_only_with_config(path, StoreConfig::default())
    }

    pub fn open_read_only_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::DatabaseNotFound(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        if !schema::has_schema(&conn)? {
            return Err(StoreError::NotAStore(path.to_path_buf()));
        }
        Self::from_connection(conn, Some(path.to_path_buf()), config, true)
    }

    /// A fresh store that lives only as long as the handle.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_config(StoreConfig::default())
    }

    pub fn in_memory_with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn, &config, false)?;
        schema::create(&conn)?;
        Self::from_connection(conn, None, config, false)
    }

    fn configure(conn: &Connection, config: &StoreConfig, on_disk: bool) -> Result<()> {
        conn.pragma_update(None, "synchronous", config.synchronous.pragma_value())?;
        if on_disk {
            let mode: String = conn.pragma_update_and_check(
                None,
                "journal_mode",
                config.journal_mode.pragma_value(),
                |row| row.get(0),
            )?;
            debug!("journal_mode is {}", mode);
        }
        Ok(())
    }

    fn from_connection(
        conn: Connection,
        path: Option<PathBuf>,
        config: StoreConfig,
        read_only: bool,
    ) -> Result<Self> {
        let metadata = schema::check_version(&conn)?;
        let identifiers = Identifiers::load(&conn)?;
        let maps = AnnotationMapRegistry::load(&conn)?;
        let predictors = PredictorRegistry::load(&conn)?;

        info!(
            "Opened store {:?}{} created {}: {} transcripts, {} proteins, {} predictors, {} annotation maps",
            path.as_deref().unwrap_or(Path::new(":memory:")),
            if read_only { " (read-only)" } else { "" },
            metadata
                .created_at()
                .map_or_else(|| metadata.creation_time.clone(), |time| time.format("%Y-%m-%d %H:%M:%S").to_string()),
            identifiers.transcripts.len(),
            identifiers.proteins.len(),
            predictors.len(),
            maps.maps().count()
        );

        Ok(ScoreStore {
            conn,
            path,
            config,
            read_only,
            identifiers,
            maps,
            predictors,
        })
    }

    /// Reload every cache from the committed state of the database.
    fn reload(&mut self) -> Result<()> {
        self.identifiers = Identifiers::load(&self.conn)?;
        self.maps = AnnotationMapRegistry::load(&self.conn)?;
        self.predictors = PredictorRegistry::load(&self.conn)?;
        Ok(())
    }

    /// Start the single write transaction of this handle.
    pub fn transaction(&mut self) -> Result<StoreTransaction<'_>> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(StoreTransaction {
            store: self,
            finished: false,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn identifiers(&self) -> &Identifiers {
        &self.identifiers
    }

    pub fn maps(&self) -> &AnnotationMapRegistry {
        &self.maps
    }

    pub fn predictors(&self) -> &PredictorRegistry {
        &self.predictors
    }

    pub fn metadata(&self) -> Result<StoreMetadata> {
        schema::metadata(&self.conn)
    }

    pub fn row_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM variants", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn planner(&self) -> QueryPlanner<'_> {
        QueryPlanner::new(
            &self.conn,
            &self.config,
            &self.identifiers,
            &self.maps,
            &self.predictors,
        )
    }

    pub fn plan(&self, request: &QueryRequest) -> Result<PlanOutcome> {
        self.planner().plan(request)
    }

    /// Lazily run `plan`, one page of `page_size` rows at a time.
    pub fn query(&self, plan: &QueryPlan) -> QueryRows<'_> {
        QueryRows::new(self, Some(plan.clone()))
    }

    /// Plan and run `request`. An empty plan yields no rows.
    pub fn select(&self, request: &QueryRequest) -> Result<QueryRows<'_>> {
        match self.plan(request)? {
            PlanOutcome::Execute(plan) => Ok(QueryRows::new(self, Some(plan))),
            PlanOutcome::EmptyResult => Ok(QueryRows::new(self, None)),
        }
    }

    /// Every distinct stored DNA variant, in code order.
    pub fn dna_variants(&self) -> DnaVariants<'_> {
        DnaVariants {
            store: self,
            last_code: -1,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Write the entries of `map_id` as `internal_name<TAB>external_name`.
    pub fn write_map_tsv<P: AsRef<Path>>(&self, map_id: &str, path: P) -> Result<usize> {
        let kind = self.maps.map_or_err(map_id)?.kind;
        self.maps
            .write_tsv(&self.conn, self.identifiers.get(kind), map_id, path.as_ref())
    }

    fn row_exists(&self, row_id: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM variants WHERE id = ?1", params![row_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// True if another row already holds (`dna_code`, `transcript_id`).
    fn variant_exists(&self, dna_code: u64, transcript_id: Option<i64>, exclude: Option<i64>) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM variants WHERE dna_code = ?1 AND transcript_id IS ?2 AND id IS NOT ?3 LIMIT 1",
                params![dna_code as i64, transcript_id, exclude],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Score table keys for `scores`, rejecting unknown predictors and non-finite values.
    fn score_keys<'s, I>(&self, scores: I) -> Result<Vec<(i64, Option<f64>)>>
    where
        I: IntoIterator<Item = (&'s str, Option<f64>)>,
    {
        scores
            .into_iter()
            .map(|(id, value)| {
                let key = self.predictors.get_or_err(id)?.key;
                match value {
                    Some(value) if !value.is_finite() => Err(StoreError::InvalidScore {
                        predictor: id.to_string(),
                        value,
                    }),
                    _ => Ok((key, value)),
                }
            })
            .collect()
    }

    fn matching_row_ids(&self, filter: &QueryFilter) -> Result<Vec<i64>> {
        let Some(predicate) = self.planner().predicate(filter)? else {
            return Ok(Vec::new());
        };
        let mut ids = BTreeSet::new();
        for (condition, params) in predicate.to_sql() {
            let mut stmt = self
                .conn
                .prepare_cached(&format!("SELECT v.id FROM variants v WHERE {}", condition))?;
            let rows = stmt.query_map(params_from_iter(params), |row| row.get::<_, i64>(0))?;
            for id in rows {
                ids.insert(id?);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Decode the requested fields and attach scores and annotations to a page of rows.
    fn complete_rows(&self, plan: &QueryPlan, rows: &mut [ScoredRow]) -> Result<()> {
        let wants_dna = plan.fields.iter().any(Field::is_dna);
        let wants_protein_change = plan.fields.iter().any(Field::is_protein_change);
        for row in rows.iter_mut() {
            if wants_dna {
                row.dna = Some(decode_dna(row.dna_code)?);
            }
            if wants_protein_change {
                row.protein_change = row.protein_code.map(decode_protein).transpose()?;
            }
            if plan.wants(Field::Transcript) {
                if let Some(id) = row.transcript_id {
                    row.transcript = self.identifiers.transcripts.find_name(&self.conn, id)?;
                }
            }
            if plan.wants(Field::Protein) {
                if let Some(id) = row.protein_id {
                    row.protein = self.identifiers.proteins.find_name(&self.conn, id)?;
                }
            }
        }

        if !plan.predictors.is_empty() {
            self.attach_scores(plan, rows)?;
        }
        for map in &plan.maps {
            self.attach_annotations(map, rows)?;
        }
        Ok(())
    }

    fn attach_scores(&self, plan: &QueryPlan, rows: &mut [ScoredRow]) -> Result<()> {
        let mut position: FxHashMap<i64, usize> = FxHashMap::default();
        for (index, row) in rows.iter_mut().enumerate() {
            position.insert(row.id, index);
            row.scores = plan.predictors.iter().map(|(id, _)| (id.clone(), None)).collect();
        }
        let predictor_ids: FxHashMap<i64, &str> =
            plan.predictors.iter().map(|(id, key)| (*key, id.as_str())).collect();

        let row_ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let key_placeholders = vec!["?"; plan.predictors.len()].join(", ");
        for chunk in row_ids.chunks(MAX_IN_LIST) {
            let mut stmt = self.conn.prepare_cached(&format!(
                "SELECT row_id, predictor_key, value FROM scores WHERE row_id IN ({}) AND predictor_key IN ({})",
                vec!["?"; chunk.len()].join(", "),
                key_placeholders
            ))?;
            let params = chunk
                .iter()
                .map(|id| Value::Integer(*id))
                .chain(plan.predictors.iter().map(|(_, key)| Value::Integer(*key)));
            let scores = stmt.query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, f64>(2)?))
            })?;
            for score in scores {
                let (row_id, key, value) = score?;
                if let (Some(&index), Some(&id)) = (position.get(&row_id), predictor_ids.get(&key)) {
                    rows[index].scores.insert(id.to_string(), Some(value));
                }
            }
        }
        Ok(())
    }

    fn attach_annotations(&self, map: &AnnotationMap, rows: &mut [ScoredRow]) -> Result<()> {
        let internal_id = |row: &ScoredRow| match map.kind {
            IdentifierKind::Transcript => row.transcript_id,
            IdentifierKind::Protein => row.protein_id,
        };
        let mut ids: Vec<i64> = rows.iter().filter_map(internal_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let names = self.maps.external_names(&self.conn, &map.id, &ids)?;
        for row in rows.iter_mut() {
            let found = internal_id(row)
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or_default();
            row.annotations.insert(map.id.clone(), found);
        }
        Ok(())
    }
}

impl Display for ScoreStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ScoreStore object:")?;
        match &self.path {
            Some(path) => writeln!(f, ">Path: {}", path.display())?,
            None => writeln!(f, ">Path: :memory:")?,
        }
        writeln!(
            f,
            ">Identifiers: {} transcripts, {} proteins",
            self.identifiers.transcripts.len(),
            self.identifiers.proteins.len()
        )?;
        writeln!(f, ">Predictors (n={}):", self.predictors.len())?;
        for predictor in self.predictors.list() {
            writeln!(
                f,
                "  - {} ({}, n={})",
                predictor.id, predictor.kind, predictor.stats.count
            )?;
        }
        writeln!(f, ">Annotation maps (n={}):", self.maps.maps().count())?;
        for map in self.maps.maps() {
            writeln!(
                f,
                "  - {} ({}, priority {}): {}",
                map.id, map.kind, map.priority, map.name
            )?;
        }
        Ok(())
    }
}

/// The open write transaction of a [`ScoreStore`].
///
/// Derefs to the store, so reads inside the transaction see its own
/// uncommitted writes.
pub struct StoreTransaction<'a> {
    store: &'a mut ScoreStore,
    finished: bool,
}

impl Deref for StoreTransaction<'_> {
    type Target = ScoreStore;

    fn deref(&self) -> &ScoreStore {
        self.store
    }
}

impl StoreTransaction<'_> {
    /// Insert one variant row and its scores, returning the new row id.
    ///
    /// Everything is validated before the first write, so a failed insert
    /// leaves the transaction usable.
    pub fn insert(&mut self, row: &NewVariant) -> Result<i64> {
        let store = &mut *self.store;
        let dna_code = row.dna.code()?;
        let prot_code = row.protein_change.map(|change| change.code()).transpose()?;
        let scores = store.score_keys(row.scores.iter().map(|(id, value)| (id.as_str(), Some(*value))))?;

        let duplicate = || StoreError::DuplicateVariant {
            variant: row.dna.to_string(),
            transcript: row.transcript.clone().unwrap_or_default(),
        };
        // a transcript that was never interned cannot collide
        let existing_transcript = match &row.transcript {
            Some(name) => store
                .identifiers
                .transcripts
                .find(&store.conn, name)?
                .map(Some),
            None => Some(None),
        };
        if let Some(transcript_id) = existing_transcript {
            if store.variant_exists(dna_code, transcript_id, None)? {
                return Err(duplicate());
            }
        }

        let transcript_id = match &row.transcript {
            Some(name) => Some(store.identifiers.transcripts.intern(&store.conn, name)?),
            None => None,
        };
        let protein_id = match &row.protein {
            Some(name) => Some(store.identifiers.proteins.intern(&store.conn, name)?),
            None => None,
        };

        let inserted = store
            .conn
            .prepare_cached(
                "INSERT INTO variants (dna_code, transcript_id, prot_code, protein_id) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                dna_code as i64,
                transcript_id,
                prot_code.map(i64::from),
                protein_id
            ]);
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => return Err(duplicate()),
            Err(e) => return Err(e.into()),
        }
        let row_id = store.conn.last_insert_rowid();

        let mut insert_score = store
            .conn
            .prepare_cached("INSERT INTO scores (row_id, predictor_key, value) VALUES (?1, ?2, ?3)")?;
        for (key, value) in scores {
            insert_score.execute(params![row_id, key, value])?;
        }
        Ok(row_id)
    }

    /// Set or clear (`None`) the named scores on every selected row.
    /// Other predictors and the coordinates are never touched. Returns the
    /// number of rows matched.
    pub fn update_scores(
        &mut self,
        selector: &RowSelector,
        scores: &BTreeMap<String, Option<f64>>,
    ) -> Result<usize> {
        let store = &*self.store;
        let scores = store.score_keys(scores.iter().map(|(id, value)| (id.as_str(), *value)))?;

        let row_ids = match selector {
            RowSelector::Id(id) => {
                if !store.row_exists(*id)? {
                    return Err(StoreError::RowNotFound(*id));
                }
                vec![*id]
            }
            RowSelector::Filter(filter) => store.matching_row_ids(filter)?,
        };

        let mut upsert = store.conn.prepare_cached(
            "INSERT INTO scores (row_id, predictor_key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (row_id, predictor_key) DO UPDATE SET value = excluded.value",
        )?;
        let mut clear = store
            .conn
            .prepare_cached("DELETE FROM scores WHERE row_id = ?1 AND predictor_key = ?2")?;
        for row_id in &row_ids {
            for (key, value) in &scores {
                match value {
                    Some(value) => upsert.execute(params![row_id, key, value])?,
                    None => clear.execute(params![row_id, key])?,
                };
            }
        }
        debug!("Updated {} scores on {} rows", scores.len(), row_ids.len());
        Ok(row_ids.len())
    }

    /// Register a new score column. Existing rows start without a value.
    pub fn add_predictor_column(&mut self, id: &str, kind: PredictorKind, sources: &[&str]) -> Result<Predictor> {
        let store = &mut *self.store;
        let predictor = store.predictors.add_predictor(&store.conn, id, kind, sources)?;
        Ok(predictor.clone())
    }

    /// Recompute predictor statistics in one pass; all predictors when `ids` is empty.
    pub fn recompute_statistics(&mut self, ids: &[&str]) -> Result<()> {
        let store = &mut *self.store;
        store.predictors.recompute_statistics(&store.conn, ids)
    }

    pub fn add_map(&mut self, id: &str, name: &str, kind: IdentifierKind, priority: u32) -> Result<AnnotationMap> {
        let store = &mut *self.store;
        let map = store.maps.add_map(&store.conn, id, name, kind, priority)?;
        Ok(map.clone())
    }

    /// Map `internal_name` (interned if new) to `external_name` in `map_id`.
    pub fn add_map_entry(&mut self, map_id: &str, internal_name: &str, external_name: &str) -> Result<bool> {
        let store = &mut *self.store;
        let kind = store.maps.map_or_err(map_id)?.kind;
        let internal_id = store.identifiers.get_mut(kind).intern(&store.conn, internal_name)?;
        store.maps.add_entry(&store.conn, map_id, internal_id, external_name)
    }

    pub fn remove_map(&mut self, id: &str) -> Result<AnnotationMap> {
        let store = &mut *self.store;
        store.maps.remove_map(&store.conn, id)
    }

    /// Bulk-load a two-column TSV (optionally gzipped) into `map_id`.
    pub fn load_map_tsv<P: AsRef<Path>>(&mut self, map_id: &str, path: P, header: bool) -> Result<usize> {
        let store = &mut *self.store;
        let kind = store.maps.map_or_err(map_id)?.kind;
        store.maps.load_tsv(
            &store.conn,
            store.identifiers.get_mut(kind),
            map_id,
            path.as_ref(),
            header,
        )
    }

    /// Rewrite the coordinates of one row, keeping its scores. Both
    /// coordinates are validated before the row is touched.
    pub fn correct_coordinates(
        &mut self,
        row_id: i64,
        dna: Option<DnaVariant>,
        protein_change: Option<ProteinChange>,
    ) -> Result<()> {
        let store = &*self.store;
        let dna_code = dna.map(|dna| dna.code()).transpose()?;
        let prot_code = protein_change.map(|change| change.code()).transpose()?;
        let transcript_id: Option<i64> = store
            .conn
            .query_row(
                "SELECT transcript_id FROM variants WHERE id = ?1",
                params![row_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::RowNotFound(row_id))?;

        if let (Some(dna), Some(dna_code)) = (dna, dna_code) {
            if store.variant_exists(dna_code, transcript_id, Some(row_id))? {
                let transcript = match transcript_id {
                    Some(id) => store
                        .identifiers
                        .transcripts
                        .find_name(&store.conn, id)?
                        .unwrap_or_default(),
                    None => String::new(),
                };
                return Err(StoreError::DuplicateVariant {
                    variant: dna.to_string(),
                    transcript,
                });
            }
        }
        store.conn.execute(
            "UPDATE variants SET dna_code = COALESCE(?1, dna_code), prot_code = COALESCE(?2, prot_code) WHERE id = ?3",
            params![dna_code.map(|code| code as i64), prot_code.map(i64::from), row_id],
        )?;
        Ok(())
    }

    pub fn set_initialized(&mut self, initialized: bool) -> Result<()> {
        schema::set_initialized(&self.store.conn, initialized)
    }

    /// Drop the secondary indices before a bulk import.
    pub fn drop_indices(&mut self) -> Result<()> {
        schema::drop_indices(&self.store.conn)?;
        info!("Dropped secondary indices");
        Ok(())
    }

    pub fn create_indices(&mut self) -> Result<()> {
        schema::create_indices(&self.store.conn)?;
        info!("Created secondary indices");
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        self.store.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Discard every change and reload the caches.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.store.conn.execute_batch("ROLLBACK")?;
        self.store.reload()
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Rolling back uncommitted store transaction");
        if let Err(e) = self.store.conn.execute_batch("ROLLBACK") {
            warn!("Rollback failed: {}", e);
        }
        if let Err(e) = self.store.reload() {
            warn!("Failed to reload store caches after rollback: {}", e);
        }
    }
}

/// Lazy, restartable sequence of query results.
///
/// Rows are read in pages ordered by row id. Each page is a separate read,
/// so a long iteration sees rows committed by other handles in between
/// pages, but never uncommitted ones.
pub struct QueryRows<'a> {
    store: &'a ScoreStore,
    plan: Option<QueryPlan>,
    /// One statement per split of the predicate's key sets.
    statements: Vec<(String, Vec<Value>)>,
    last_id: i64,
    page: VecDeque<ScoredRow>,
    exhausted: bool,
}

impl<'a> QueryRows<'a> {
    fn new(store: &'a ScoreStore, plan: Option<QueryPlan>) -> Self {
        let statements = match &plan {
            Some(plan) => plan
                .predicate
                .to_sql()
                .into_iter()
                .map(|(condition, params)| {
                    let sql = format!(
                        "SELECT v.id, v.dna_code, v.transcript_id, v.prot_code, v.protein_id FROM variants v
                         WHERE {} AND v.id > ? ORDER BY v.id LIMIT ?",
                        condition
                    );
                    (sql, params)
                })
                .collect(),
            None => Vec::new(),
        };
        let exhausted = statements.is_empty();
        QueryRows {
            store,
            plan,
            statements,
            last_id: 0,
            page: VecDeque::new(),
            exhausted,
        }
    }

    /// Start again from the first matching row.
    pub fn restart(&mut self) {
        self.last_id = 0;
        self.page.clear();
        self.exhausted = self.statements.is_empty();
    }

    pub fn plan(&self) -> Option<&QueryPlan> {
        self.plan.as_ref()
    }

    /// Read the next `page_size` rows. Every statement contributes its own
    /// first `page_size` rows after `last_id`; the merged page keeps the
    /// lowest ids, which are complete across all statements.
    fn fetch_page(&mut self) -> Result<()> {
        let Some(plan) = &self.plan else {
            self.exhausted = true;
            return Ok(());
        };
        let store = self.store;
        let page_size = store.config.page_size;

        let mut rows = Vec::new();
        for (sql, params) in &self.statements {
            let params = params
                .iter()
                .cloned()
                .chain([Value::Integer(self.last_id), Value::Integer(page_size as i64)]);
            let mut stmt = store.conn.prepare_cached(sql)?;
            let found = stmt.query_map(params_from_iter(params), |row| {
                Ok(ScoredRow {
                    id: row.get(0)?,
                    dna_code: row.get::<_, i64>(1)? as u64,
                    transcript_id: row.get(2)?,
                    protein_code: row.get::<_, Option<i64>>(3)?.map(|code| code as u32),
                    protein_id: row.get(4)?,
                    ..ScoredRow::default()
                })
            })?;
            for row in found {
                rows.push(row?);
            }
        }
        rows.sort_unstable_by_key(|row| row.id);
        rows.dedup_by_key(|row| row.id);

        if rows.len() < page_size {
            self.exhausted = true;
        }
        rows.truncate(page_size);
        if let Some(last) = rows.last() {
            self.last_id = last.id;
        }
        store.complete_rows(plan, &mut rows)?;
        self.page.extend(rows);
        Ok(())
    }
}

impl Iterator for QueryRows<'_> {
    type Item = Result<ScoredRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.page.pop_front() {
            return Some(Ok(row));
        }
        if self.exhausted {
            return None;
        }
        match self.fetch_page() {
            Ok(()) => self.page.pop_front().map(Ok),
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Lazy sequence of the distinct DNA variants of a store.
pub struct DnaVariants<'a> {
    store: &'a ScoreStore,
    last_code: i64,
    page: VecDeque<u64>,
    exhausted: bool,
}

impl DnaVariants<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let page_size = self.store.config.page_size;
        let mut stmt = self.store.conn.prepare_cached(
            "SELECT DISTINCT dna_code FROM variants WHERE dna_code > ?1 ORDER BY dna_code LIMIT ?2",
        )?;
        let codes = stmt
            .query_map(params![self.last_code, page_size as i64], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if codes.len() < page_size {
            self.exhausted = true;
        }
        if let Some(&last) = codes.last() {
            self.last_code = last;
        }
        self.page.extend(codes.into_iter().map(|code| code as u64));
        Ok(())
    }
}

impl Iterator for DnaVariants<'_> {
    type Item = Result<DnaVariant>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page
            .pop_front()
            .map(|code| decode_dna(code).map_err(StoreError::from))
    }
}
