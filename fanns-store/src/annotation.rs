//! Cross-reference maps between interned ids and external identifier strings.
//!
//! An [`AnnotationMap`] translates the store's internal transcript or protein
//! ids into an external namespace (gene symbols, UniProt accessions, ...).
//! Each map lives in its own `ann_<id>` table and is many-to-many.
//!
//! Maps with a non-zero priority take part in automatic name resolution:
//! [`AnnotationMapRegistry::resolve`] tries them in ascending priority and
//! stops at the first map that knows the name.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};
use std::path::Path;

use fxhash::FxHashMap;
use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::errors::{Result, StoreError, validate_identifier};
use crate::identifiers::{IdentifierInterner, IdentifierKind};
use crate::schema;
use crate::utils::{get_dynamic_reader, get_dynamic_writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationMap {
    pub id: String,
    /// Free-text display name.
    pub name: String,
    pub kind: IdentifierKind,
    /// 0 = never used for resolution; otherwise lower wins.
    pub priority: u32,
}

impl AnnotationMap {
    pub fn is_resolvable(&self) -> bool {
        self.priority > 0
    }

    pub fn table(&self) -> String {
        schema::map_table(&self.id)
    }
}

/// Something that can translate an external name into internal ids.
pub trait IdentifierSource {
    fn name(&self) -> &str;

    /// Ids known for `external_name`; empty when the source has none.
    fn lookup(&self, external_name: &str) -> Result<BTreeSet<i64>>;
}

/// Try `sources` in order and return the first non-empty result.
pub fn resolve_first(sources: &[&dyn IdentifierSource], external_name: &str) -> Result<BTreeSet<i64>> {
    for source in sources {
        let ids = source.lookup(external_name)?;
        if !ids.is_empty() {
            debug!("'{}' resolved through {}", external_name, source.name());
            return Ok(ids);
        }
    }
    Ok(BTreeSet::new())
}

/// The entry table of one annotation map.
pub struct MapTable<'a> {
    conn: &'a Connection,
    map: &'a AnnotationMap,
}

impl<'a> MapTable<'a> {
    pub fn new(conn: &'a Connection, map: &'a AnnotationMap) -> Self {
        MapTable { conn, map }
    }
}

impl IdentifierSource for MapTable<'_> {
    fn name(&self) -> &str {
        &self.map.id
    }

    fn lookup(&self, external_name: &str) -> Result<BTreeSet<i64>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT internal_id FROM {} WHERE external_name = ?1",
            self.map.table()
        ))?;
        let ids = stmt
            .query_map(params![external_name], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<i64>>>()?;
        Ok(ids)
    }
}

/// Direct look-up of a name in an interner, used as the last resort.
pub struct InternedNames<'a> {
    conn: &'a Connection,
    interner: &'a IdentifierInterner,
}

impl<'a> InternedNames<'a> {
    pub fn new(conn: &'a Connection, interner: &'a IdentifierInterner) -> Self {
        InternedNames { conn, interner }
    }
}

impl IdentifierSource for InternedNames<'_> {
    fn name(&self) -> &str {
        self.interner.kind().as_str()
    }

    fn lookup(&self, external_name: &str) -> Result<BTreeSet<i64>> {
        Ok(self
            .interner
            .find(self.conn, external_name)?
            .into_iter()
            .collect())
    }
}

/// Catalogue of the annotation maps of a store.
#[derive(Debug, Default)]
pub struct AnnotationMapRegistry {
    maps: BTreeMap<String, AnnotationMap>,
}

impl AnnotationMapRegistry {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare("SELECT id, type, name, priority FROM annotations")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
            ))
        })?;

        let mut maps = BTreeMap::new();
        for row in rows {
            let (id, kind, name, priority) = row?;
            let map = AnnotationMap {
                id: id.clone(),
                name,
                kind: kind.parse()?,
                priority,
            };
            maps.insert(id, map);
        }
        Ok(AnnotationMapRegistry { maps })
    }

    /// Register a map, or redefine an existing one.
    ///
    /// Redefining with the same kind only updates name and priority. A
    /// different kind makes the old entries meaningless, so the entry table
    /// is dropped and recreated empty.
    pub fn add_map(
        &mut self,
        conn: &Connection,
        id: &str,
        name: &str,
        kind: IdentifierKind,
        priority: u32,
    ) -> Result<&AnnotationMap> {
        validate_identifier(id)?;

        match self.maps.get(id) {
            Some(existing) if existing.kind != kind => {
                warn!(
                    "Redefining annotation map '{}' from {} to {}: dropping its entries",
                    id, existing.kind, kind
                );
                schema::drop_map_table(conn, id)?;
            }
            _ => {}
        }

        conn.execute(
            "INSERT INTO annotations (id, type, name, priority) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET type = excluded.type, name = excluded.name, priority = excluded.priority",
            params![id, kind.as_str(), name, priority],
        )?;
        schema::create_map_table(conn, id)?;

        let map = AnnotationMap {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            priority,
        };
        self.maps.insert(id.to_string(), map);
        self.map_or_err(id)
    }

    pub fn remove_map(&mut self, conn: &Connection, id: &str) -> Result<AnnotationMap> {
        self.map_or_err(id)?;
        conn.execute("DELETE FROM annotations WHERE id = ?1", params![id])?;
        schema::drop_map_table(conn, id)?;
        self.maps
            .remove(id)
            .ok_or_else(|| StoreError::UnknownMap(id.to_string()))
    }

    /// Add one (internal id, external name) pair. Returns false if it was already present.
    pub fn add_entry(
        &self,
        conn: &Connection,
        map_id: &str,
        internal_id: i64,
        external_name: &str,
    ) -> Result<bool> {
        let map = self.map_or_err(map_id)?;
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} (internal_id, external_name) VALUES (?1, ?2)",
            map.table()
        ))?;
        let inserted = stmt.execute(params![internal_id, external_name])?;
        Ok(inserted > 0)
    }

    pub fn map(&self, id: &str) -> Option<&AnnotationMap> {
        self.maps.get(id)
    }

    pub fn map_or_err(&self, id: &str) -> Result<&AnnotationMap> {
        self.map(id)
            .ok_or_else(|| StoreError::UnknownMap(id.to_string()))
    }

    /// All maps, ordered by id.
    pub fn maps(&self) -> impl Iterator<Item = &AnnotationMap> {
        self.maps.values()
    }

    /// Maps of `kind` in resolution order: ascending priority, ties by id.
    pub fn maps_of_kind(&self, kind: IdentifierKind) -> Vec<&AnnotationMap> {
        let mut maps: Vec<&AnnotationMap> = self.maps().filter(|m| m.kind == kind).collect();
        maps.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        maps
    }

    /// The maps eligible for automatic resolution of `kind`, in the order they are tried.
    pub fn resolution_order(&self, kind: IdentifierKind) -> Vec<&AnnotationMap> {
        self.maps_of_kind(kind)
            .into_iter()
            .filter(|m| m.is_resolvable())
            .collect()
    }

    /// Internal ids for `external_name` from the first eligible map that knows it.
    pub fn resolve(
        &self,
        conn: &Connection,
        kind: IdentifierKind,
        external_name: &str,
    ) -> Result<BTreeSet<i64>> {
        let tables: Vec<MapTable> = self
            .resolution_order(kind)
            .into_iter()
            .map(|map| MapTable::new(conn, map))
            .collect();
        let sources: Vec<&dyn IdentifierSource> =
            tables.iter().map(|t| t as &dyn IdentifierSource).collect();
        resolve_first(&sources, external_name)
    }

    /// External names of each id in `internal_ids` according to `map_id`.
    pub fn external_names(
        &self,
        conn: &Connection,
        map_id: &str,
        internal_ids: &[i64],
    ) -> Result<FxHashMap<i64, Vec<String>>> {
        let map = self.map_or_err(map_id)?;
        let mut names: FxHashMap<i64, Vec<String>> = FxHashMap::default();
        if internal_ids.is_empty() {
            return Ok(names);
        }

        for chunk in internal_ids.chunks(schema::MAX_IN_LIST) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT internal_id, external_name FROM {} WHERE internal_id IN ({}) ORDER BY internal_id, external_name",
                map.table(),
                placeholders
            ))?;
            let params = chunk.iter().map(|id| Value::Integer(*id));
            let rows = stmt.query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, name) = row?;
                names.entry(id).or_default().push(name);
            }
        }
        Ok(names)
    }

    pub fn entry_count(&self, conn: &Connection, map_id: &str) -> Result<u64> {
        let map = self.map_or_err(map_id)?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", map.table()), [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    /// Bulk-load `internal_name<TAB>external_name` rows into `map_id`.
    ///
    /// Internal names are interned. `#` comments, blank lines and rows with an
    /// empty field are skipped, and `header` skips the first remaining line.
    /// A `.gz` path is decompressed. `interner` must be of the map's kind.
    /// Returns the number of new entries.
    pub fn load_tsv(
        &self,
        conn: &Connection,
        interner: &mut IdentifierInterner,
        map_id: &str,
        path: &Path,
        header: bool,
    ) -> Result<usize> {
        self.map_or_err(map_id)?;

        let reader = get_dynamic_reader(path)?;
        let mut skip_header = header;
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }
            if skip_header {
                skip_header = false;
                continue;
            }
            let mut parts = line.splitn(2, '\t');
            let (Some(internal), Some(external)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (internal, external) = (internal.trim(), external.trim());
            if internal.is_empty() || external.is_empty() {
                continue;
            }
            let internal_id = interner.intern(conn, internal)?;
            if self.add_entry(conn, map_id, internal_id, external)? {
                count += 1;
            }
        }

        info!("Loaded {} entries into annotation map '{}' from {:?}", count, map_id, path);
        Ok(count)
    }

    /// Write every entry of `map_id` as `internal_name<TAB>external_name`.
    pub fn write_tsv(
        &self,
        conn: &Connection,
        interner: &IdentifierInterner,
        map_id: &str,
        path: &Path,
    ) -> Result<usize> {
        let map = self.map_or_err(map_id)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT internal_id, external_name FROM {} ORDER BY internal_id, external_name",
            map.table()
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut writer = get_dynamic_writer(path)?;
        let mut count = 0;
        for row in rows {
            let (internal_id, external) = row?;
            if let Some(internal) = interner.find_name(conn, internal_id)? {
                writeln!(writer, "{}\t{}", internal, external)?;
                count += 1;
            }
        }
        writer.flush()?;
        Ok(count)
    }
}
