//! Bidirectional name <-> integer id mapping for transcripts and proteins.
//!
//! Each [`IdentifierInterner`] keeps the whole bijection of one kind in
//! memory. It is loaded when a store is opened and updated on every
//! [`intern`](IdentifierInterner::intern), so bulk imports never pay a
//! round trip per row to translate a name.

use std::fmt::Display;
use std::str::FromStr;

use fxhash::FxHashMap;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};

/// The identifier space a name or annotation map belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentifierKind {
    Transcript,
    Protein,
}

impl IdentifierKind {
    pub const ALL: [IdentifierKind; 2] = [IdentifierKind::Transcript, IdentifierKind::Protein];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Transcript => "transcript",
            IdentifierKind::Protein => "protein",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            IdentifierKind::Transcript => "id_transcript",
            IdentifierKind::Protein => "id_protein",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            IdentifierKind::Transcript => "transcript_id",
            IdentifierKind::Protein => "protein_id",
        }
    }

    fn name_column(&self) -> &'static str {
        match self {
            IdentifierKind::Transcript => "transcript_name",
            IdentifierKind::Protein => "protein_name",
        }
    }
}

impl FromStr for IdentifierKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transcript" => Ok(IdentifierKind::Transcript),
            "protein" => Ok(IdentifierKind::Protein),
            _ => Err(StoreError::UnknownField(s.to_string())),
        }
    }
}

impl Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub struct IdentifierInterner {
    kind: IdentifierKind,
    forward: FxHashMap<String, i64>,
    reverse: FxHashMap<i64, String>,
}

impl IdentifierInterner {
    /// Load every name of `kind` committed in `conn`.
    pub fn load(conn: &Connection, kind: IdentifierKind) -> Result<Self> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, {} FROM {}",
            kind.id_column(),
            kind.name_column(),
            kind.table()
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut forward = FxHashMap::default();
        let mut reverse = FxHashMap::default();
        for row in rows {
            let (id, name) = row?;
            forward.insert(name.clone(), id);
            reverse.insert(id, name);
        }

        Ok(IdentifierInterner {
            kind,
            forward,
            reverse,
        })
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Cached id of `name`. Never touches the database.
    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.forward.get(name).copied()
    }

    /// Cached name of `id`.
    pub fn name(&self, id: i64) -> Option<&str> {
        self.reverse.get(&id).map(String::as_str)
    }

    /// Id of `name`, creating it if absent. Only for write paths.
    pub fn intern(&mut self, conn: &Connection, name: &str) -> Result<i64> {
        if let Some(id) = self.find(conn, name)? {
            if self.lookup(name).is_none() {
                self.forward.insert(name.to_string(), id);
                self.reverse.insert(id, name.to_string());
            }
            return Ok(id);
        }
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?1)",
                self.kind.table(),
                self.kind.name_column()
            ),
            params![name],
        )?;
        let id = conn.last_insert_rowid();
        self.forward.insert(name.to_string(), id);
        self.reverse.insert(id, name.to_string());
        Ok(id)
    }

    /// Id of `name`, falling back to the committed table on a cache miss.
    ///
    /// A read-only handle only sees the names present when it was opened in
    /// its cache; names interned later by a writer are found here.
    pub fn find(&self, conn: &Connection, name: &str) -> Result<Option<i64>> {
        if let Some(id) = self.lookup(name) {
            return Ok(Some(id));
        }
        let id = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    self.kind.id_column(),
                    self.kind.table(),
                    self.kind.name_column()
                ),
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Name of `id`, falling back to the committed table on a cache miss.
    pub fn find_name(&self, conn: &Connection, id: i64) -> Result<Option<String>> {
        if let Some(name) = self.name(id) {
            return Ok(Some(name.to_string()));
        }
        let name = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    self.kind.name_column(),
                    self.kind.table(),
                    self.kind.id_column()
                ),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// The transcript and protein interners owned by one store handle.
#[derive(Debug)]
pub struct Identifiers {
    pub transcripts: IdentifierInterner,
    pub proteins: IdentifierInterner,
}

impl Identifiers {
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Identifiers {
            transcripts: IdentifierInterner::load(conn, IdentifierKind::Transcript)?,
            proteins: IdentifierInterner::load(conn, IdentifierKind::Protein)?,
        })
    }

    pub fn get(&self, kind: IdentifierKind) -> &IdentifierInterner {
        match kind {
            IdentifierKind::Transcript => &self.transcripts,
            IdentifierKind::Protein => &self.proteins,
        }
    }

    pub fn get_mut(&mut self, kind: IdentifierKind) -> &mut IdentifierInterner {
        match kind {
            IdentifierKind::Transcript => &mut self.transcripts,
            IdentifierKind::Protein => &mut self.proteins,
        }
    }
}
