//! Turns partially specified coordinate filters into packed-key predicates.
//!
//! A filter may name any subset of the DNA fields (`chr`, `strand`, `pos`,
//! `ref`, `alt`) and of the protein fields (`aa_pos`, `aa_ref`, `aa_alt`).
//! Missing fields are expanded over their closed alphabets and every
//! combination is packed with the codec, so the store only ever runs
//! key-set membership tests on the packed columns. The position anchors the
//! enumeration and is required whenever any other field of its coordinate
//! is given.
//!
//! Transcript and protein names are resolved to interned ids up front. A
//! name that resolves to nothing makes the whole plan
//! [`PlanOutcome::EmptyResult`] without touching the variant table.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use fanns_core::{
    AminoAcid, Chromosome, CoordinateError, DnaVariant, Nucleotide, ProteinChange, Strand,
    encode_dna, encode_protein,
};
use log::debug;
use rusqlite::Connection;
use rusqlite::types::Value;

use crate::annotation::{AnnotationMap, AnnotationMapRegistry, IdentifierSource, InternedNames, MapTable, resolve_first};
use crate::config::StoreConfig;
use crate::errors::{Result, StoreError};
use crate::identifiers::{IdentifierKind, Identifiers};
use crate::predictor::PredictorRegistry;
use crate::schema::MAX_IN_LIST;

/// A coordinate or identifier field that can be filtered on or requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Chromosome,
    Strand,
    Position,
    Reference,
    Alternate,
    Transcript,
    Protein,
    AaPosition,
    AaReference,
    AaAlternate,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Chromosome,
        Field::Strand,
        Field::Position,
        Field::Reference,
        Field::Alternate,
        Field::Transcript,
        Field::Protein,
        Field::AaPosition,
        Field::AaReference,
        Field::AaAlternate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Chromosome => "chr",
            Field::Strand => "strand",
            Field::Position => "pos",
            Field::Reference => "ref",
            Field::Alternate => "alt",
            Field::Transcript => "transcript",
            Field::Protein => "protein",
            Field::AaPosition => "aa_pos",
            Field::AaReference => "aa_ref",
            Field::AaAlternate => "aa_alt",
        }
    }

    pub fn is_dna(&self) -> bool {
        matches!(
            self,
            Field::Chromosome | Field::Strand | Field::Position | Field::Reference | Field::Alternate
        )
    }

    pub fn is_protein_change(&self) -> bool {
        matches!(self, Field::AaPosition | Field::AaReference | Field::AaAlternate)
    }
}

impl FromStr for Field {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Field::Position),
            name => Field::ALL
                .into_iter()
                .find(|field| field.name() == name)
                .ok_or_else(|| StoreError::UnknownField(s.to_string())),
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Allowed values per field. An empty list leaves the field unconstrained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub chromosomes: Vec<Chromosome>,
    pub strands: Vec<Strand>,
    pub positions: Vec<u32>,
    pub references: Vec<Nucleotide>,
    pub alternates: Vec<Nucleotide>,
    pub aa_positions: Vec<u32>,
    pub aa_references: Vec<AminoAcid>,
    pub aa_alternates: Vec<AminoAcid>,
    pub transcripts: Vec<String>,
    pub proteins: Vec<String>,
}

fn parse_position(value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| StoreError::InvalidCoordinate(CoordinateError::Position(value.to_string())))
}

impl QueryFilter {
    pub fn new() -> Self {
        QueryFilter::default()
    }

    /// Build a filter from `field=value` pairs; repeated fields accumulate.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut filter = QueryFilter::new();
        for (key, value) in pairs {
            filter.add(key.as_ref().parse()?, value.as_ref())?;
        }
        Ok(filter)
    }

    /// Add one allowed value for `field`, parsed from text.
    pub fn add(&mut self, field: Field, value: &str) -> Result<()> {
        match field {
            Field::Chromosome => self.chromosomes.push(value.parse()?),
            Field::Strand => self.strands.push(value.parse()?),
            Field::Position => self.positions.push(parse_position(value)?),
            Field::Reference => self.references.push(value.parse()?),
            Field::Alternate => self.alternates.push(value.parse()?),
            Field::Transcript => self.transcripts.push(value.to_string()),
            Field::Protein => self.proteins.push(value.to_string()),
            Field::AaPosition => self.aa_positions.push(parse_position(value)?),
            Field::AaReference => self.aa_references.push(value.parse()?),
            Field::AaAlternate => self.aa_alternates.push(value.parse()?),
        }
        Ok(())
    }

    /// Restrict to exactly `variant`.
    pub fn with_dna(mut self, variant: DnaVariant) -> Self {
        self.chromosomes = vec![variant.chromosome];
        self.strands = vec![variant.strand];
        self.positions = vec![variant.position];
        self.references = vec![variant.reference];
        self.alternates = vec![variant.alternate];
        self
    }

    /// Restrict to exactly `change`.
    pub fn with_protein_change(mut self, change: ProteinChange) -> Self {
        self.aa_positions = vec![change.position];
        self.aa_references = vec![change.reference];
        self.aa_alternates = vec![change.alternate];
        self
    }

    pub fn with_transcript(mut self, name: &str) -> Self {
        self.transcripts.push(name.to_string());
        self
    }

    pub fn with_protein(mut self, name: &str) -> Self {
        self.proteins.push(name.to_string());
        self
    }

    fn has_dna(&self) -> bool {
        !(self.chromosomes.is_empty()
            && self.strands.is_empty()
            && self.positions.is_empty()
            && self.references.is_empty()
            && self.alternates.is_empty())
    }

    fn has_protein_change(&self) -> bool {
        !(self.aa_positions.is_empty() && self.aa_references.is_empty() && self.aa_alternates.is_empty())
    }

    fn names(&self, kind: IdentifierKind) -> &[String] {
        match kind {
            IdentifierKind::Transcript => &self.transcripts,
            IdentifierKind::Protein => &self.proteins,
        }
    }
}

fn or_all<T: Copy>(values: &[T], all: impl Iterator<Item = T>) -> Vec<T> {
    match values.is_empty() {
        true => all.collect(),
        false => values.to_vec(),
    }
}

/// Packed DNA keys matching `filter`, or `None` when no DNA field is filtered.
pub fn expand_dna(filter: &QueryFilter) -> Result<Option<Vec<u64>>> {
    if !filter.has_dna() {
        return Ok(None);
    }
    if filter.positions.is_empty() {
        return Err(StoreError::IncompleteFilter {
            coordinate: "DNA",
            missing: "pos",
        });
    }

    let chromosomes = or_all(&filter.chromosomes, Chromosome::all());
    let strands = or_all(&filter.strands, Strand::ALL.into_iter());
    let references = or_all(&filter.references, Nucleotide::ALL.into_iter());
    let alternates = or_all(&filter.alternates, Nucleotide::ALL.into_iter());

    let mut keys = Vec::with_capacity(
        chromosomes.len() * strands.len() * filter.positions.len() * references.len() * alternates.len(),
    );
    for &chromosome in &chromosomes {
        for &strand in &strands {
            for &position in &filter.positions {
                for &reference in &references {
                    for &alternate in &alternates {
                        keys.push(encode_dna(chromosome, strand, position, reference, alternate)?);
                    }
                }
            }
        }
    }
    keys.sort_unstable();
    keys.dedup();
    Ok(Some(keys))
}

/// Packed protein keys matching `filter`, or `None` when no protein field is filtered.
pub fn expand_protein(filter: &QueryFilter) -> Result<Option<Vec<u32>>> {
    if !filter.has_protein_change() {
        return Ok(None);
    }
    if filter.aa_positions.is_empty() {
        return Err(StoreError::IncompleteFilter {
            coordinate: "protein",
            missing: "aa_pos",
        });
    }

    let references = or_all(&filter.aa_references, AminoAcid::all());
    let alternates = or_all(&filter.aa_alternates, AminoAcid::all());

    let mut keys = Vec::with_capacity(filter.aa_positions.len() * references.len() * alternates.len());
    for &position in &filter.aa_positions {
        for &reference in &references {
            for &alternate in &alternates {
                keys.push(encode_protein(position, reference, alternate)?);
            }
        }
    }
    keys.sort_unstable();
    keys.dedup();
    Ok(Some(keys))
}

/// What a query asks for: output fields, score columns, annotation maps and a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub fields: Vec<Field>,
    pub predictors: Vec<String>,
    pub maps: Vec<String>,
    pub filter: QueryFilter,
}

impl Default for QueryRequest {
    fn default() -> Self {
        QueryRequest {
            fields: Field::ALL.to_vec(),
            predictors: Vec::new(),
            maps: Vec::new(),
            filter: QueryFilter::default(),
        }
    }
}

impl QueryRequest {
    /// Every field, no score columns, no maps.
    pub fn new(filter: QueryFilter) -> Self {
        QueryRequest {
            filter,
            ..QueryRequest::default()
        }
    }

    pub fn fields(mut self, fields: &[Field]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    pub fn predictors(mut self, ids: &[&str]) -> Self {
        self.predictors = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn maps(mut self, ids: &[&str]) -> Self {
        self.maps = ids.iter().map(|id| id.to_string()).collect();
        self
    }
}

/// Row predicate over the `variants` table (aliased `v`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub dna_codes: Option<Vec<u64>>,
    pub protein_codes: Option<Vec<u32>>,
    pub transcript_ids: Option<BTreeSet<i64>>,
    pub protein_ids: Option<BTreeSet<i64>>,
}

fn push_in_list(clauses: &mut Vec<String>, params: &mut Vec<Value>, column: &str, values: &[Value]) {
    let placeholders = vec!["?"; values.len()].join(", ");
    clauses.push(format!("{} IN ({})", column, placeholders));
    params.extend_from_slice(values);
}

impl Predicate {
    fn columns(&self) -> Vec<(&'static str, Vec<Value>)> {
        let mut columns = Vec::new();
        if let Some(codes) = &self.dna_codes {
            columns.push(("v.dna_code", codes.iter().map(|&c| Value::Integer(c as i64)).collect()));
        }
        if let Some(codes) = &self.protein_codes {
            columns.push(("v.prot_code", codes.iter().map(|&c| Value::Integer(c as i64)).collect()));
        }
        if let Some(ids) = &self.transcript_ids {
            columns.push(("v.transcript_id", ids.iter().map(|&id| Value::Integer(id)).collect()));
        }
        if let Some(ids) = &self.protein_ids {
            columns.push(("v.protein_id", ids.iter().map(|&id| Value::Integer(id)).collect()));
        }
        columns
    }

    /// SQL conditions and their positional parameters.
    ///
    /// Each key set is split into lists of at most `MAX_IN_LIST` values, so a
    /// large expansion becomes several conditions that together match
    /// exactly the rows of the whole predicate and never overlap. An
    /// unconstrained predicate is the single condition `1`.
    pub fn to_sql(&self) -> Vec<(String, Vec<Value>)> {
        let mut parts: Vec<(Vec<String>, Vec<Value>)> = vec![(Vec::new(), Vec::new())];
        for (column, values) in self.columns() {
            let mut next = Vec::with_capacity(parts.len() * values.len().div_ceil(MAX_IN_LIST));
            for chunk in values.chunks(MAX_IN_LIST) {
                for (clauses, params) in &parts {
                    let (mut clauses, mut params) = (clauses.clone(), params.clone());
                    push_in_list(&mut clauses, &mut params, column, chunk);
                    next.push((clauses, params));
                }
            }
            parts = next;
        }

        parts
            .into_iter()
            .map(|(clauses, params)| match clauses.is_empty() {
                true => ("1".to_string(), params),
                false => (clauses.join(" AND "), params),
            })
            .collect()
    }
}

/// An executable query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub predicate: Predicate,
    pub fields: Vec<Field>,
    /// Requested predictors as (id, score table key).
    pub predictors: Vec<(String, i64)>,
    pub maps: Vec<AnnotationMap>,
}

impl QueryPlan {
    pub fn dna_codes(&self) -> Option<&[u64]> {
        self.predicate.dna_codes.as_deref()
    }

    pub fn protein_codes(&self) -> Option<&[u32]> {
        self.predicate.protein_codes.as_deref()
    }

    pub fn wants(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Execute(QueryPlan),
    /// A named identifier resolved to nothing; no row can match.
    EmptyResult,
}

/// Builds [`QueryPlan`]s against the catalogues of one store handle.
pub struct QueryPlanner<'a> {
    conn: &'a Connection,
    config: &'a StoreConfig,
    identifiers: &'a Identifiers,
    maps: &'a AnnotationMapRegistry,
    predictors: &'a PredictorRegistry,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(
        conn: &'a Connection,
        config: &'a StoreConfig,
        identifiers: &'a Identifiers,
        maps: &'a AnnotationMapRegistry,
        predictors: &'a PredictorRegistry,
    ) -> Self {
        QueryPlanner {
            conn,
            config,
            identifiers,
            maps,
            predictors,
        }
    }

    pub fn plan(&self, request: &QueryRequest) -> Result<PlanOutcome> {
        let predictors = request
            .predictors
            .iter()
            .map(|id| {
                let predictor = self.predictors.get_or_err(id)?;
                Ok((predictor.id.clone(), predictor.key))
            })
            .collect::<Result<Vec<_>>>()?;
        let maps = request
            .maps
            .iter()
            .map(|id| self.maps.map_or_err(id).cloned())
            .collect::<Result<Vec<_>>>()?;

        let predicate = match self.predicate(&request.filter)? {
            Some(predicate) => predicate,
            None => return Ok(PlanOutcome::EmptyResult),
        };

        Ok(PlanOutcome::Execute(QueryPlan {
            predicate,
            fields: request.fields.clone(),
            predictors,
            maps,
        }))
    }

    /// Predicate for `filter`, or `None` when a named identifier resolves to nothing.
    pub fn predicate(&self, filter: &QueryFilter) -> Result<Option<Predicate>> {
        let dna_codes = expand_dna(filter)?;
        let protein_codes = expand_protein(filter)?;
        debug!(
            "Expanded filter into {} DNA and {} protein keys",
            dna_codes.as_ref().map_or(0, Vec::len),
            protein_codes.as_ref().map_or(0, Vec::len)
        );

        let transcript_ids = self.resolve_names(IdentifierKind::Transcript, filter.names(IdentifierKind::Transcript))?;
        let protein_ids = self.resolve_names(IdentifierKind::Protein, filter.names(IdentifierKind::Protein))?;
        if transcript_ids.as_ref().is_some_and(BTreeSet::is_empty)
            || protein_ids.as_ref().is_some_and(BTreeSet::is_empty)
        {
            return Ok(None);
        }

        Ok(Some(Predicate {
            dna_codes,
            protein_codes,
            transcript_ids,
            protein_ids,
        }))
    }

    fn native_prefix(&self, kind: IdentifierKind) -> &str {
        match kind {
            IdentifierKind::Transcript => &self.config.native_transcript_prefix,
            IdentifierKind::Protein => &self.config.native_protein_prefix,
        }
    }

    /// Union of the ids of every name, or `None` when no name is given.
    ///
    /// Native names go straight to the interner. Any other name is tried
    /// against the eligible annotation maps in priority order and finally
    /// against the interner.
    fn resolve_names(&self, kind: IdentifierKind, names: &[String]) -> Result<Option<BTreeSet<i64>>> {
        if names.is_empty() {
            return Ok(None);
        }

        let interned = InternedNames::new(self.conn, self.identifiers.get(kind));
        let tables: Vec<MapTable> = self
            .maps
            .resolution_order(kind)
            .into_iter()
            .map(|map| MapTable::new(self.conn, map))
            .collect();
        let mut chain: Vec<&dyn IdentifierSource> = tables.iter().map(|t| t as &dyn IdentifierSource).collect();
        chain.push(&interned);

        let prefix = self.native_prefix(kind);
        let mut ids = BTreeSet::new();
        for name in names {
            let resolved = match !prefix.is_empty() && name.starts_with(prefix) {
                true => interned.lookup(name)?,
                false => resolve_first(&chain, name)?,
            };
            debug!("Resolved {} '{}' to {} ids", kind, name, resolved.len());
            ids.extend(resolved);
        }
        Ok(Some(ids))
    }
}
