use std::fmt::Display;
use std::str::FromStr;

use fxhash::FxHashMap;
use log::info;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::errors::{Result, StoreError, validate_identifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictorKind {
    /// Imported directly from a score source.
    Source,
    /// Computed from other predictors.
    Derived,
}

impl PredictorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorKind::Source => "source",
            PredictorKind::Derived => "derived",
        }
    }
}

impl FromStr for PredictorKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(PredictorKind::Source),
            "derived" => Ok(PredictorKind::Derived),
            _ => Err(StoreError::InvalidPredictor {
                id: String::new(),
                reason: format!("unknown predictor kind '{}'", s),
            }),
        }
    }
}

impl Display for PredictorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Statistics of one predictor as of the last batch pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PredictorStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predictor {
    /// Integer key used in the score table.
    pub key: i64,
    pub id: String,
    pub kind: PredictorKind,
    pub sources: Vec<String>,
    pub stats: PredictorStats,
}

/// The catalogue of score columns, in registration order.
#[derive(Debug, Default)]
pub struct PredictorRegistry {
    predictors: Vec<Predictor>,
    by_id: FxHashMap<String, usize>,
}

impl PredictorRegistry {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT predictor_key, id, type, source, min, max, count FROM predictors ORDER BY predictor_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                PredictorStats {
                    min: row.get(4)?,
                    max: row.get(5)?,
                    count: row.get::<_, i64>(6)? as u64,
                },
            ))
        })?;

        let mut registry = PredictorRegistry::default();
        for row in rows {
            let (key, id, kind, source, stats) = row?;
            let sources = match source {
                Some(json) => serde_json::from_str(&json).map_err(|e| {
                    StoreError::InvalidPredictor {
                        id: id.clone(),
                        reason: format!("unreadable source list: {}", e),
                    }
                })?,
                None => Vec::new(),
            };
            let kind = kind.parse::<PredictorKind>().map_err(|_| StoreError::InvalidPredictor {
                id: id.clone(),
                reason: format!("unknown predictor kind '{}'", kind),
            })?;
            registry.push(Predictor {
                key,
                id,
                kind,
                sources,
                stats,
            });
        }
        Ok(registry)
    }

    fn push(&mut self, predictor: Predictor) {
        self.by_id.insert(predictor.id.clone(), self.predictors.len());
        self.predictors.push(predictor);
    }

    /// Register a new predictor with empty statistics.
    pub fn add_predictor(
        &mut self,
        conn: &Connection,
        id: &str,
        kind: PredictorKind,
        sources: &[&str],
    ) -> Result<&Predictor> {
        validate_identifier(id)?;
        if self.by_id.contains_key(id) {
            return Err(StoreError::PredictorAlreadyExists(id.to_string()));
        }
        match kind {
            PredictorKind::Source if !sources.is_empty() => {
                return Err(StoreError::InvalidPredictor {
                    id: id.to_string(),
                    reason: "a source predictor cannot have source predictors".to_string(),
                });
            }
            PredictorKind::Derived if sources.is_empty() => {
                return Err(StoreError::InvalidPredictor {
                    id: id.to_string(),
                    reason: "a derived predictor needs at least one source predictor".to_string(),
                });
            }
            _ => {}
        }
        if let Some(unknown) = sources.iter().find(|s| !self.by_id.contains_key(**s)) {
            return Err(StoreError::UnknownPredictor(unknown.to_string()));
        }

        let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        let source_json = match sources.is_empty() {
            true => None,
            false => Some(serde_json::to_string(&sources).map_err(|e| {
                StoreError::InvalidPredictor {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
            })?),
        };
        conn.execute(
            "INSERT INTO predictors (id, type, source) VALUES (?1, ?2, ?3)",
            params![id, kind.as_str(), source_json],
        )?;

        self.push(Predictor {
            key: conn.last_insert_rowid(),
            id: id.to_string(),
            kind,
            sources,
            stats: PredictorStats::default(),
        });
        self.get_or_err(id)
    }

    /// Recompute min, max and non-null count of `ids` (all predictors when
    /// empty) in one aggregate pass over the score table.
    pub fn recompute_statistics(&mut self, conn: &Connection, ids: &[&str]) -> Result<()> {
        let targets: Vec<usize> = if ids.is_empty() {
            (0..self.predictors.len()).collect()
        } else {
            ids.iter()
                .map(|id| {
                    self.by_id
                        .get(*id)
                        .copied()
                        .ok_or_else(|| StoreError::UnknownPredictor(id.to_string()))
                })
                .collect::<Result<_>>()?
        };
        if targets.is_empty() {
            return Ok(());
        }

        let keys: Vec<i64> = targets.iter().map(|&i| self.predictors[i].key).collect();
        let placeholders = vec!["?"; keys.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT predictor_key, MIN(value), MAX(value), COUNT(value) FROM scores
             WHERE predictor_key IN ({}) GROUP BY predictor_key",
            placeholders
        ))?;
        let rows = stmt.query_map(params_from_iter(keys.iter().map(|k| Value::Integer(*k))), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                PredictorStats {
                    min: row.get(1)?,
                    max: row.get(2)?,
                    count: row.get::<_, i64>(3)? as u64,
                },
            ))
        })?;
        let mut computed: FxHashMap<i64, PredictorStats> = FxHashMap::default();
        for row in rows {
            let (key, stats) = row?;
            computed.insert(key, stats);
        }

        let mut update =
            conn.prepare("UPDATE predictors SET min = ?1, max = ?2, count = ?3 WHERE predictor_key = ?4")?;
        for index in targets {
            let predictor = &mut self.predictors[index];
            let stats = computed.get(&predictor.key).copied().unwrap_or_default();
            update.execute(params![stats.min, stats.max, stats.count as i64, predictor.key])?;
            predictor.stats = stats;
        }

        info!("Recomputed statistics for {} predictors", keys.len());
        Ok(())
    }

    /// All predictors in registration order.
    pub fn list(&self) -> &[Predictor] {
        &self.predictors
    }

    pub fn get(&self, id: &str) -> Option<&Predictor> {
        self.by_id.get(id).map(|&i| &self.predictors[i])
    }

    pub fn get_or_err(&self, id: &str) -> Result<&Predictor> {
        self.get(id)
            .ok_or_else(|| StoreError::UnknownPredictor(id.to_string()))
    }

    pub fn of_kind(&self, kind: PredictorKind) -> impl Iterator<Item = &Predictor> {
        self.predictors.iter().filter(move |p| p.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.predictors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictors.is_empty()
    }
}
