use std::collections::BTreeMap;
use std::fmt::Display;

use fanns_core::{DnaVariant, ProteinChange};

/// A variant to insert, with its optional transcript, protein and scores.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVariant {
    pub dna: DnaVariant,
    pub transcript: Option<String>,
    pub protein: Option<String>,
    pub protein_change: Option<ProteinChange>,
    pub scores: BTreeMap<String, f64>,
}

impl NewVariant {
    pub fn new(dna: DnaVariant) -> Self {
        NewVariant {
            dna,
            transcript: None,
            protein: None,
            protein_change: None,
            scores: BTreeMap::new(),
        }
    }

    pub fn with_transcript(mut self, name: &str) -> Self {
        self.transcript = Some(name.to_string());
        self
    }

    /// Attach the protein and the amino-acid change this variant causes in it.
    pub fn with_protein(mut self, name: &str, change: ProteinChange) -> Self {
        self.protein = Some(name.to_string());
        self.protein_change = Some(change);
        self
    }

    pub fn with_protein_change(mut self, change: ProteinChange) -> Self {
        self.protein_change = Some(change);
        self
    }

    pub fn with_score(mut self, predictor: &str, value: f64) -> Self {
        self.scores.insert(predictor.to_string(), value);
        self
    }
}

/// One row returned by a query.
///
/// Packed codes and interned ids are always present. Decoded coordinates
/// and names are filled in only for the fields the query asked for;
/// `scores` holds one entry per requested predictor (`None` when the row
/// has no value) and `annotations` one entry per requested map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoredRow {
    pub id: i64,
    pub dna_code: u64,
    pub transcript_id: Option<i64>,
    pub protein_code: Option<u32>,
    pub protein_id: Option<i64>,
    pub dna: Option<DnaVariant>,
    pub protein_change: Option<ProteinChange>,
    pub transcript: Option<String>,
    pub protein: Option<String>,
    pub scores: BTreeMap<String, Option<f64>>,
    pub annotations: BTreeMap<String, Vec<String>>,
}

impl ScoredRow {
    pub fn score(&self, predictor: &str) -> Option<f64> {
        self.scores.get(predictor).copied().flatten()
    }

    pub fn annotation(&self, map_id: &str) -> &[String] {
        self.annotations.get(map_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Display for ScoredRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id)?;
        if let Some(dna) = &self.dna {
            write!(f, " {}", dna)?;
        }
        if let Some(transcript) = &self.transcript {
            write!(f, " {}", transcript)?;
        }
        if let Some(protein) = &self.protein {
            write!(f, " {}", protein)?;
        }
        if let Some(change) = &self.protein_change {
            write!(f, " {}", change)?;
        }
        for (predictor, value) in &self.scores {
            match value {
                Some(value) => write!(f, " {}={}", predictor, value)?,
                None => write!(f, " {}=NA", predictor)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_row() {
        let dna = DnaVariant::parse("17", "+", 7577121, "G", "A").unwrap();
        let mut row = ScoredRow {
            id: 1,
            dna: Some(dna),
            transcript: Some("T1".to_string()),
            ..ScoredRow::default()
        };
        row.scores.insert("pph2".to_string(), None);
        row.scores.insert("sift".to_string(), Some(0.02));

        assert_eq!(row.to_string(), "#1 17:+:7577121:G>A T1 pph2=NA sift=0.02");
        assert_eq!(row.score("sift"), Some(0.02));
        assert_eq!(row.score("pph2"), None);
        assert!(row.annotation("symbol").is_empty());
    }
}
