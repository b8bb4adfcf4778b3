//! Reversible packing of genomic and protein coordinates into single integers.
//!
//! **DNA code layout (u64, LSB first)**
//!
//! | bits   | field                          |
//! |--------|--------------------------------|
//! | 0..2   | alternate base (A=0 .. T=3)    |
//! | 2..4   | reference base                 |
//! | 4..32  | 1-based position (28 bits)     |
//! | 32     | strand (0 = `+`, 1 = `-`)      |
//! | 33..38 | chromosome index (1..=24)      |
//!
//! **Protein code layout (u32, LSB first)**
//!
//! | bits   | field                                  |
//! |--------|----------------------------------------|
//! | 0..5   | alternate amino acid ordinal           |
//! | 5..10  | reference amino acid ordinal           |
//! | 10..32 | 1-based position (22 bits, 0=unknown)  |
//!
//! Both layouts are persisted and must stay bit-exact.

use std::fmt::Display;

use crate::alphabet::{AMINO_ACID_ALPHABET, AminoAcid, Chromosome, NUCLEOTIDE_ALPHABET, Nucleotide, Strand};
use crate::errors::{CoordinateError, Result};

const BASE_BITS: u32 = NUCLEOTIDE_ALPHABET.bits_per_symbol;
const BASE_MASK: u64 = (1 << BASE_BITS) - 1;
const REFERENCE_SHIFT: u32 = 2;
const POSITION_SHIFT: u32 = 4;
pub const DNA_POSITION_BITS: u32 = 28;
const DNA_POSITION_MASK: u64 = (1 << DNA_POSITION_BITS) - 1;
const STRAND_SHIFT: u32 = 32;
const CHROMOSOME_SHIFT: u32 = 33;
const CHROMOSOME_MASK: u64 = 0x1F;
const DNA_CODE_BITS: u32 = 38;

const AMINO_ACID_BITS: u32 = AMINO_ACID_ALPHABET.bits_per_symbol;
const AMINO_ACID_MASK: u32 = (1 << AMINO_ACID_BITS) - 1;
const AA_REFERENCE_SHIFT: u32 = 5;
const AA_POSITION_SHIFT: u32 = 10;
pub const AA_POSITION_BITS: u32 = 22;

/// Largest encodable genomic position.
pub const MAX_DNA_POSITION: u32 = (1 << DNA_POSITION_BITS) - 1;

/// Largest encodable amino-acid position.
pub const MAX_AA_POSITION: u32 = (1 << AA_POSITION_BITS) - 1;

/// Amino-acid position meaning "position not known".
pub const UNKNOWN_AA_POSITION: u32 = 0;

/// A single-nucleotide variant in genomic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DnaVariant {
    pub chromosome: Chromosome,
    pub strand: Strand,
    pub position: u32,
    pub reference: Nucleotide,
    pub alternate: Nucleotide,
}

impl DnaVariant {
    /// Build a variant, rejecting position 0 and positions wider than the code allows.
    pub fn new(
        chromosome: Chromosome,
        strand: Strand,
        position: u32,
        reference: Nucleotide,
        alternate: Nucleotide,
    ) -> Result<Self> {
        check_dna_position(position)?;
        Ok(DnaVariant {
            chromosome,
            strand,
            position,
            reference,
            alternate,
        })
    }

    /// Build a variant from its textual components, e.g. `("17", "+", 7577121, "G", "A")`.
    pub fn parse(chromosome: &str, strand: &str, position: u32, reference: &str, alternate: &str) -> Result<Self> {
        DnaVariant::new(
            chromosome.parse()?,
            strand.parse()?,
            position,
            reference.parse()?,
            alternate.parse()?,
        )
    }

    pub fn code(&self) -> Result<u64> {
        encode_dna(
            self.chromosome,
            self.strand,
            self.position,
            self.reference,
            self.alternate,
        )
    }
}

impl Display for DnaVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}>{}",
            self.chromosome, self.strand, self.position, self.reference, self.alternate
        )
    }
}

/// An amino-acid substitution at a protein position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProteinChange {
    pub position: u32,
    pub reference: AminoAcid,
    pub alternate: AminoAcid,
}

impl ProteinChange {
    pub fn new(position: u32, reference: AminoAcid, alternate: AminoAcid) -> Result<Self> {
        check_position(position, MAX_AA_POSITION)?;
        Ok(ProteinChange {
            position,
            reference,
            alternate,
        })
    }

    pub fn parse(position: u32, reference: &str, alternate: &str) -> Result<Self> {
        ProteinChange::new(position, reference.parse()?, alternate.parse()?)
    }

    /// A substitution whose position is not known.
    pub fn unknown_position(reference: AminoAcid, alternate: AminoAcid) -> Self {
        ProteinChange {
            position: UNKNOWN_AA_POSITION,
            reference,
            alternate,
        }
    }

    pub fn has_known_position(&self) -> bool {
        self.position != UNKNOWN_AA_POSITION
    }

    pub fn code(&self) -> Result<u32> {
        encode_protein(self.position, self.reference, self.alternate)
    }
}

impl Display for ProteinChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.reference, self.position, self.alternate)
    }
}

fn check_position(position: u32, max: u32) -> Result<()> {
    if position > max {
        return Err(CoordinateError::PositionOutOfRange {
            position: position as u64,
            max: max as u64,
        });
    }
    Ok(())
}

fn check_dna_position(position: u32) -> Result<()> {
    if position == 0 {
        return Err(CoordinateError::ZeroPosition);
    }
    check_position(position, MAX_DNA_POSITION)
}

/// Pack a genomic SNV into its 64-bit code.
pub fn encode_dna(
    chromosome: Chromosome,
    strand: Strand,
    position: u32,
    reference: Nucleotide,
    alternate: Nucleotide,
) -> Result<u64> {
    check_dna_position(position)?;
    Ok((chromosome.index() as u64) << CHROMOSOME_SHIFT
        | (strand.index() as u64) << STRAND_SHIFT
        | (position as u64) << POSITION_SHIFT
        | (reference.index() as u64) << REFERENCE_SHIFT
        | alternate.index() as u64)
}

/// Unpack a 64-bit DNA code.
///
/// Never fails for codes produced by [`encode_dna`]; any other integer whose
/// fields fall outside the alphabets is rejected.
pub fn decode_dna(code: u64) -> Result<DnaVariant> {
    if code >> DNA_CODE_BITS != 0 {
        return Err(CoordinateError::DnaCode(code));
    }
    let chromosome = Chromosome::from_index(((code >> CHROMOSOME_SHIFT) & CHROMOSOME_MASK) as u8)
        .ok_or(CoordinateError::DnaCode(code))?;
    let strand = Strand::from_index(((code >> STRAND_SHIFT) & 1) as u8)
        .ok_or(CoordinateError::DnaCode(code))?;
    let position = ((code >> POSITION_SHIFT) & DNA_POSITION_MASK) as u32;
    if position == 0 {
        return Err(CoordinateError::DnaCode(code));
    }
    let reference = Nucleotide::from_index(((code >> REFERENCE_SHIFT) & BASE_MASK) as u8)
        .ok_or(CoordinateError::DnaCode(code))?;
    let alternate = Nucleotide::from_index((code & BASE_MASK) as u8)
        .ok_or(CoordinateError::DnaCode(code))?;

    Ok(DnaVariant {
        chromosome,
        strand,
        position,
        reference,
        alternate,
    })
}

/// Pack an amino-acid substitution into its 32-bit code.
pub fn encode_protein(position: u32, reference: AminoAcid, alternate: AminoAcid) -> Result<u32> {
    check_position(position, MAX_AA_POSITION)?;
    Ok(position << AA_POSITION_SHIFT
        | (reference.index() as u32) << AA_REFERENCE_SHIFT
        | alternate.index() as u32)
}

/// Unpack a 32-bit protein code.
pub fn decode_protein(code: u32) -> Result<ProteinChange> {
    let reference = AminoAcid::from_index(((code >> AA_REFERENCE_SHIFT) & AMINO_ACID_MASK) as u8)
        .ok_or(CoordinateError::ProteinCode(code))?;
    let alternate = AminoAcid::from_index((code & AMINO_ACID_MASK) as u8)
        .ok_or(CoordinateError::ProteinCode(code))?;

    Ok(ProteinChange {
        position: code >> AA_POSITION_SHIFT,
        reference,
        alternate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::collections::HashSet;

    fn dna(chromosome: &str, strand: &str, position: u32, reference: &str, alternate: &str) -> DnaVariant {
        DnaVariant::parse(chromosome, strand, position, reference, alternate).unwrap()
    }

    #[test]
    fn test_dna_code_layout() {
        let variant = dna("17", "+", 7577121, "G", "A");
        let code = variant.code().unwrap();
        assert_eq!(code, 146150122008);
        assert_eq!(code >> 33, 17);
        assert_eq!((code >> 32) & 1, 0);
        assert_eq!((code >> 4) & 0x0FFF_FFFF, 7577121);
        assert_eq!((code >> 2) & 0b11, 2);
        assert_eq!(code & 0b11, 0);
    }

    #[test]
    fn test_dna_code_upper_bound() {
        let variant = dna("Y", "-", MAX_DNA_POSITION, "T", "T");
        let code = variant.code().unwrap();
        assert_eq!(code, 214748364799);
        assert!(code < 1 << 38);
        assert_eq!(decode_dna(code).unwrap(), variant);
    }

    #[rstest]
    #[case("1", "+", 1, "A", "C")]
    #[case("17", "+", 7577121, "G", "A")]
    #[case("22", "-", 51304566, "C", "T")]
    #[case("X", "-", 153000000, "T", "G")]
    #[case("Y", "+", 2781480, "A", "A")]
    #[case("3", "-", 1, "C", "C")]
    fn test_dna_round_trip(
        #[case] chromosome: &str,
        #[case] strand: &str,
        #[case] position: u32,
        #[case] reference: &str,
        #[case] alternate: &str,
    ) {
        let variant = dna(chromosome, strand, position, reference, alternate);
        let decoded = decode_dna(variant.code().unwrap()).unwrap();
        assert_eq!(decoded, variant);
        assert_eq!(decoded.chromosome.name(), chromosome);
    }

    #[test]
    fn test_dna_codes_are_injective_around_a_position() {
        let mut codes = HashSet::new();
        let mut count = 0;
        for chromosome in Chromosome::all() {
            for strand in Strand::ALL {
                for position in [1, 2, MAX_DNA_POSITION] {
                    for reference in Nucleotide::ALL {
                        for alternate in Nucleotide::ALL {
                            let code =
                                encode_dna(chromosome, strand, position, reference, alternate)
                                    .unwrap();
                            codes.insert(code);
                            count += 1;
                        }
                    }
                }
            }
        }
        assert_eq!(codes.len(), count);
    }

    #[test]
    fn test_dna_position_out_of_range() {
        let result = DnaVariant::parse("1", "+", MAX_DNA_POSITION + 1, "A", "C");
        assert_eq!(
            result,
            Err(CoordinateError::PositionOutOfRange {
                position: (MAX_DNA_POSITION + 1) as u64,
                max: MAX_DNA_POSITION as u64,
            })
        );
    }

    #[test]
    fn test_dna_positions_are_one_based() {
        assert_eq!(
            DnaVariant::parse("3", "-", 0, "C", "T"),
            Err(CoordinateError::ZeroPosition)
        );
        assert_eq!(
            encode_dna(Chromosome::from_index(3).unwrap(), Strand::Reverse, 0, Nucleotide::C, Nucleotide::T),
            Err(CoordinateError::ZeroPosition)
        );
        let zero = (3 << 33) | (1 << 32) | (1 << 2) | 3;
        assert_eq!(decode_dna(zero), Err(CoordinateError::DnaCode(zero)));
    }

    #[test]
    fn test_decode_rejects_foreign_dna_codes() {
        // chromosome index 0 is reserved
        assert!(decode_dna(7577121 << 4).is_err());
        // chromosome index 25 is outside the alphabet
        assert!(decode_dna(25 << 33).is_err());
        assert!(decode_dna(1 << 40).is_err());
    }

    #[test]
    fn test_protein_code_layout() {
        let change = ProteinChange::parse(175, "R", "H").unwrap();
        let code = change.code().unwrap();
        assert_eq!(code, 179240);
        assert_eq!(code >> 10, 175);
        assert_eq!((code >> 5) & 0x1F, 1);
        assert_eq!(code & 0x1F, 8);
        assert_eq!(change.to_string(), "R175H");
    }

    #[rstest]
    #[case(1, "A", "R")]
    #[case(175, "R", "H")]
    #[case(MAX_AA_POSITION, "X", "X")]
    #[case(UNKNOWN_AA_POSITION, "U", "J")]
    fn test_protein_round_trip(#[case] position: u32, #[case] reference: &str, #[case] alternate: &str) {
        let change = ProteinChange::parse(position, reference, alternate).unwrap();
        assert_eq!(decode_protein(change.code().unwrap()).unwrap(), change);
    }

    #[test]
    fn test_unknown_protein_position_is_preserved() {
        let change = ProteinChange::unknown_position(
            "W".parse().unwrap(),
            "Y".parse().unwrap(),
        );
        assert!(!change.has_known_position());
        let decoded = decode_protein(change.code().unwrap()).unwrap();
        assert_eq!(decoded.position, UNKNOWN_AA_POSITION);
    }

    #[test]
    fn test_protein_codes_are_injective() {
        let mut codes = HashSet::new();
        for reference in AminoAcid::all() {
            for alternate in AminoAcid::all() {
                codes.insert(encode_protein(42, reference, alternate).unwrap());
            }
        }
        assert_eq!(codes.len(), AminoAcid::COUNT * AminoAcid::COUNT);
    }

    #[test]
    fn test_protein_position_out_of_range() {
        assert!(ProteinChange::parse(MAX_AA_POSITION + 1, "A", "C").is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_protein_codes() {
        assert_eq!(decode_protein(26), Err(CoordinateError::ProteinCode(26)));
        assert_eq!(decode_protein(31 << 5), Err(CoordinateError::ProteinCode(31 << 5)));
    }
}
