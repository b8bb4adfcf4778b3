use std::fmt::Display;
use std::str::FromStr;

use crate::errors::CoordinateError;

/// Value stored in an encoding array for bytes outside the alphabet.
pub const INVALID_SYMBOL: u8 = 0xFF;

/// A closed alphabet of single-byte symbols with its encoding lookup table.
///
/// The ordinal of a symbol is its position in `symbols`; `encoding_array` maps
/// both the upper and lower case byte of every symbol to that ordinal and all
/// other bytes to [`INVALID_SYMBOL`].
pub struct Alphabet {
    pub symbols: &'static [u8],
    pub encoding_array: &'static [u8; 256],
    pub bits_per_symbol: u32,
}

impl Alphabet {
    /// Ordinal of `byte`, or `None` if the byte is not part of the alphabet.
    pub fn encode(&self, byte: u8) -> Option<u8> {
        match self.encoding_array[byte as usize] {
            INVALID_SYMBOL => None,
            code => Some(code),
        }
    }

    /// Symbol for an ordinal, or `None` if the ordinal is out of range.
    pub fn decode(&self, code: u8) -> Option<u8> {
        self.symbols.get(code as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

const fn build_encoding_array(symbols: &[u8]) -> [u8; 256] {
    let mut arr = [INVALID_SYMBOL; 256];
    let mut i = 0;
    while i < symbols.len() {
        let symbol = symbols[i];
        arr[symbol as usize] = i as u8;
        arr[symbol.to_ascii_lowercase() as usize] = i as u8;
        i += 1;
    }
    arr
}

const NUCLEOTIDE_SYMBOLS: &[u8] = b"ACGT";

const NUCLEOTIDE_ENCODING_ARRAY: [u8; 256] = build_encoding_array(NUCLEOTIDE_SYMBOLS);

/// The 20 standard amino acids followed by the six extended/ambiguous codes.
/// The ordinal of each symbol is persisted in protein codes and must not change.
const AMINO_ACID_SYMBOLS: &[u8] = b"ARNDCEQGHILKMFPSTWYVUOBZJX";

const AMINO_ACID_ENCODING_ARRAY: [u8; 256] = build_encoding_array(AMINO_ACID_SYMBOLS);

pub const NUCLEOTIDE_ALPHABET: Alphabet = Alphabet {
    symbols: NUCLEOTIDE_SYMBOLS,
    encoding_array: &NUCLEOTIDE_ENCODING_ARRAY,
    bits_per_symbol: 2,
};

pub const AMINO_ACID_ALPHABET: Alphabet = Alphabet {
    symbols: AMINO_ACID_SYMBOLS,
    encoding_array: &AMINO_ACID_ENCODING_ARRAY,
    bits_per_symbol: 5,
};

/// Chromosome names by index. Index 0 is reserved and never encoded.
pub const CHROMOSOME_NAMES: [&str; 25] = [
    "", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16",
    "17", "18", "19", "20", "21", "22", "X", "Y",
];

/// One of the 24 human chromosomes, stored as its index (1..=24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chromosome(u8);

impl Chromosome {
    pub const COUNT: usize = 24;

    pub fn from_index(index: u8) -> Option<Self> {
        (1..=Self::COUNT as u8).contains(&index).then_some(Chromosome(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        CHROMOSOME_NAMES[self.0 as usize]
    }

    /// All chromosomes in index order.
    pub fn all() -> impl Iterator<Item = Chromosome> {
        (1..=Self::COUNT as u8).map(Chromosome)
    }
}

impl FromStr for Chromosome {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = match s.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &s[3..],
            _ => s,
        };
        let index = match name {
            "X" | "x" | "23" => 23,
            "Y" | "y" | "24" => 24,
            digits
                if !digits.is_empty()
                    && !digits.starts_with('0')
                    && digits.bytes().all(|b| b.is_ascii_digit()) =>
            {
                digits
                    .parse::<u8>()
                    .ok()
                    .filter(|i| (1..=22).contains(i))
                    .ok_or_else(|| CoordinateError::Chromosome(s.to_string()))?
            }
            _ => return Err(CoordinateError::Chromosome(s.to_string())),
        };
        Ok(Chromosome(index))
    }
}

impl Display for Chromosome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Strand {
    Forward = 0,
    Reverse = 1,
}

impl Strand {
    pub const ALL: [Strand; 2] = [Strand::Forward, Strand::Reverse];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Strand::Forward),
            1 => Some(Strand::Reverse),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        }
    }
}

impl FromStr for Strand {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" | "+1" | "1" => Ok(Strand::Forward),
            "-" | "-1" => Ok(Strand::Reverse),
            _ => Err(CoordinateError::Strand(s.to_string())),
        }
    }
}

impl Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Nucleotide {
    A = 0,
    C = 1,
    G = 2,
    T = 3,
}

impl Nucleotide {
    pub const ALL: [Nucleotide; 4] = [Nucleotide::A, Nucleotide::C, Nucleotide::G, Nucleotide::T];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        NUCLEOTIDE_ALPHABET.encode(byte).and_then(Self::from_index)
    }

    pub fn as_byte(self) -> u8 {
        NUCLEOTIDE_SYMBOLS[self as usize]
    }
}

impl FromStr for Nucleotide {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.as_bytes() {
            [byte] => Self::from_byte(*byte),
            _ => None,
        };
        parsed.ok_or_else(|| CoordinateError::Nucleotide(s.to_string()))
    }
}

impl Display for Nucleotide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// An amino acid from the fixed 26-symbol alphabet, stored as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AminoAcid(u8);

impl AminoAcid {
    pub const COUNT: usize = 26;

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn from_index(index: u8) -> Option<Self> {
        ((index as usize) < Self::COUNT).then_some(AminoAcid(index))
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        AMINO_ACID_ALPHABET.encode(byte).map(AminoAcid)
    }

    pub fn as_byte(self) -> u8 {
        AMINO_ACID_SYMBOLS[self.0 as usize]
    }

    /// All amino acids in ordinal order.
    pub fn all() -> impl Iterator<Item = AminoAcid> {
        (0..Self::COUNT as u8).map(AminoAcid)
    }
}

impl FromStr for AminoAcid {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s.as_bytes() {
            [byte] => Self::from_byte(*byte),
            _ => None,
        };
        parsed.ok_or_else(|| CoordinateError::AminoAcid(s.to_string()))
    }
}

impl Display for AminoAcid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}
