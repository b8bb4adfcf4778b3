use thiserror::Error;

/// A coordinate component that falls outside its closed alphabet or bit width.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("Invalid chromosome: '{0}'")]
    Chromosome(String),

    #[error("Invalid strand: '{0}'")]
    Strand(String),

    #[error("Invalid nucleotide: '{0}'")]
    Nucleotide(String),

    #[error("Invalid amino acid: '{0}'")]
    AminoAcid(String),

    #[error("Invalid position: '{0}'")]
    Position(String),

    #[error("Genomic positions are 1-based, got 0")]
    ZeroPosition,

    #[error("Position {position} exceeds the maximum of {max}")]
    PositionOutOfRange { position: u64, max: u64 },

    #[error("Invalid DNA code: {0:#x}")]
    DnaCode(u64),

    #[error("Invalid protein code: {0:#x}")]
    ProteinCode(u32),
}

pub type Result<T> = std::result::Result<T, CoordinateError>;
