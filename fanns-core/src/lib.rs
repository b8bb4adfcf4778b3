//! # Coordinate codes for single-nucleotide variants
//!
//! This crate provides the closed alphabets and the reversible bit packing used
//! to key a variant annotation store.
//!
//! ## Modules
//!
//! - `alphabet` - chromosomes, strands, nucleotides and amino acids with their ordinals
//! - `codec` - 64-bit DNA codes and 32-bit protein codes
//! - `errors` - the [`CoordinateError`] returned by every parser and codec
//!
//! ## Example
//!
//! ```
//! use fanns_core::{decode_dna, DnaVariant};
//!
//! let variant = DnaVariant::parse("17", "+", 7577121, "G", "A").unwrap();
//! let code = variant.code().unwrap();
//! assert_eq!(decode_dna(code).unwrap(), variant);
//! ```

pub mod alphabet;
pub mod codec;
pub mod errors;

pub use alphabet::{AminoAcid, Chromosome, Nucleotide, Strand};
pub use codec::{
    DnaVariant, MAX_AA_POSITION, MAX_DNA_POSITION, ProteinChange, UNKNOWN_AA_POSITION,
    decode_dna, decode_protein, encode_dna, encode_protein,
};
pub use errors::CoordinateError;
