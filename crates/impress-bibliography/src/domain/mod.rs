//! Domain models for merged bibliographies
//!
//! - `BibliographySource`: one normalized (CSL-JSON shaped) record
//! - `BibliographySourceWithCollections`: the indexed unit, a source plus its collection keys
//! - `BibliographyCollection`: a provider-scoped grouping, linked into a forest by parent keys
//! - `BibliographyFile`: a writable (or not) bibliography location

pub mod collection;
pub mod file;
pub mod source;

pub use collection::*;
pub use file::*;
pub use source::*;
