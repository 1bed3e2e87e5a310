//! Fuzzy search over the merged bibliography
//!
//! `fuzzy` holds the per-field similarity measure, `index` the weighted
//! multi-field index the manager rebuilds on every generation.

pub mod fuzzy;
pub mod index;

pub use index::{SearchField, SearchHit, SearchIndex};
