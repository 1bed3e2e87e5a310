//! impress-bibliography: merged bibliographies for impress documents
//!
//! This library provides:
//! - A provider protocol for bibliography backends, with a document-local
//!   file provider (BibTeX/BibLaTeX, CSL-JSON) and a Zotero library provider
//! - A manager that loads providers concurrently, merges their records into
//!   atomically published generations and gates visibility on writability
//! - A weighted fuzzy search index over the merged records
//! - Generic BibLaTeX citation synthesis and cite key generation

pub mod citation;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod manager;
pub mod provider;
pub mod search;
pub mod writability;

pub use config::{BibliographyConfig, FieldWeights, LocalConfig, SearchConfig, ZoteroConfig};
pub use domain::{
    BibliographyCollection, BibliographyFile, BibliographySource,
    BibliographySourceWithCollections, CslDate, CslName,
};
pub use error::{ConfigError, ProviderError};
pub use http::{HttpClient, HttpError};
pub use manager::{BibliographyManager, LoadSummary};
pub use provider::local::LOCAL_PROVIDER_KEY;
pub use provider::zotero::ZOTERO_PROVIDER_KEY;
pub use provider::{BibliographyProvider, DocumentContext, LocalFileProvider, ZoteroProvider};
pub use search::{SearchHit, SearchIndex};
