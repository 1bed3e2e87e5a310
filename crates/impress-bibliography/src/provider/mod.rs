//! Bibliography providers
//!
//! A provider is one origin of sources (a document-local file, a reference
//! manager library). It owns its cache: the manager calls [`BibliographyProvider::load`]
//! and then only reads what the provider reports.

pub mod bibtex;
pub mod local;
pub mod zotero;

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::domain::{
    BibliographyCollection, BibliographyFile, BibliographySource,
    BibliographySourceWithCollections,
};
use crate::error::ProviderError;

pub use local::LocalFileProvider;
pub use zotero::ZoteroProvider;

/// What a provider needs to know about the document being edited.
///
/// Metadata blocks are already parsed by the editor layer; each is a JSON
/// object (YAML front matter and friends).
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    pub document_path: Option<PathBuf>,
    pub default_resource_dir: PathBuf,
    pub metadata: Vec<Value>,
}

impl DocumentContext {
    pub fn new(document_path: Option<PathBuf>, default_resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            document_path,
            default_resource_dir: default_resource_dir.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, block: Value) -> Self {
        self.metadata.push(block);
        self
    }

    /// Directory relative paths resolve against: the document's own
    /// directory, or the default resource dir for unsaved documents
    pub fn base_dir(&self) -> &Path {
        self.document_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(self.default_resource_dir.as_path())
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// Every value of `key` across metadata blocks, in block order
    pub fn metadata_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.metadata.iter().filter_map(move |block| block.get(key))
    }
}

/// Flatten a metadata value that may be a string or a list of strings
pub(crate) fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// A pluggable source of bibliography records.
///
/// Reads (`collections`, `items`, ...) are answered from the provider's last
/// successful load and never block on I/O.
#[async_trait]
pub trait BibliographyProvider: Send + Sync {
    /// Stable key stamped on every source this provider produces
    fn key(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Refresh the provider's cache; true iff its data set changed.
    ///
    /// Ordinary "no data" conditions are not errors: they leave the provider
    /// empty and may set a warning.
    async fn load(&self, context: &DocumentContext) -> Result<bool, ProviderError>;

    fn collections(&self) -> Vec<BibliographyCollection>;

    fn items(&self) -> Vec<BibliographySourceWithCollections>;

    fn items_for_collection(&self, key: &str) -> Vec<BibliographySourceWithCollections> {
        self.items()
            .into_iter()
            .filter(|item| item.in_collection(key))
            .collect()
    }

    /// On-disk targets this provider could write to
    fn bibliography_paths(&self, context: &DocumentContext) -> Vec<BibliographyFile>;

    /// Provider-specific citation record; `Ok(None)` defers to the generic formatter
    async fn generate_citation(
        &self,
        _context: &DocumentContext,
        _id: &str,
        _source: &BibliographySource,
    ) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }

    fn warning_message(&self) -> Option<String>;
}

/// Snapshot of a provider's last load
#[derive(Debug, Clone, Default)]
pub(crate) struct CacheState {
    pub items: Vec<BibliographySourceWithCollections>,
    pub collections: Vec<BibliographyCollection>,
    pub warning: Option<String>,
}

/// Interior-mutable cache shared by the built-in providers
#[derive(Debug, Default)]
pub(crate) struct ProviderCache {
    state: RwLock<CacheState>,
}

impl ProviderCache {
    pub fn read<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut CacheState) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn items(&self) -> Vec<BibliographySourceWithCollections> {
        self.read(|s| s.items.clone())
    }

    pub fn collections(&self) -> Vec<BibliographyCollection> {
        self.read(|s| s.collections.clone())
    }

    pub fn warning(&self) -> Option<String> {
        self.read(|s| s.warning.clone())
    }

    pub fn set_warning(&self, warning: Option<String>) {
        self.write(|s| s.warning = warning);
    }

    /// Replace items and collections, returning whether anything differs
    pub fn replace(
        &self,
        items: Vec<BibliographySourceWithCollections>,
        collections: Vec<BibliographyCollection>,
    ) -> bool {
        self.write(|s| {
            let changed = s.items != items || s.collections != collections;
            s.items = items;
            s.collections = collections;
            changed
        })
    }

    pub fn clear(&self) -> bool {
        self.replace(Vec::new(), Vec::new())
    }
}
