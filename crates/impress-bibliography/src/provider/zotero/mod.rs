//! Zotero library provider
//!
//! Reads the user library straight from the Zotero database and, when Better
//! BibTeX is installed, borrows its citation keys and its BibLaTeX export.

pub mod better_bibtex;
pub mod csl;
pub mod detect;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{string_list, BibliographyProvider, DocumentContext, ProviderCache};
use crate::citation::cite_key::{suggest_cite_key, CiteKeyGenerator};
use crate::config::ZoteroConfig;
use crate::domain::{
    BibliographyCollection, BibliographyFile, BibliographySource,
    BibliographySourceWithCollections,
};
use crate::error::ProviderError;
use better_bibtex::BetterBibtexClient;
use sqlite::LibrarySnapshot;

pub const ZOTERO_PROVIDER_KEY: &str = "zotero";

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Which part of the library a document wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionFilter {
    /// `zotero: false`
    Excluded,
    Library,
    /// Lowercased collection names
    Collections(Vec<String>),
}

impl CollectionFilter {
    /// From the first `zotero` metadata value; absent means the whole library
    pub fn from_context(context: &DocumentContext) -> Self {
        match context.metadata_values("zotero").next() {
            None | Some(Value::Null) | Some(Value::Bool(true)) => CollectionFilter::Library,
            Some(Value::Bool(false)) => CollectionFilter::Excluded,
            Some(value) => {
                let names: Vec<String> = string_list(value)
                    .into_iter()
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect();
                if names.is_empty() {
                    CollectionFilter::Library
                } else {
                    CollectionFilter::Collections(names)
                }
            }
        }
    }
}

/// Library read plus the ids assigned to its items (same order)
struct LoadedLibrary {
    snapshot: LibrarySnapshot,
    ids: Vec<String>,
    better_bibtex_keys: HashSet<String>,
}

#[derive(Default)]
struct LoadState {
    library: Option<LoadedLibrary>,
    filter: Option<CollectionFilter>,
}

enum DatabaseRead {
    Unchanged,
    Fresh(LibrarySnapshot),
}

pub struct ZoteroProvider {
    config: ZoteroConfig,
    home: Option<PathBuf>,
    enabled: AtomicBool,
    cache: ProviderCache,
    state: Mutex<LoadState>,
    better_bibtex: Option<BetterBibtexClient>,
}

impl ZoteroProvider {
    pub fn new(config: ZoteroConfig) -> Self {
        let better_bibtex = match BetterBibtexClient::new(config.rpc_url.clone(), RPC_TIMEOUT) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("Better BibTeX client unavailable: {}", e);
                None
            }
        };

        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            home: dirs::home_dir(),
            cache: ProviderCache::default(),
            state: Mutex::new(LoadState::default()),
            better_bibtex,
        }
    }

    /// Use a different home directory for data dir and profile detection
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.config.data_dir {
            return Some(dir.clone());
        }
        self.home.as_deref().and_then(detect::detect_data_dir)
    }

    fn better_bibtex_enabled(&self, data_dir: &Path) -> bool {
        self.config.better_bibtex.unwrap_or_else(|| {
            self.home
                .as_deref()
                .map(|home| detect::detect_better_bibtex(home, Some(data_dir)))
                .unwrap_or(false)
        })
    }

    /// A Better BibTeX client when enabled and answering
    async fn live_better_bibtex(&self, data_dir: &Path) -> Option<&BetterBibtexClient> {
        if !self.better_bibtex_enabled(data_dir) {
            return None;
        }
        let client = self.better_bibtex.as_ref()?;
        client.is_available().await.then_some(client)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Assign ids: Better BibTeX keys first, generated keys for the rest
    async fn assign_ids(
        &self,
        snapshot: &LibrarySnapshot,
        data_dir: &Path,
    ) -> (Vec<String>, HashSet<String>) {
        let mut citekeys = HashMap::new();
        if let Some(client) = self.live_better_bibtex(data_dir).await {
            let item_keys: Vec<String> = snapshot.items.iter().map(|i| i.key.clone()).collect();
            match client.citation_keys(&item_keys).await {
                Ok(keys) => citekeys = keys,
                Err(e) => tracing::warn!("Better BibTeX citation keys unavailable: {}", e),
            }
        }

        let mut generator = CiteKeyGenerator::new();
        for key in citekeys.values() {
            generator.reserve(key);
        }

        let ids = snapshot
            .items
            .iter()
            .map(|item| match citekeys.get(&item.key) {
                Some(key) => key.clone(),
                None => {
                    let source = csl::item_to_source(item, "", ZOTERO_PROVIDER_KEY);
                    generator.unique(&suggest_cite_key(&source))
                }
            })
            .collect();

        (ids, citekeys.into_values().collect())
    }

    /// Items visible under `filter`, with their ids
    fn select_items(
        library: &LoadedLibrary,
        filter: &CollectionFilter,
    ) -> Vec<BibliographySourceWithCollections> {
        let selected: Option<HashSet<&str>> = match filter {
            CollectionFilter::Excluded => return Vec::new(),
            CollectionFilter::Library => None,
            CollectionFilter::Collections(names) => Some(
                library
                    .snapshot
                    .collections
                    .iter()
                    .filter(|c| names.contains(&c.name.to_lowercase()))
                    .map(|c| c.key.as_str())
                    .collect(),
            ),
        };

        library
            .snapshot
            .items
            .iter()
            .zip(&library.ids)
            .filter(|(item, _)| match &selected {
                None => true,
                Some(keys) => item.collection_keys.iter().any(|k| keys.contains(k.as_str())),
            })
            .map(|(item, id)| {
                BibliographySourceWithCollections::with_collections(
                    csl::item_to_source(item, id, ZOTERO_PROVIDER_KEY),
                    item.collection_keys.clone(),
                )
            })
            .collect()
    }

    fn publish(&self, filter: CollectionFilter) -> bool {
        let mut state = self.lock_state();
        let (items, collections) = match &state.library {
            Some(library) if filter != CollectionFilter::Excluded => (
                Self::select_items(library, &filter),
                library.snapshot.collections.clone(),
            ),
            _ => (Vec::new(), Vec::new()),
        };
        state.filter = Some(filter);
        drop(state);
        self.cache.replace(items, collections)
    }
}

#[async_trait]
impl BibliographyProvider for ZoteroProvider {
    fn key(&self) -> &str {
        ZOTERO_PROVIDER_KEY
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn load(&self, context: &DocumentContext) -> Result<bool, ProviderError> {
        let filter = CollectionFilter::from_context(context);
        if filter == CollectionFilter::Excluded {
            self.cache.set_warning(None);
            return Ok(self.publish(filter));
        }

        let Some(data_dir) = self.data_dir() else {
            self.cache
                .set_warning(Some("Unable to locate Zotero data directory".to_string()));
            self.lock_state().library = None;
            return Ok(self.publish(filter));
        };

        let cached_version = self.lock_state().library.as_ref().map(|l| l.snapshot.version);
        let scratch_dir = self.config.scratch_dir();
        let read_dir = data_dir.clone();
        let read = tokio::task::spawn_blocking(move || -> Result<DatabaseRead, ProviderError> {
            let conn = sqlite::connect(&read_dir, &scratch_dir)?;
            let version = sqlite::library_version(&conn)?;
            if cached_version == Some(version) {
                return Ok(DatabaseRead::Unchanged);
            }
            Ok(DatabaseRead::Fresh(sqlite::read_library(&conn, ZOTERO_PROVIDER_KEY)?))
        })
        .await?;

        let snapshot = match read {
            Ok(DatabaseRead::Unchanged) => {
                self.cache.set_warning(None);
                let same_filter = self.lock_state().filter.as_ref() == Some(&filter);
                if same_filter {
                    tracing::debug!("Zotero library unchanged");
                    return Ok(false);
                }
                return Ok(self.publish(filter));
            }
            Ok(DatabaseRead::Fresh(snapshot)) => snapshot,
            Err(e) => {
                tracing::warn!("Unable to read Zotero library at {:?}: {}", data_dir, e);
                self.cache.set_warning(Some(format!(
                    "Unable to read Zotero library ({})",
                    e
                )));
                return Ok(false);
            }
        };

        tracing::info!(
            "Read Zotero library version {} ({} items, {} collections)",
            snapshot.version,
            snapshot.items.len(),
            snapshot.collections.len()
        );

        let (ids, better_bibtex_keys) = self.assign_ids(&snapshot, &data_dir).await;
        self.lock_state().library = Some(LoadedLibrary {
            snapshot,
            ids,
            better_bibtex_keys,
        });
        self.cache.set_warning(None);
        Ok(self.publish(filter))
    }

    fn collections(&self) -> Vec<BibliographyCollection> {
        self.cache.collections()
    }

    fn items(&self) -> Vec<BibliographySourceWithCollections> {
        self.cache.items()
    }

    fn bibliography_paths(&self, _context: &DocumentContext) -> Vec<BibliographyFile> {
        Vec::new()
    }

    async fn generate_citation(
        &self,
        _context: &DocumentContext,
        id: &str,
        _source: &BibliographySource,
    ) -> Result<Option<String>, ProviderError> {
        let is_better_bibtex_key = self
            .lock_state()
            .library
            .as_ref()
            .map(|l| l.better_bibtex_keys.contains(id))
            .unwrap_or(false);
        if !is_better_bibtex_key {
            return Ok(None);
        }

        let Some(data_dir) = self.data_dir() else {
            return Ok(None);
        };
        match self.live_better_bibtex(&data_dir).await {
            Some(client) => Ok(client.export(id).await?),
            None => Ok(None),
        }
    }

    fn warning_message(&self) -> Option<String> {
        self.cache.warning()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider_for(data_dir: &Path, scratch: &Path) -> ZoteroProvider {
        ZoteroProvider::new(ZoteroConfig {
            data_dir: Some(data_dir.to_path_buf()),
            better_bibtex: Some(false),
            scratch_dir: Some(scratch.to_path_buf()),
            ..ZoteroConfig::default()
        })
    }

    fn library_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open(dir.path().join(sqlite::DATABASE_FILE)).unwrap();
        sqlite::test_support::populate(&conn).unwrap();
        dir
    }

    #[test]
    fn test_collection_filter_from_metadata() {
        let ctx = |v: Value| DocumentContext::new(None, "/").with_metadata(json!({ "zotero": v }));
        assert_eq!(
            CollectionFilter::from_context(&DocumentContext::default()),
            CollectionFilter::Library
        );
        assert_eq!(
            CollectionFilter::from_context(&ctx(json!(false))),
            CollectionFilter::Excluded
        );
        assert_eq!(
            CollectionFilter::from_context(&ctx(json!(true))),
            CollectionFilter::Library
        );
        assert_eq!(
            CollectionFilter::from_context(&ctx(json!(["Papers", " BOOKS "]))),
            CollectionFilter::Collections(vec!["papers".into(), "books".into()])
        );
        assert_eq!(
            CollectionFilter::from_context(&ctx(json!("Cats"))),
            CollectionFilter::Collections(vec!["cats".into()])
        );
    }

    #[tokio::test]
    async fn test_load_library_with_generated_keys() {
        let data = library_dir();
        let scratch = tempfile::tempdir().unwrap();
        let provider = provider_for(data.path(), scratch.path());
        let context = DocumentContext::default();

        assert!(provider.load(&context).await.unwrap());
        let items = provider.items();
        let ids: Vec<&str> = items.iter().map(|i| i.id()).collect();
        assert_eq!(
            ids,
            vec!["lovelace2019deep", "knuth1968art", "worldhealthorganization2021cats"]
        );
        assert!(items.iter().all(|i| i.provider_key() == ZOTERO_PROVIDER_KEY));
        assert_eq!(provider.collections().len(), 3);
        assert_eq!(provider.items_for_collection("COLCATS0").len(), 2);
        assert!(provider.warning_message().is_none());

        // same version, same filter
        assert!(!provider.load(&context).await.unwrap());
    }

    #[tokio::test]
    async fn test_collection_filter_changes_items() {
        let data = library_dir();
        let scratch = tempfile::tempdir().unwrap();
        let provider = provider_for(data.path(), scratch.path());

        assert!(provider.load(&DocumentContext::default()).await.unwrap());
        assert_eq!(provider.items().len(), 3);

        let books = DocumentContext::default().with_metadata(json!({"zotero": "books"}));
        assert!(provider.load(&books).await.unwrap());
        let items = provider.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("The Art of Computer Programming"));

        let excluded = DocumentContext::default().with_metadata(json!({"zotero": false}));
        assert!(provider.load(&excluded).await.unwrap());
        assert!(provider.items().is_empty());
    }

    #[tokio::test]
    async fn test_missing_library_sets_warning() {
        let data = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let provider = provider_for(data.path(), scratch.path());

        assert!(!provider.load(&DocumentContext::default()).await.unwrap());
        assert!(provider.items().is_empty());
        assert!(provider
            .warning_message()
            .unwrap()
            .starts_with("Unable to read Zotero library"));
    }

    #[tokio::test]
    async fn test_declines_citation_without_better_bibtex() {
        let data = library_dir();
        let scratch = tempfile::tempdir().unwrap();
        let provider = provider_for(data.path(), scratch.path());
        provider.load(&DocumentContext::default()).await.unwrap();

        let item = provider.items().remove(0);
        let citation = provider
            .generate_citation(&DocumentContext::default(), item.id(), &item.source)
            .await
            .unwrap();
        assert!(citation.is_none());
    }
}
