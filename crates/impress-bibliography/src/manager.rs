//! Bibliography manager
//!
//! Loads every enabled provider concurrently, merges their records in
//! registration order and publishes the result, together with its search
//! index, as one immutable generation. Queries read whichever generation is
//! current when they start; a load that detects no change leaves it in place.
//!
//! Records of providers other than the local one are only visible while the
//! document's bibliography is writable.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::citation;
use crate::config::BibliographyConfig;
use crate::domain::{
    sanitize_forest, BibliographyCollection, BibliographyFile, BibliographySource,
    BibliographySourceWithCollections,
};
use crate::error::ProviderError;
use crate::provider::local::LOCAL_PROVIDER_KEY;
use crate::provider::{BibliographyProvider, DocumentContext};
use crate::search::SearchIndex;
use crate::writability;

/// What one [`BibliographyManager::load`] cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    /// Current generation after the cycle (`None` only if nothing was ever built)
    pub generation_id: Option<u64>,
    /// Whether a new generation was published
    pub rebuilt: bool,
    /// Providers that reported changed data
    pub changed: Vec<String>,
    /// Providers whose load returned an error or panicked
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
    pub writable: bool,
}

/// One published snapshot: merged records (owned by the index) and the
/// sanitized collections they reference
#[derive(Debug)]
struct Generation {
    id: u64,
    index: SearchIndex,
    collections: Vec<BibliographyCollection>,
}

/// What queries read; replaced as a whole so the visibility gate always
/// matches the records it applies to
#[derive(Clone)]
struct Published {
    generation: Option<Arc<Generation>>,
    writable: bool,
}

enum LoadOutcome {
    Loaded(bool),
    Failed(ProviderError),
    TimedOut,
    Panicked(String),
}

pub struct BibliographyManager {
    providers: Vec<Arc<dyn BibliographyProvider>>,
    config: BibliographyConfig,
    /// Serializes `load` calls
    load_lock: tokio::sync::Mutex<()>,
    published: RwLock<Published>,
    /// Keys of the providers enabled at the last load
    enabled_keys: Mutex<Option<Vec<String>>>,
    /// Remembered load failures, cleared by the provider's next good load
    load_failures: Mutex<HashMap<String, String>>,
}

impl BibliographyManager {
    /// Providers are consulted and merged in the order given
    pub fn new(providers: Vec<Arc<dyn BibliographyProvider>>, config: BibliographyConfig) -> Self {
        Self {
            providers,
            config,
            load_lock: tokio::sync::Mutex::new(()),
            published: RwLock::new(Published {
                generation: None,
                writable: true,
            }),
            enabled_keys: Mutex::new(None),
            load_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &[Arc<dyn BibliographyProvider>] {
        &self.providers
    }

    pub fn config(&self) -> &BibliographyConfig {
        &self.config
    }

    fn snapshot(&self) -> Published {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn current(&self) -> Option<Arc<Generation>> {
        self.snapshot().generation
    }

    pub fn generation_id(&self) -> Option<u64> {
        self.current().map(|generation| generation.id)
    }

    /// Writability as of the last load; true before the first one
    pub fn is_writable(&self) -> bool {
        self.snapshot().writable
    }

    fn is_visible(writable: bool, provider_key: &str) -> bool {
        writable || provider_key == LOCAL_PROVIDER_KEY
    }

    /// Refresh every enabled provider and publish a new generation if any
    /// of them changed.
    ///
    /// Concurrent calls queue. A provider that fails, panics or times out
    /// keeps its previous contribution and gets a warning.
    pub async fn load(&self, context: &DocumentContext) -> LoadSummary {
        let _guard = self.load_lock.lock().await;

        let enabled: Vec<Arc<dyn BibliographyProvider>> = self
            .providers
            .iter()
            .filter(|provider| provider.is_enabled())
            .cloned()
            .collect();

        let outcomes = self.load_providers(&enabled, context).await;

        let mut summary = LoadSummary::default();
        for (provider, outcome) in enabled.iter().zip(outcomes) {
            let key = provider.key().to_string();
            match outcome {
                LoadOutcome::Loaded(changed) => {
                    self.clear_failure(&key);
                    if changed {
                        summary.changed.push(key);
                    }
                }
                LoadOutcome::Failed(e) => {
                    tracing::warn!("Bibliography provider '{}' failed to load: {}", key, e);
                    self.record_failure(&key, format!("Unable to load {} bibliography ({})", key, e));
                    summary.failed.push(key);
                }
                LoadOutcome::Panicked(message) => {
                    tracing::error!("Bibliography provider '{}' panicked: {}", key, message);
                    self.record_failure(&key, format!("Unable to load {} bibliography", key));
                    summary.failed.push(key);
                }
                LoadOutcome::TimedOut => {
                    tracing::warn!("Bibliography provider '{}' timed out", key);
                    self.record_failure(&key, format!("Loading {} bibliography timed out", key));
                    summary.timed_out.push(key);
                }
            }
        }

        let writable = writability::should_allow_writes(&self.providers, context);
        summary.writable = writable;

        let keys: Vec<String> = enabled.iter().map(|p| p.key().to_string()).collect();
        let enabled_changed = {
            let mut previous = self.enabled_keys.lock().unwrap_or_else(|e| e.into_inner());
            let changed = previous.as_ref() != Some(&keys);
            *previous = Some(keys);
            changed
        };

        let previous = self.current();
        let generation = if enabled_changed || !summary.changed.is_empty() || previous.is_none() {
            let (records, collections) = merge(&enabled);
            let index = SearchIndex::build(records, &self.config.search);
            let id = previous.as_ref().map_or(1, |generation| generation.id + 1);

            tracing::info!(
                "Published bibliography generation {} ({} records, {} collections)",
                id,
                index.len(),
                collections.len()
            );

            summary.rebuilt = true;
            Some(Arc::new(Generation {
                id,
                index,
                collections,
            }))
        } else {
            tracing::debug!("Bibliography unchanged, keeping current generation");
            previous
        };

        summary.generation_id = generation.as_ref().map(|generation| generation.id);
        *self.published.write().unwrap_or_else(|e| e.into_inner()) = Published {
            generation,
            writable,
        };
        summary
    }

    /// One task per provider, awaited in registration order
    async fn load_providers(
        &self,
        providers: &[Arc<dyn BibliographyProvider>],
        context: &DocumentContext,
    ) -> Vec<LoadOutcome> {
        let context = Arc::new(context.clone());
        let timeout = self.config.load_timeout();

        let handles: Vec<_> = providers
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, provider.load(&context))
                            .await
                            .ok(),
                        None => Some(provider.load(&context).await),
                    }
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(match handle.await {
                Ok(Some(Ok(changed))) => LoadOutcome::Loaded(changed),
                Ok(Some(Err(e))) => LoadOutcome::Failed(e),
                Ok(None) => LoadOutcome::TimedOut,
                Err(e) => LoadOutcome::Panicked(e.to_string()),
            });
        }
        outcomes
    }

    fn record_failure(&self, key: &str, message: String) {
        self.load_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), message);
    }

    fn clear_failure(&self, key: &str) {
        self.load_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Every record of the current generation, or only the local provider's
    /// records when the bibliography is not writable
    pub fn all_sources(&self) -> Vec<BibliographySourceWithCollections> {
        let Published {
            generation,
            writable,
        } = self.snapshot();
        let Some(generation) = generation else {
            return Vec::new();
        };
        generation
            .index
            .records()
            .iter()
            .filter(|record| Self::is_visible(writable, record.provider_key()))
            .cloned()
            .collect()
    }

    /// Scoped search with the configured result limit.
    ///
    /// With query text the fuzzy index answers, best match first; without,
    /// the visible records are filtered in merge order. `provider_key` and
    /// `collection_key` narrow either way.
    pub fn search(
        &self,
        query: Option<&str>,
        provider_key: Option<&str>,
        collection_key: Option<&str>,
    ) -> Vec<BibliographySourceWithCollections> {
        self.search_with_limit(query, provider_key, collection_key, self.config.search.limit)
    }

    /// `limit` bounds fuzzy results; plain filtering returns the whole scope
    pub fn search_with_limit(
        &self,
        query: Option<&str>,
        provider_key: Option<&str>,
        collection_key: Option<&str>,
        limit: usize,
    ) -> Vec<BibliographySourceWithCollections> {
        let Published {
            generation,
            writable,
        } = self.snapshot();
        let Some(generation) = generation else {
            return Vec::new();
        };
        let in_scope = |record: &BibliographySourceWithCollections| {
            Self::is_visible(writable, record.provider_key())
                && provider_key.map_or(true, |key| record.provider_key() == key)
                && collection_key.map_or(true, |key| record.in_collection(key))
        };

        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(text) => {
                let max = self.config.search.max_query_length;
                let capped: String = text.chars().take(max).collect();
                if capped.len() < text.len() {
                    tracing::debug!("Capping search query to {} characters", max);
                }
                generation
                    .index
                    .query_filtered(&capped, limit, in_scope)
                    .into_iter()
                    .map(|hit| hit.record.clone())
                    .collect()
            }
            None => generation
                .index
                .records()
                .iter()
                .filter(|record| in_scope(record))
                .cloned()
                .collect(),
        }
    }

    /// Look `value` up among the local provider's records of the current
    /// generation. Remote providers are never searched, and nothing is found
    /// before the first load.
    pub fn find_by_identifier_in_local_sources(
        &self,
        value: &str,
    ) -> Option<BibliographySourceWithCollections> {
        let generation = self.current()?;
        generation
            .index
            .records()
            .iter()
            .find(|record| record.provider_key() == LOCAL_PROVIDER_KEY && record.id() == value)
            .cloned()
    }

    /// Collections of the current generation, subject to the same visibility
    /// gate as records
    pub fn collections(&self, provider_key: Option<&str>) -> Vec<BibliographyCollection> {
        let Published {
            generation,
            writable,
        } = self.snapshot();
        let Some(generation) = generation else {
            return Vec::new();
        };
        generation
            .collections
            .iter()
            .filter(|c| Self::is_visible(writable, &c.provider))
            .filter(|c| provider_key.map_or(true, |key| c.provider == key))
            .cloned()
            .collect()
    }

    pub fn bibliography_files(&self, context: &DocumentContext) -> Vec<BibliographyFile> {
        writability::bibliography_files(&self.providers, context)
    }

    /// A citation record for `source`.
    ///
    /// The named provider (or the source's own provider) is asked first; if
    /// it declines or fails, the generic BibLaTeX formatter is used.
    pub async fn generate_citation(
        &self,
        context: &DocumentContext,
        id: &str,
        source: &BibliographySource,
        provider_key: Option<&str>,
    ) -> String {
        let key = provider_key.unwrap_or(&source.provider_key);
        let provider = self
            .providers
            .iter()
            .find(|provider| provider.key() == key && provider.is_enabled());

        if let Some(provider) = provider {
            let request = provider.generate_citation(context, id, source);
            let result = match self.config.load_timeout() {
                Some(limit) => match tokio::time::timeout(limit, request).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Task(format!(
                        "citation request timed out after {:?}",
                        limit
                    ))),
                },
                None => request.await,
            };

            match result {
                Ok(Some(citation)) if !citation.trim().is_empty() => return citation,
                Ok(_) => tracing::debug!("Provider '{}' has no citation for '{}'", key, id),
                Err(e) => tracing::warn!(
                    "Citation for '{}' from provider '{}' failed, using generic formatter: {}",
                    id,
                    key,
                    e
                ),
            }
        }

        citation::to_biblatex(id, source)
    }

    /// First warning in provider registration order
    pub fn warning(&self) -> Option<String> {
        self.providers
            .iter()
            .filter(|provider| provider.is_enabled())
            .find_map(|provider| self.warning_for_provider(provider.key()))
    }

    /// A remembered load failure, else the provider's own warning
    pub fn warning_for_provider(&self, key: &str) -> Option<String> {
        let failure = self
            .load_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        failure.or_else(|| {
            self.providers
                .iter()
                .find(|provider| provider.key() == key)
                .and_then(|provider| provider.warning_message())
        })
    }
}

/// Concatenate provider records in order, dropping ids a provider repeats and
/// collection keys it never reported
fn merge(
    providers: &[Arc<dyn BibliographyProvider>],
) -> (Vec<BibliographySourceWithCollections>, Vec<BibliographyCollection>) {
    let mut records = Vec::new();
    let mut collections = Vec::new();

    for provider in providers {
        let key = provider.key();

        let provided: Vec<BibliographyCollection> = provider
            .collections()
            .into_iter()
            .map(|mut collection| {
                collection.provider = key.to_string();
                collection
            })
            .collect();
        let provided = sanitize_forest(provided);
        let known: HashSet<&str> = provided.iter().map(|c| c.key.as_str()).collect();

        let mut seen = HashSet::new();
        for mut record in provider.items() {
            if !seen.insert(record.id().to_string()) {
                tracing::debug!("Skipping duplicate id '{}' from provider '{}'", record.id(), key);
                continue;
            }
            record.source.provider_key = key.to_string();
            record
                .collection_keys
                .retain(|collection| known.contains(collection.as_str()));
            records.push(record);
        }

        collections.extend(provided);
    }

    (records, collections)
}
