//! Provider collections and parent-link sanitation

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A named grouping of sources within one provider (folder, tag, ...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BibliographyCollection {
    pub name: String,
    pub key: String,
    pub provider: String,
    #[serde(rename = "parentKey", default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
}

impl BibliographyCollection {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            provider: provider.into(),
            parent_key: None,
        }
    }

    /// Create a subcollection under a parent
    pub fn with_parent(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }
}

/// Make a provider's collection list a forest.
///
/// Parent keys that name no collection in the list are cleared, as is a
/// parent key that would close a cycle. Order of the input is preserved, so
/// the result is deterministic for a given provider response.
pub fn sanitize_forest(collections: Vec<BibliographyCollection>) -> Vec<BibliographyCollection> {
    let known: HashSet<String> = collections.iter().map(|c| c.key.clone()).collect();

    let mut parents: HashMap<String, Option<String>> = HashMap::new();
    let mut result = Vec::with_capacity(collections.len());

    for mut collection in collections {
        if let Some(parent) = &collection.parent_key {
            if !known.contains(parent) || parent == &collection.key {
                tracing::debug!(
                    "Clearing parent '{}' of collection '{}'",
                    parent,
                    collection.key
                );
                collection.parent_key = None;
            }
        }
        parents.insert(collection.key.clone(), collection.parent_key.clone());
        result.push(collection);
    }

    // Cut a parent link only when the chain returns to the collection itself
    for collection in result.iter_mut() {
        let mut seen = HashSet::new();
        let mut current = collection.parent_key.clone();
        while let Some(key) = current {
            if key == collection.key {
                tracing::debug!("Breaking collection cycle at '{}'", collection.key);
                collection.parent_key = None;
                parents.insert(collection.key.clone(), None);
                break;
            }
            if !seen.insert(key.clone()) {
                break;
            }
            current = parents.get(&key).cloned().flatten();
        }
    }

    result
}
