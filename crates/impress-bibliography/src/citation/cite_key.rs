//! Cite key generation (`familyYEARword`)

use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

use crate::domain::BibliographySource;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "on", "in", "of", "for", "to", "and", "with", "by", "from", "as", "at", "is",
    "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "might", "must", "shall", "can",
];

/// ASCII-fold and keep only alphanumerics
fn normalize_for_key(s: &str) -> String {
    s.nfkd()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn first_significant_word(title: &str) -> Option<String> {
    title
        .split_whitespace()
        .map(normalize_for_key)
        .find(|word| !word.is_empty() && !STOPWORDS.contains(&word.as_str()))
}

/// Suggest a cite key for a source: first author (or editor) family name,
/// four-digit year and first significant title word, lowercase ASCII
pub fn suggest_cite_key(source: &BibliographySource) -> String {
    let mut key = String::new();

    let name = source
        .author
        .first()
        .or_else(|| source.editor.first())
        .and_then(|name| name.sort_name().or(name.given.as_deref()));
    if let Some(name) = name {
        key.push_str(&normalize_for_key(name));
    }

    if let Some(year) = source.year() {
        if (1000..=9999).contains(&year) {
            key.push_str(&year.to_string());
        }
    }

    if let Some(word) = source.title.as_deref().and_then(first_significant_word) {
        key.push_str(&word);
    }

    if key.is_empty() {
        key.push_str("unknown");
    }
    key
}

/// Hands out keys that do not collide with any key seen so far
#[derive(Debug, Default, Clone)]
pub struct CiteKeyGenerator {
    used: HashSet<String>,
}

impl CiteKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a key as taken without generating it
    pub fn reserve(&mut self, key: &str) {
        self.used.insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.used.contains(key)
    }

    /// `base`, or `base` with the first free suffix `a`..`z`, then `2`, `3`, ...
    pub fn unique(&mut self, base: &str) -> String {
        let candidate = std::iter::once(base.to_string())
            .chain(('a'..='z').map(|suffix| format!("{}{}", base, suffix)))
            .chain((2..).map(|n| format!("{}{}", base, n)))
            .find(|candidate| !self.used.contains(candidate))
            .unwrap_or_else(|| base.to_string());
        self.used.insert(candidate.clone());
        candidate
    }
}
