//! Weighted fuzzy index over merged bibliography records
//!
//! The index owns its records. It is built once per generation and never
//! updated in place: a new generation builds a new index.

use crate::config::{FieldWeights, SearchConfig};
use crate::domain::{BibliographySourceWithCollections, CslName};

use super::fuzzy::{normalize, FieldText};

/// Indexed fields, in weight-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Id,
    AuthorFamily,
    AuthorLiteral,
    Title,
    AuthorGiven,
    Issued,
    Provider,
}

impl SearchField {
    pub const ALL: [SearchField; 7] = [
        SearchField::Id,
        SearchField::AuthorFamily,
        SearchField::AuthorLiteral,
        SearchField::Title,
        SearchField::AuthorGiven,
        SearchField::Issued,
        SearchField::Provider,
    ];

    pub fn weight(self, weights: &FieldWeights) -> f64 {
        match self {
            SearchField::Id => weights.id,
            SearchField::AuthorFamily => weights.author_family,
            SearchField::AuthorLiteral => weights.author_literal,
            SearchField::Title => weights.title,
            SearchField::AuthorGiven => weights.author_given,
            SearchField::Issued => weights.issued,
            SearchField::Provider => weights.provider,
        }
    }

    /// Raw text of this field; absent values yield an empty string
    fn extract(self, record: &BibliographySourceWithCollections) -> String {
        let names = |part: fn(&CslName) -> Option<&str>| {
            record
                .author
                .iter()
                .filter_map(part)
                .collect::<Vec<_>>()
                .join(" ")
        };
        match self {
            SearchField::Id => record.id.clone(),
            SearchField::AuthorFamily => names(|n| n.family.as_deref()),
            SearchField::AuthorLiteral => names(|n| n.literal.as_deref()),
            SearchField::Title => record.title.clone().unwrap_or_default(),
            SearchField::AuthorGiven => names(|n| n.given.as_deref()),
            SearchField::Issued => record
                .issued
                .as_ref()
                .and_then(|date| date.to_iso())
                .unwrap_or_default(),
            SearchField::Provider => record.provider_key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedRecord {
    fields: Vec<FieldText>,
}

/// One ranked hit
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    pub record: &'a BibliographySourceWithCollections,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SearchIndex {
    records: Vec<BibliographySourceWithCollections>,
    indexed: Vec<IndexedRecord>,
    weights: FieldWeights,
    threshold: f64,
}

impl SearchIndex {
    /// Index records in the given order (the order breaks score ties)
    pub fn build(records: Vec<BibliographySourceWithCollections>, config: &SearchConfig) -> Self {
        let indexed = records
            .iter()
            .map(|record| IndexedRecord {
                fields: SearchField::ALL
                    .iter()
                    .map(|field| FieldText::new(&field.extract(record)))
                    .collect(),
            })
            .collect();

        Self {
            records,
            indexed,
            weights: config.weights.clone(),
            threshold: config.threshold,
        }
    }

    pub fn empty(config: &SearchConfig) -> Self {
        Self::build(Vec::new(), config)
    }

    pub fn records(&self) -> &[BibliographySourceWithCollections] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Best records for `text`, highest score first, at most `limit`
    pub fn query(&self, text: &str, limit: usize) -> Vec<SearchHit<'_>> {
        self.query_filtered(text, limit, |_| true)
    }

    /// Like [`query`](Self::query), restricted to records accepted by
    /// `filter` before truncation
    pub fn query_filtered<F>(&self, text: &str, limit: usize, filter: F) -> Vec<SearchHit<'_>>
    where
        F: Fn(&BibliographySourceWithCollections) -> bool,
    {
        let terms: Vec<(String, Vec<char>)> = normalize(text)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(|t| (t.to_string(), t.chars().collect()))
            .collect();
        let total_weight = self.weights.total();

        if terms.is_empty() || limit == 0 || self.records.is_empty() || total_weight <= 0.0 {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit<'_>> = self
            .records
            .iter()
            .zip(&self.indexed)
            .filter(|(record, _)| filter(record))
            .filter_map(|(record, indexed)| {
                self.score(indexed, &terms, total_weight)
                    .map(|score| SearchHit { record, score })
            })
            .collect();

        // stable: equal scores keep merge order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    /// Average over terms of the weighted field score; `None` unless every
    /// term matches some weighted field
    fn score(
        &self,
        indexed: &IndexedRecord,
        terms: &[(String, Vec<char>)],
        total_weight: f64,
    ) -> Option<f64> {
        let mut sum = 0.0;
        for (term, term_chars) in terms {
            let mut term_score = 0.0;
            let mut matched = false;
            for (field, text) in SearchField::ALL.iter().zip(&indexed.fields) {
                let weight = field.weight(&self.weights);
                if weight <= 0.0 {
                    continue;
                }
                let similarity = text.similarity(term, term_chars);
                if similarity >= self.threshold {
                    matched = true;
                    term_score += weight * similarity;
                }
            }
            if !matched {
                return None;
            }
            sum += term_score / total_weight;
        }
        Some(sum / terms.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BibliographySource;

    fn record(id: &str, title: &str, family: &str) -> BibliographySourceWithCollections {
        BibliographySourceWithCollections::new(
            BibliographySource::new(id, "local")
                .with_title(title)
                .with_author(CslName::personal(family, Some("Alex".into())))
                .with_issued(vec![2020]),
        )
    }

    fn index() -> SearchIndex {
        SearchIndex::build(
            vec![
                record("smith2020", "Graph Neural Networks", "Smith"),
                record("jones2019", "Smith Normal Form", "Jones"),
                record("nguyen2020", "Protein Folding", "Nguyễn"),
            ],
            &SearchConfig::default(),
        )
    }

    #[test]
    fn test_author_outranks_title() {
        let index = index();
        let hits = index.query("smith", 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.record.id()).collect();
        assert_eq!(ids, vec!["smith2020", "jones2019"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_typo_and_accent_tolerance() {
        let index = index();
        assert_eq!(index.query("nguyen", 10)[0].record.id(), "nguyen2020");
        assert_eq!(index.query("protien", 10)[0].record.id(), "nguyen2020");
    }

    #[test]
    fn test_all_terms_must_match() {
        let index = index();
        let hits = index.query("smith graph", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id(), "smith2020");
        assert!(index.query("smith zzzzzz", 10).is_empty());
    }

    #[test]
    fn test_provider_field_never_matches_alone() {
        let index = index();
        assert!(index.query("local", 10).is_empty());
    }

    #[test]
    fn test_empty_cases() {
        let empty = SearchIndex::empty(&SearchConfig::default());
        assert!(empty.query("anything", 10).is_empty());
        assert!(index().query("   ", 10).is_empty());
        assert!(index().query("smith", 0).is_empty());
    }

    #[test]
    fn test_filter_applies_before_limit() {
        let index = index();
        let hits = index.query_filtered("smith", 1, |r| r.id() == "jones2019");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id(), "jones2019");
    }
}
