//! Search ranking and result bounds over large merged sets

mod common;

use std::sync::Arc;

use lazy_static::lazy_static;
use proptest::prelude::*;

use common::{authored, ScriptedProvider};
use impress_bibliography::{
    BibliographyConfig, BibliographyManager, BibliographyProvider, BibliographySource,
    BibliographySourceWithCollections, CslName, DocumentContext, SearchConfig, SearchIndex,
};

const FAMILIES: &[&str] = &[
    "Abbott", "Baker", "Chandra", "Dijkstra", "Erdős", "Fischer", "Gauss", "Hamilton", "Ibarra",
    "Jansen", "Knuth", "Lamport", "Müller", "Noether", "Ostrom", "Pascal", "Quine", "Ramanujan",
    "Sato", "Turing",
];

const WORDS: &[&str] = &[
    "analysis", "graphs", "quantum", "markets", "proteins", "algebra", "networks", "galaxies",
    "learning", "climate", "languages", "compilers", "storage", "entropy", "ecology", "topology",
];

fn synthetic_records(count: usize) -> Vec<BibliographySourceWithCollections> {
    (0..count)
        .map(|i| {
            let family = FAMILIES[i % FAMILIES.len()];
            let first = WORDS[i % WORDS.len()];
            let second = WORDS[(i / WORDS.len()) % WORDS.len()];
            let year = 1950 + (i % 70) as i32;
            authored(
                &format!("{}{}-{}", family.to_lowercase(), year, i),
                &format!("On {} and {}", first, second),
                family,
                year,
            )
        })
        .collect()
}

lazy_static! {
    static ref LARGE_INDEX: SearchIndex =
        SearchIndex::build(synthetic_records(10_000), &SearchConfig::default());
}

async fn loaded_manager(records: Vec<BibliographySourceWithCollections>) -> BibliographyManager {
    let provider = ScriptedProvider::new("local");
    provider.set_items(records);
    let providers = vec![provider as Arc<dyn BibliographyProvider>];
    let manager = BibliographyManager::new(providers, BibliographyConfig::default());
    manager.load(&DocumentContext::new(None, "/tmp")).await;
    manager
}

#[tokio::test]
async fn test_single_letter_query_is_bounded() {
    let manager = loaded_manager(synthetic_records(10_000)).await;
    assert_eq!(manager.all_sources().len(), 10_000);

    let results = manager.search_with_limit(Some("a"), None, None, 5);
    assert!(!results.is_empty());
    assert!(results.len() <= 5);

    let hits = LARGE_INDEX.query("a", 5);
    let ranked: Vec<&str> = hits.iter().map(|h| h.record.id()).collect();
    let returned: Vec<&str> = results.iter().map(|r| r.id()).collect();
    assert_eq!(ranked, returned);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_default_limit_caps_results() {
    let manager = loaded_manager(synthetic_records(3_000)).await;
    let results = manager.search(Some("on"), None, None);
    assert_eq!(results.len(), 1000);
}

#[tokio::test]
async fn test_long_queries_are_capped_not_rejected() {
    let manager = loaded_manager(synthetic_records(200)).await;
    let query = "knuth ".repeat(40);
    let results = manager.search(Some(&query), None, None);
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.author[0].family.as_deref() == Some("Knuth")));
}

#[test]
fn test_author_match_ranks_first() {
    let mut records = synthetic_records(500);
    let mut target = authored("zz-target", "Notes", "Knuth", 1968);
    target.source.author.push(CslName::literal("Stanford Computing Group"));
    records.push(target);
    let index = SearchIndex::build(records, &SearchConfig::default());

    let hits = index.query("stanford", 3);
    assert_eq!(hits[0].record.id(), "zz-target");

    let hits = index.query("knuth 1968", 10);
    assert!(hits.iter().any(|h| h.record.id() == "zz-target"));
    assert!(hits
        .iter()
        .all(|h| h.record.author[0].family.as_deref() == Some("Knuth")));
}

#[test]
fn test_build_is_deterministic() {
    let a = SearchIndex::build(synthetic_records(300), &SearchConfig::default());
    let b = SearchIndex::build(synthetic_records(300), &SearchConfig::default());
    let ids = |index: &SearchIndex| -> Vec<String> {
        index
            .query("graphs turing", 50)
            .iter()
            .map(|h| h.record.id().to_string())
            .collect()
    };
    assert_eq!(ids(&a), ids(&b));
    assert!(!ids(&a).is_empty());
}

#[test]
fn test_missing_fields_contribute_nothing() {
    let bare = BibliographySourceWithCollections::new(BibliographySource::new("bare", "local"));
    let index = SearchIndex::build(vec![bare], &SearchConfig::default());
    assert_eq!(index.query("bare", 10).len(), 1);
    assert!(index.query("knuth", 10).is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_results_bounded_and_sorted(query in "[a-z]{1,6}( [a-z]{1,4})?", limit in 0usize..25) {
        let hits = LARGE_INDEX.query(&query, limit);
        prop_assert!(hits.len() <= limit);
        prop_assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        prop_assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0 + 1e-9));
    }
}
