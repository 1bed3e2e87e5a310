//! Manager behavior over scripted providers

mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use common::{
    authored, read_only_file, record, source, writable_file, LoadBehavior, ScriptedProvider,
};
use impress_bibliography::{
    BibliographyCollection, BibliographyConfig, BibliographyFile, BibliographyManager,
    BibliographyProvider, BibliographySourceWithCollections, DocumentContext,
};

fn manager_with(providers: &[Arc<ScriptedProvider>]) -> BibliographyManager {
    manager_with_config(providers, BibliographyConfig::default())
}

fn manager_with_config(
    providers: &[Arc<ScriptedProvider>],
    config: BibliographyConfig,
) -> BibliographyManager {
    let providers: Vec<Arc<dyn BibliographyProvider>> = providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn BibliographyProvider>)
        .collect();
    BibliographyManager::new(providers, config)
}

fn ids(records: &[BibliographySourceWithCollections]) -> Vec<String> {
    records.iter().map(|r| r.id().to_string()).collect()
}

fn context() -> DocumentContext {
    DocumentContext::new(None, "/tmp")
}

/// Local (writable) with A1 "Foo", remote with B1 "Bar"
fn local_and_remote() -> (Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
    let local = ScriptedProvider::new("local");
    local.set_items(vec![record("A1", "Foo", &[])]);
    local.set_files(vec![writable_file("refs.bib")]);

    let remote = ScriptedProvider::new("zotero");
    remote.set_items(vec![record("B1", "Bar", &[])]);
    (local, remote)
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local.clone(), remote.clone()]);

    let summary = manager.load(&context()).await;
    assert_eq!(summary.changed, vec!["local".to_string(), "zotero".to_string()]);
    assert!(summary.rebuilt);
    assert!(summary.writable);
    assert_eq!(ids(&manager.all_sources()), vec!["A1", "B1"]);
    assert_eq!(ids(&manager.search(Some("Foo"), None, None)), vec!["A1"]);

    local.set_files(vec![read_only_file("refs.bib")]);
    let summary = manager.load(&context()).await;
    assert!(!summary.writable);
    assert!(!manager.is_writable());

    let visible = manager.all_sources();
    assert_eq!(ids(&visible), vec!["A1"]);
    assert!(visible.iter().all(|r| r.provider_key() == "local"));
}

#[tokio::test]
async fn test_reload_without_changes_keeps_generation() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local.clone(), remote.clone()]);

    let first = manager.load(&context()).await;
    let before = manager.all_sources();
    let second = manager.load(&context()).await;

    assert_eq!(first.generation_id, Some(1));
    assert!(!second.rebuilt);
    assert!(second.changed.is_empty());
    assert_eq!(second.generation_id, Some(1));
    assert_eq!(manager.all_sources(), before);
    assert_eq!(local.load_count(), 2);
    assert_eq!(remote.load_count(), 2);
}

#[tokio::test]
async fn test_changed_load_replaces_whole_generation() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local.clone(), remote.clone()]);
    manager.load(&context()).await;

    local.set_items(vec![record("A2", "Foo two", &[]), record("A3", "Foo three", &[])]);
    let summary = manager.load(&context()).await;

    assert_eq!(summary.changed, vec!["local".to_string()]);
    assert_eq!(summary.generation_id, Some(2));
    assert_eq!(ids(&manager.all_sources()), vec!["A2", "A3", "B1"]);
    assert!(manager.search(Some("A1"), None, None).is_empty());
}

#[rstest]
#[case::no_files(vec![], true)]
#[case::one_writable(vec![writable_file("a.bib"), read_only_file("b.bib")], true)]
#[case::only_read_only(vec![read_only_file("a.bib"), read_only_file("b.json")], false)]
#[tokio::test]
async fn test_writability(#[case] files: Vec<BibliographyFile>, #[case] expected: bool) {
    let (local, remote) = local_and_remote();
    local.set_files(files);
    let manager = manager_with(&[local, remote]);

    let summary = manager.load(&context()).await;

    assert_eq!(summary.writable, expected);
    assert_eq!(manager.is_writable(), expected);
}

#[tokio::test]
async fn test_visibility_gate_applies_to_search_and_collections() {
    let (local, remote) = local_and_remote();
    local.set_files(vec![read_only_file("refs.bib")]);
    remote.set_collections(vec![BibliographyCollection::new("C1", "Bars", "zotero")]);
    remote.set_items(vec![record("B1", "Bar", &["C1"])]);
    let manager = manager_with(&[local, remote]);
    manager.load(&context()).await;

    assert_eq!(ids(&manager.all_sources()), vec!["A1"]);
    assert!(manager.search(Some("Bar"), None, None).is_empty());
    assert!(manager.search(None, Some("zotero"), None).is_empty());
    assert!(manager.collections(None).is_empty());
}

#[tokio::test]
async fn test_scoping_composition() {
    let local = ScriptedProvider::new("local");
    local.set_items(vec![authored("curie1903", "Radioactive substances", "Curie", 1903)]);

    let remote = ScriptedProvider::new("zotero");
    remote.set_collections(vec![
        BibliographyCollection::new("PHYS", "Physics", "zotero"),
        BibliographyCollection::new("CHEM", "Chemistry", "zotero"),
    ]);
    let mut items = vec![
        authored("curie1911", "Radium and the new concepts", "Curie", 1911),
        authored("curie1898", "Sur une substance nouvelle", "Curie", 1898),
        authored("rutherford1911", "Scattering of alpha particles", "Rutherford", 1911),
    ];
    items[0].collection_keys = vec!["CHEM".into()];
    items[1].collection_keys = vec!["PHYS".into(), "CHEM".into()];
    items[2].collection_keys = vec!["PHYS".into()];
    remote.set_items(items);

    let manager = manager_with(&[local, remote]);
    manager.load(&context()).await;

    let scoped = manager.search(Some("curie"), Some("zotero"), Some("PHYS"));
    let expected: Vec<String> = manager
        .search(Some("curie"), Some("zotero"), None)
        .into_iter()
        .filter(|r| r.in_collection("PHYS"))
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(ids(&scoped), expected);
    assert_eq!(expected, vec!["curie1898"]);

    // without a query, filtering keeps merge order
    assert_eq!(
        ids(&manager.search(None, Some("zotero"), Some("CHEM"))),
        vec!["curie1911", "curie1898"]
    );
    assert_eq!(ids(&manager.search(Some("  "), Some("local"), None)), vec!["curie1903"]);
    assert_eq!(manager.search(None, None, None).len(), 4);

    assert!(manager.search(Some("curie"), Some("nope"), None).is_empty());
    assert!(manager.search(None, Some("zotero"), Some("NOPE")).is_empty());
}

#[tokio::test]
async fn test_failing_provider_keeps_previous_contribution() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local.clone(), remote.clone()]);
    manager.load(&context()).await;

    remote.set_behavior(LoadBehavior::Fail);
    local.set_items(vec![record("A9", "Foo nine", &[])]);
    let summary = manager.load(&context()).await;

    assert_eq!(summary.failed, vec!["zotero".to_string()]);
    assert_eq!(summary.changed, vec!["local".to_string()]);
    assert!(summary.rebuilt);
    assert_eq!(ids(&manager.all_sources()), vec!["A9", "B1"]);

    let warning = manager.warning_for_provider("zotero").unwrap();
    assert!(warning.contains("misconfigured"));
    assert_eq!(manager.warning(), Some(warning));

    remote.set_behavior(LoadBehavior::Normal);
    manager.load(&context()).await;
    assert_eq!(manager.warning_for_provider("zotero"), None);
}

#[tokio::test]
async fn test_panicking_provider_is_isolated() {
    let (local, remote) = local_and_remote();
    remote.set_behavior(LoadBehavior::Panic);
    let manager = manager_with(&[local, remote]);

    let summary = manager.load(&context()).await;

    assert_eq!(summary.failed, vec!["zotero".to_string()]);
    assert_eq!(ids(&manager.all_sources()), vec!["A1"]);
    assert!(manager.warning_for_provider("zotero").is_some());
}

#[tokio::test]
async fn test_slow_provider_times_out_as_unchanged() {
    let (local, remote) = local_and_remote();
    remote.set_behavior(LoadBehavior::Delay(Duration::from_secs(10)));
    let config = BibliographyConfig {
        load_timeout_secs: Some(1),
        ..BibliographyConfig::default()
    };
    let manager = manager_with_config(&[local, remote], config);

    let summary = manager.load(&context()).await;

    assert_eq!(summary.timed_out, vec!["zotero".to_string()]);
    assert_eq!(ids(&manager.all_sources()), vec!["A1"]);
    assert!(manager
        .warning_for_provider("zotero")
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn test_disabling_provider_removes_its_records() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local.clone(), remote.clone()]);
    manager.load(&context()).await;

    remote.set_enabled(false);
    let summary = manager.load(&context()).await;
    assert!(summary.rebuilt);
    assert!(summary.changed.is_empty());
    assert_eq!(ids(&manager.all_sources()), vec!["A1"]);
    assert_eq!(remote.load_count(), 1);

    remote.set_enabled(true);
    let summary = manager.load(&context()).await;
    assert!(summary.rebuilt);
    assert_eq!(summary.generation_id, Some(3));
    assert_eq!(ids(&manager.all_sources()), vec!["A1", "B1"]);
}

#[tokio::test]
async fn test_concurrent_loads_are_serialized() {
    let (local, remote) = local_and_remote();
    remote.set_behavior(LoadBehavior::Delay(Duration::from_millis(50)));
    let manager = manager_with(&[local, remote]);

    let (ctx_a, ctx_b) = (context(), context());
    let (a, b) = tokio::join!(manager.load(&ctx_a), manager.load(&ctx_b));

    assert!(a.rebuilt != b.rebuilt);
    assert_eq!(a.generation_id, Some(1));
    assert_eq!(b.generation_id, Some(1));
}

#[tokio::test]
async fn test_find_by_identifier_only_searches_local() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local, remote]);

    assert!(manager.find_by_identifier_in_local_sources("A1").is_none());
    manager.load(&context()).await;

    assert_eq!(
        manager.find_by_identifier_in_local_sources("A1").map(|r| r.title.clone()),
        Some(Some("Foo".to_string()))
    );
    assert!(manager.find_by_identifier_in_local_sources("B1").is_none());
}

#[tokio::test]
async fn test_duplicate_ids_across_providers_are_kept() {
    let (local, remote) = local_and_remote();
    remote.set_items(vec![record("A1", "Remote foo", &[])]);
    let manager = manager_with(&[local, remote]);
    manager.load(&context()).await;

    let all = manager.all_sources();
    assert_eq!(ids(&all), vec!["A1", "A1"]);
    assert_eq!(all[0].provider_key(), "local");
    assert_eq!(all[1].provider_key(), "zotero");
}

#[tokio::test]
async fn test_citation_provider_first_then_fallback() {
    let (local, remote) = local_and_remote();
    let manager = manager_with(&[local, remote.clone()]);
    manager.load(&context()).await;
    let bar = source("B1", "Bar");

    remote.set_citation(Some("@article{B1, title = {Bar}}"));
    let citation = manager
        .generate_citation(&context(), "B1", &bar, Some("zotero"))
        .await;
    assert_eq!(citation, "@article{B1, title = {Bar}}");

    for declined in [None, Some(""), Some("error")] {
        remote.set_citation(declined);
        let citation = manager
            .generate_citation(&context(), "B1", &bar, Some("zotero"))
            .await;
        assert!(citation.starts_with("@misc{B1,"), "{}", citation);
        assert!(citation.contains("title = {Bar}"));
        assert!(citation.ends_with('}'));
    }

    let citation = manager
        .generate_citation(&context(), "X", &bar, Some("unknown"))
        .await;
    assert!(citation.starts_with("@misc{X,"));
}

#[tokio::test]
async fn test_warning_follows_registration_order() {
    let (local, remote) = local_and_remote();
    remote.set_warning(Some("Unable to read Zotero library"));
    let manager = manager_with(&[local.clone(), remote]);

    assert_eq!(manager.warning().as_deref(), Some("Unable to read Zotero library"));

    local.set_warning(Some("Missing refs.bib"));
    assert_eq!(manager.warning().as_deref(), Some("Missing refs.bib"));
    assert_eq!(
        manager.warning_for_provider("zotero").as_deref(),
        Some("Unable to read Zotero library")
    );
    assert_eq!(manager.warning_for_provider("nope"), None);
}

#[tokio::test]
async fn test_collections_are_sanitized() {
    let remote = ScriptedProvider::new("zotero");
    remote.set_collections(vec![
        BibliographyCollection::new("A", "A", "zotero").with_parent("B"),
        BibliographyCollection::new("B", "B", "zotero").with_parent("A"),
        BibliographyCollection::new("C", "C", "zotero").with_parent("GONE"),
    ]);
    remote.set_items(vec![record("x", "X", &["A", "GONE"])]);
    let manager = manager_with(&[remote]);
    manager.load(&context()).await;

    let collections = manager.collections(Some("zotero"));
    assert_eq!(collections.len(), 3);
    assert_eq!(collections[2].parent_key, None);
    // exactly one link of the A/B loop is cut
    let linked = collections[..2].iter().filter(|c| c.parent_key.is_some()).count();
    assert_eq!(linked, 1);

    assert_eq!(manager.all_sources()[0].collection_keys, vec!["A".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_see_writability_with_its_own_generation() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let (local, remote) = local_and_remote();
    let manager = Arc::new(manager_with(&[local.clone(), remote.clone()]));
    manager.load(&context()).await;
    assert_eq!(ids(&manager.all_sources()), vec!["A1", "B1"]);

    // a large replacement keeps the rebuild busy while readers run
    let mut replacement = vec![record("A2", "Foo again", &[])];
    replacement.extend((0..5_000).map(|i| record(&format!("filler{}", i), "Filler", &[])));
    local.set_items(replacement);
    local.set_files(vec![read_only_file("refs.bib")]);

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let manager = Arc::clone(&manager);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let visible = ids(&manager.all_sources());
                let before = visible == ["A1", "B1"];
                let after = visible.first().map(String::as_str) == Some("A2")
                    && !visible.iter().any(|id| id == "B1");
                assert!(before || after, "mixed snapshot: {:?}", &visible[..visible.len().min(3)]);
            }
        })
    };

    let summary = manager.load(&context()).await;
    done.store(true, Ordering::SeqCst);
    reader.join().unwrap();

    assert!(summary.rebuilt);
    assert!(!summary.writable);
    assert_eq!(manager.all_sources().len(), 5_001);
}
