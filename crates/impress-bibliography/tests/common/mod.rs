//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use impress_bibliography::{
    BibliographyCollection, BibliographyFile, BibliographyProvider, BibliographySource,
    BibliographySourceWithCollections, CslName, DocumentContext, ProviderError,
};

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_fixtures")
        .join(relative)
}

pub fn source(id: &str, title: &str) -> BibliographySource {
    BibliographySource::new(id, "").with_title(title)
}

pub fn record(id: &str, title: &str, collections: &[&str]) -> BibliographySourceWithCollections {
    BibliographySourceWithCollections::with_collections(
        source(id, title),
        collections.iter().map(|c| c.to_string()).collect(),
    )
}

pub fn authored(id: &str, title: &str, family: &str, year: i32) -> BibliographySourceWithCollections {
    BibliographySourceWithCollections::new(
        source(id, title)
            .with_author(CslName::personal(family, Some("Sam".into())))
            .with_issued(vec![year]),
    )
}

/// How a scripted provider's next load behaves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadBehavior {
    Normal,
    Fail,
    Panic,
    Delay(Duration),
}

#[derive(Default)]
struct Script {
    items: Vec<BibliographySourceWithCollections>,
    collections: Vec<BibliographyCollection>,
    files: Vec<BibliographyFile>,
    warning: Option<String>,
    citation: Option<String>,
    /// Set when the data was replaced since the last load
    dirty: bool,
}

/// In-memory provider whose data and load behavior the test controls
pub struct ScriptedProvider {
    key: String,
    enabled: AtomicBool,
    behavior: Mutex<LoadBehavior>,
    script: Mutex<Script>,
    /// What `items()` reports: the data as of the last successful load
    published: Mutex<(Vec<BibliographySourceWithCollections>, Vec<BibliographyCollection>)>,
    loads: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(key: &str) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            enabled: AtomicBool::new(true),
            behavior: Mutex::new(LoadBehavior::Normal),
            script: Mutex::new(Script {
                dirty: true,
                ..Script::default()
            }),
            published: Mutex::new((Vec::new(), Vec::new())),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn set_items(&self, items: Vec<BibliographySourceWithCollections>) {
        let mut script = self.script.lock().unwrap();
        script.items = items;
        script.dirty = true;
    }

    pub fn set_collections(&self, collections: Vec<BibliographyCollection>) {
        let mut script = self.script.lock().unwrap();
        script.collections = collections;
        script.dirty = true;
    }

    pub fn set_files(&self, files: Vec<BibliographyFile>) {
        self.script.lock().unwrap().files = files;
    }

    pub fn set_warning(&self, warning: Option<&str>) {
        self.script.lock().unwrap().warning = warning.map(str::to_string);
    }

    pub fn set_citation(&self, citation: Option<&str>) {
        self.script.lock().unwrap().citation = citation.map(str::to_string);
    }

    pub fn set_behavior(&self, behavior: LoadBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BibliographyProvider for ScriptedProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn load(&self, _context: &DocumentContext) -> Result<bool, ProviderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            LoadBehavior::Normal => {}
            LoadBehavior::Fail => {
                return Err(ProviderError::Config(format!("{} is misconfigured", self.key)))
            }
            LoadBehavior::Panic => panic!("{} exploded", self.key),
            LoadBehavior::Delay(delay) => tokio::time::sleep(delay).await,
        }

        let mut script = self.script.lock().unwrap();
        if !script.dirty {
            return Ok(false);
        }
        script.dirty = false;
        *self.published.lock().unwrap() = (script.items.clone(), script.collections.clone());
        Ok(true)
    }

    fn collections(&self) -> Vec<BibliographyCollection> {
        self.published.lock().unwrap().1.clone()
    }

    fn items(&self) -> Vec<BibliographySourceWithCollections> {
        self.published.lock().unwrap().0.clone()
    }

    fn bibliography_paths(&self, _context: &DocumentContext) -> Vec<BibliographyFile> {
        self.script.lock().unwrap().files.clone()
    }

    async fn generate_citation(
        &self,
        _context: &DocumentContext,
        _id: &str,
        _source: &BibliographySource,
    ) -> Result<Option<String>, ProviderError> {
        let citation = self.script.lock().unwrap().citation.clone();
        match citation.as_deref() {
            Some("error") => Err(ProviderError::Task("export failed".to_string())),
            _ => Ok(citation),
        }
    }

    fn warning_message(&self) -> Option<String> {
        self.script.lock().unwrap().warning.clone()
    }
}

pub fn writable_file(name: &str) -> BibliographyFile {
    BibliographyFile::new(name, format!("/tmp/{}", name))
}

pub fn read_only_file(name: &str) -> BibliographyFile {
    BibliographyFile::new(name, format!("/tmp/{}", name)).read_only()
}
