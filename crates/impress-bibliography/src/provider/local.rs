//! Document-local bibliography files
//!
//! Sources come from the files a document names in its `bibliography`
//! metadata, configured project bibliographies, and inline `references`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use super::bibtex::{entry_to_source, parse_bibtex};
use super::{string_list, BibliographyProvider, DocumentContext, ProviderCache};
use crate::config::LocalConfig;
use crate::domain::{
    BibliographyCollection, BibliographyFile, BibliographySource,
    BibliographySourceWithCollections,
};
use crate::error::ProviderError;

/// Key of the local provider; the manager treats its records as always visible
pub const LOCAL_PROVIDER_KEY: &str = "local";

/// What a local load looked at; a new load is a no-op when this is unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    files: Vec<(PathBuf, Option<(SystemTime, u64)>)>,
    inline: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Bibtex,
    CslJson,
    Unsupported,
}

impl FileFormat {
    fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "bib" | "bibtex" => FileFormat::Bibtex,
            "json" => FileFormat::CslJson,
            _ => FileFormat::Unsupported,
        }
    }

    fn is_writable(self) -> bool {
        !matches!(self, FileFormat::Unsupported)
    }
}

/// A file a document refers to
#[derive(Debug, Clone)]
struct ReferencedFile {
    path: PathBuf,
    is_project: bool,
}

/// Provider for bibliography files on disk
pub struct LocalFileProvider {
    config: LocalConfig,
    enabled: AtomicBool,
    cache: ProviderCache,
    fingerprint: Mutex<Option<Fingerprint>>,
}

impl LocalFileProvider {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            enabled: AtomicBool::new(true),
            cache: ProviderCache::default(),
            fingerprint: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Document bibliographies first, then project ones; duplicates dropped
    fn referenced_files(&self, context: &DocumentContext) -> Vec<ReferencedFile> {
        let mut seen = HashSet::new();
        let document_files = context
            .metadata_values("bibliography")
            .flat_map(string_list)
            .map(|p| (context.resolve(Path::new(&p)), false));
        let project_files = self
            .config
            .project_bibliographies
            .iter()
            .map(|p| (context.resolve(p), true));

        document_files
            .chain(project_files)
            .filter(|(path, _)| seen.insert(path.clone()))
            .map(|(path, is_project)| ReferencedFile { path, is_project })
            .collect()
    }
}

impl Default for LocalFileProvider {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

#[async_trait]
impl BibliographyProvider for LocalFileProvider {
    fn key(&self) -> &str {
        LOCAL_PROVIDER_KEY
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn load(&self, context: &DocumentContext) -> Result<bool, ProviderError> {
        let files = self.referenced_files(context);
        let inline: Vec<Value> = context
            .metadata_values("references")
            .filter_map(Value::as_array)
            .flatten()
            .cloned()
            .collect();

        let (fingerprint, files, inline) = tokio::task::spawn_blocking(move || {
            let stamp = take_fingerprint(&files, &inline);
            (stamp, files, inline)
        })
        .await?;

        {
            let previous = self.fingerprint.lock().unwrap_or_else(|e| e.into_inner());
            if previous.as_ref() == Some(&fingerprint) {
                tracing::debug!("Local bibliographies unchanged");
                return Ok(false);
            }
        }

        let (items, warnings) =
            tokio::task::spawn_blocking(move || read_sources(&files, &inline)).await?;

        tracing::debug!(
            "Loaded {} local sources ({} warnings)",
            items.len(),
            warnings.len()
        );

        self.cache.set_warning(if warnings.is_empty() {
            None
        } else {
            Some(warnings.join("; "))
        });
        *self.fingerprint.lock().unwrap_or_else(|e| e.into_inner()) = Some(fingerprint);

        Ok(self.cache.replace(items, Vec::new()))
    }

    fn collections(&self) -> Vec<BibliographyCollection> {
        self.cache.collections()
    }

    fn items(&self) -> Vec<BibliographySourceWithCollections> {
        self.cache.items()
    }

    fn bibliography_paths(&self, context: &DocumentContext) -> Vec<BibliographyFile> {
        self.referenced_files(context)
            .into_iter()
            .map(|file| {
                let display_path = file
                    .path
                    .strip_prefix(context.base_dir())
                    .unwrap_or(file.path.as_path())
                    .display()
                    .to_string();
                BibliographyFile {
                    display_path,
                    writable: is_writable_target(&file.path),
                    is_project: file.is_project,
                    full_path: file.path,
                }
            })
            .collect()
    }

    fn warning_message(&self) -> Option<String> {
        self.cache.warning()
    }
}

fn take_fingerprint(files: &[ReferencedFile], inline: &[Value]) -> Fingerprint {
    let files = files
        .iter()
        .map(|file| {
            let stamp = std::fs::metadata(&file.path)
                .ok()
                .and_then(|meta| Some((meta.modified().ok()?, meta.len())));
            (file.path.clone(), stamp)
        })
        .collect();

    let inline = if inline.is_empty() {
        None
    } else {
        let serialized = serde_json::to_vec(inline).unwrap_or_default();
        Some(blake3::hash(&serialized).to_hex().to_string())
    };

    Fingerprint { files, inline }
}

/// Whether a bibliography file could be written (or created) at `path`
fn is_writable_target(path: &Path) -> bool {
    if !FileFormat::of(path).is_writable() {
        return false;
    }
    match std::fs::metadata(path) {
        Ok(meta) => !meta.permissions().readonly(),
        Err(_) => path
            .parent()
            .and_then(|dir| std::fs::metadata(dir).ok())
            .map(|meta| meta.is_dir() && !meta.permissions().readonly())
            .unwrap_or(false),
    }
}

fn csl_to_source(value: &Value) -> Result<BibliographySource, String> {
    let mut source: BibliographySource =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    if source.id.trim().is_empty() {
        return Err("item without id".to_string());
    }
    source.provider_key = LOCAL_PROVIDER_KEY.to_string();
    Ok(source)
}

fn parse_error(path: &Path, message: impl Into<String>) -> ProviderError {
    ProviderError::Parse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn read_file(path: &Path) -> Result<(Vec<BibliographySource>, Vec<String>), ProviderError> {
    let format = FileFormat::of(path);
    if format == FileFormat::Unsupported {
        return Err(parse_error(path, "unsupported bibliography format"));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ProviderError::io(path, e))?;

    match format {
        FileFormat::Bibtex => {
            let document = parse_bibtex(&content);
            let sources = document
                .entries
                .iter()
                .map(|entry| entry_to_source(entry, LOCAL_PROVIDER_KEY))
                .collect();
            let warnings = document
                .errors
                .into_iter()
                .map(|e| format!("{}: {}", path.display(), e))
                .collect();
            Ok((sources, warnings))
        }
        FileFormat::CslJson => {
            let values: Vec<Value> =
                serde_json::from_str(&content).map_err(|e| parse_error(path, e.to_string()))?;
            let mut sources = Vec::with_capacity(values.len());
            let mut warnings = Vec::new();
            for (index, value) in values.iter().enumerate() {
                match csl_to_source(value) {
                    Ok(source) => sources.push(source),
                    Err(e) => warnings.push(format!("{} item {}: {}", path.display(), index, e)),
                }
            }
            Ok((sources, warnings))
        }
        FileFormat::Unsupported => Ok((Vec::new(), Vec::new())),
    }
}

/// Read every file and inline reference; ids stay unique (first wins)
fn read_sources(
    files: &[ReferencedFile],
    inline: &[Value],
) -> (Vec<BibliographySourceWithCollections>, Vec<String>) {
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    for file in files {
        match read_file(&file.path) {
            Ok((file_sources, file_warnings)) => {
                sources.extend(file_sources);
                warnings.extend(file_warnings);
            }
            Err(e) => {
                tracing::warn!("{}", e);
                warnings.push(e.to_string());
            }
        }
    }

    for value in inline {
        match csl_to_source(value) {
            Ok(source) => sources.push(source),
            Err(e) => warnings.push(format!("inline reference: {}", e)),
        }
    }

    let mut seen = HashSet::new();
    let items = sources
        .into_iter()
        .filter(|source| {
            let fresh = seen.insert(source.id.clone());
            if !fresh {
                tracing::debug!("Duplicate local id '{}' ignored", source.id);
            }
            fresh
        })
        .map(BibliographySourceWithCollections::new)
        .collect();

    (items, warnings)
}
