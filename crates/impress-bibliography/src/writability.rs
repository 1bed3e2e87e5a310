//! Whether the merged bibliography may be modified

use std::sync::Arc;

use crate::domain::BibliographyFile;
use crate::provider::{BibliographyProvider, DocumentContext};

/// Candidate bibliography files of every enabled provider, in provider order
pub fn bibliography_files(
    providers: &[Arc<dyn BibliographyProvider>],
    context: &DocumentContext,
) -> Vec<BibliographyFile> {
    providers
        .iter()
        .filter(|provider| provider.is_enabled())
        .flat_map(|provider| provider.bibliography_paths(context))
        .collect()
}

/// No candidate files means a new bibliography can be created; otherwise at
/// least one candidate must be writable
pub fn allows_writes(files: &[BibliographyFile]) -> bool {
    files.is_empty() || files.iter().any(|file| file.writable)
}

pub fn should_allow_writes(
    providers: &[Arc<dyn BibliographyProvider>],
    context: &DocumentContext,
) -> bool {
    allows_writes(&bibliography_files(providers, context))
}
