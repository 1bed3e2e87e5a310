//! On-disk bibliography locations surfaced by providers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A candidate bibliography file a provider could write to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BibliographyFile {
    #[serde(rename = "displayPath")]
    pub display_path: String,
    #[serde(rename = "fullPath")]
    pub full_path: PathBuf,
    #[serde(rename = "isProject")]
    pub is_project: bool,
    pub writable: bool,
}

impl BibliographyFile {
    pub fn new(display_path: impl Into<String>, full_path: impl Into<PathBuf>) -> Self {
        Self {
            display_path: display_path.into(),
            full_path: full_path.into(),
            is_project: false,
            writable: true,
        }
    }

    pub fn project(mut self) -> Self {
        self.is_project = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}
