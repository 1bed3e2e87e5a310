//! Locating the Zotero data directory and Better BibTeX

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref DATA_DIR_PREF: Regex =
        Regex::new(r#"user_pref\("extensions\.zotero\.dataDir",\s*"([^"]+)"\);"#).unwrap();
}

/// Profile roots Zotero uses on each platform, relative to the home dir
fn profile_roots(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".zotero").join("zotero"),
        home.join("Library")
            .join("Application Support")
            .join("Zotero")
            .join("Profiles"),
        home.join("AppData")
            .join("Roaming")
            .join("Zotero")
            .join("Zotero")
            .join("Profiles"),
    ]
}

/// Contents of the first `prefs.js` found in a Zotero profile
pub fn read_prefs(home: &Path) -> Option<String> {
    for root in profile_roots(home) {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        let mut profiles: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        profiles.sort();

        for profile in profiles {
            let prefs = profile.join("prefs.js");
            match std::fs::read_to_string(&prefs) {
                Ok(content) => return Some(content),
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    tracing::debug!("Unable to read {:?}: {}", prefs, e);
                }
                Err(_) => {}
            }
        }
    }
    None
}

/// The `extensions.zotero.dataDir` preference, unescaped
pub fn data_dir_from_prefs(prefs: &str) -> Option<PathBuf> {
    DATA_DIR_PREF
        .captures(prefs)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str().replace("\\\\", "\\")))
}

/// Whether the profile carries Better BibTeX preferences
pub fn better_bibtex_in_prefs(prefs: &str) -> bool {
    prefs.contains("extensions.zotero.translators.better-bibtex")
        || prefs.contains("extensions.better-bibtex")
}

/// Find the Zotero data directory: an existing `dataDir` preference wins,
/// then `~/Zotero`
pub fn detect_data_dir(home: &Path) -> Option<PathBuf> {
    if let Some(dir) = read_prefs(home).and_then(|prefs| data_dir_from_prefs(&prefs)) {
        if dir.is_dir() {
            return Some(dir);
        }
        tracing::debug!("Zotero dataDir preference {:?} does not exist", dir);
    }

    let default = home.join("Zotero");
    default.is_dir().then_some(default)
}

/// Better BibTeX is installed when its preferences or its database exist
pub fn detect_better_bibtex(home: &Path, data_dir: Option<&Path>) -> bool {
    let in_prefs = read_prefs(home)
        .map(|prefs| better_bibtex_in_prefs(&prefs))
        .unwrap_or(false);
    let in_data_dir = data_dir
        .map(|dir| dir.join("better-bibtex.sqlite").exists() || dir.join("better-bibtex").is_dir())
        .unwrap_or(false);
    in_prefs || in_data_dir
}
