//! Normalized bibliographic source (CSL-JSON shaped)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A name in CSL form.
///
/// Personal names carry `family`/`given`; institutional or single-field
/// names carry `literal`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CslName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
}

impl CslName {
    pub fn personal(family: impl Into<String>, given: Option<String>) -> Self {
        Self {
            family: Some(family.into()),
            given: given.filter(|g| !g.trim().is_empty()),
            literal: None,
        }
    }

    pub fn literal(name: impl Into<String>) -> Self {
        Self {
            family: None,
            given: None,
            literal: Some(name.into()),
        }
    }

    /// Family name, falling back to the literal name
    pub fn sort_name(&self) -> Option<&str> {
        self.family.as_deref().or(self.literal.as_deref())
    }

    /// Format as "Given Family" for display
    pub fn display_name(&self) -> String {
        match (&self.literal, &self.family, &self.given) {
            (Some(literal), _, _) => literal.clone(),
            (None, Some(family), Some(given)) => format!("{} {}", given, family),
            (None, Some(family), None) => family.clone(),
            (None, None, Some(given)) => given.clone(),
            (None, None, None) => String::new(),
        }
    }
}

/// A CSL date variable
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CslDate {
    #[serde(rename = "date-parts", default, skip_serializing_if = "Vec::is_empty")]
    pub date_parts: Vec<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
}

impl CslDate {
    pub fn from_parts(parts: Vec<i32>) -> Self {
        Self {
            date_parts: vec![parts],
            raw: None,
            literal: None,
        }
    }

    pub fn year(&self) -> Option<i32> {
        if let Some(year) = self.date_parts.first().and_then(|p| p.first()) {
            return Some(*year);
        }
        // raw/literal dates: first run of four digits
        let text = self.raw.as_deref().or(self.literal.as_deref())?;
        let digits: Vec<char> = text.chars().collect();
        digits
            .windows(4)
            .find(|w| w.iter().all(|c| c.is_ascii_digit()))
            .and_then(|w| w.iter().collect::<String>().parse().ok())
    }

    /// ISO-like rendering (`YYYY`, `YYYY-MM` or `YYYY-MM-DD`) of the first date
    pub fn to_iso(&self) -> Option<String> {
        match self.date_parts.first().map(Vec::as_slice) {
            Some([y]) => Some(format!("{:04}", y)),
            Some([y, m]) => Some(format!("{:04}-{:02}", y, m)),
            Some([y, m, d, ..]) => Some(format!("{:04}-{:02}-{:02}", y, m, d)),
            _ => self.raw.clone().or_else(|| self.literal.clone()),
        }
    }
}

/// A normalized bibliographic source produced by a provider.
///
/// Serializes as a CSL-JSON item plus `providerKey`. Fields this type does not
/// model are kept in `other` so they survive a round trip.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BibliographySource {
    pub id: String,
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<CslName>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editor: Vec<CslName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<CslDate>,
    #[serde(rename = "container-title", default, skip_serializing_if = "Option::is_none")]
    pub container_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(rename = "publisher-place", default, skip_serializing_if = "Option::is_none")]
    pub publisher_place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(rename = "DOI", default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(rename = "URL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "ISBN", default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(rename = "ISSN", default, skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(rename = "providerKey", default)]
    pub provider_key: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

fn default_item_type() -> String {
    "article".to_string()
}

impl BibliographySource {
    /// Create a source with the required fields
    pub fn new(id: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: default_item_type(),
            provider_key: provider_key.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_author(mut self, author: CslName) -> Self {
        self.author.push(author);
        self
    }

    pub fn with_issued(mut self, parts: Vec<i32>) -> Self {
        self.issued = Some(CslDate::from_parts(parts));
        self
    }

    pub fn year(&self) -> Option<i32> {
        self.issued.as_ref().and_then(CslDate::year)
    }
}

/// A source together with the keys of the collections it belongs to.
///
/// This is the unit the manager indexes and hands back to callers.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BibliographySourceWithCollections {
    #[serde(flatten)]
    pub source: BibliographySource,
    #[serde(rename = "collectionKeys", default)]
    pub collection_keys: Vec<String>,
}

impl BibliographySourceWithCollections {
    pub fn new(source: BibliographySource) -> Self {
        Self {
            source,
            collection_keys: Vec::new(),
        }
    }

    pub fn with_collections(source: BibliographySource, collection_keys: Vec<String>) -> Self {
        Self {
            source,
            collection_keys,
        }
    }

    pub fn id(&self) -> &str {
        &self.source.id
    }

    pub fn provider_key(&self) -> &str {
        &self.source.provider_key
    }

    pub fn in_collection(&self, key: &str) -> bool {
        self.collection_keys.iter().any(|k| k == key)
    }
}

impl std::ops::Deref for BibliographySourceWithCollections {
    type Target = BibliographySource;

    fn deref(&self) -> &Self::Target {
        &self.source
    }
}
