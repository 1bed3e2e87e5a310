//! Generic citation synthesis
//!
//! Renders a BibLaTeX entry from a normalized CSL source. This is the fallback
//! used whenever a provider has no citation record of its own, so it must
//! produce a well-formed entry for any source: fields it cannot represent are
//! omitted and a missing id is replaced by a generated cite key.

pub mod cite_key;

use crate::domain::{BibliographySource, CslName};
use cite_key::suggest_cite_key;

fn entry_type(csl_type: &str) -> &'static str {
    match csl_type {
        "article" | "article-journal" | "article-magazine" | "article-newspaper" => "article",
        "book" => "book",
        "chapter" => "incollection",
        "paper-conference" => "inproceedings",
        "thesis" => "thesis",
        "report" => "report",
        "webpage" | "post" | "post-weblog" => "online",
        "manuscript" => "unpublished",
        "patent" => "patent",
        "dataset" => "dataset",
        "software" => "software",
        "entry-encyclopedia" | "entry-dictionary" => "inreference",
        _ => "misc",
    }
}

/// BibLaTeX field carrying the CSL `container-title` for an entry type
fn container_field(entry_type: &str) -> &'static str {
    match entry_type {
        "article" => "journaltitle",
        "incollection" | "inproceedings" | "inreference" => "booktitle",
        _ => "howpublished",
    }
}

/// Escape characters with special meaning in BibTeX values
pub fn escape_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '#' | '$' | '%' | '&' | '_' | '{' | '}' => {
                result.push('\\');
                result.push(c);
            }
            '\\' => result.push_str("\\textbackslash{}"),
            _ => result.push(c),
        }
    }
    result
}

/// Percent-encode braces in `doi` and `url`, which are copied verbatim
fn escape_verbatim(value: &str) -> String {
    value.replace('{', "%7B").replace('}', "%7D")
}

fn format_name(name: &CslName) -> Option<String> {
    match (&name.literal, &name.family, &name.given) {
        (Some(literal), _, _) if !literal.trim().is_empty() => {
            Some(format!("{{{}}}", escape_value(literal.trim())))
        }
        (_, Some(family), Some(given)) => Some(format!(
            "{}, {}",
            escape_value(family.trim()),
            escape_value(given.trim())
        )),
        (_, Some(family), None) => Some(escape_value(family.trim())),
        (_, None, Some(given)) => Some(escape_value(given.trim())),
        _ => None,
    }
}

fn format_names(names: &[CslName]) -> Option<String> {
    let formatted: Vec<String> = names.iter().filter_map(format_name).collect();
    (!formatted.is_empty()).then(|| formatted.join(" and "))
}

/// `12-34` and `12–34` become `12--34`
fn format_pages(pages: &str) -> String {
    if pages.contains("--") {
        return pages.to_string();
    }
    pages.replace(['–', '—', '-'], "--")
}

/// Keep characters that are safe in an entry key
fn sanitize_key(id: &str) -> String {
    id.chars()
        .filter(|c| {
            !c.is_whitespace()
                && !matches!(c, ',' | '{' | '}' | '(' | ')' | '"' | '#' | '%' | '\\')
        })
        .collect()
}

fn format_field_value(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        return value.to_string();
    }
    format!("{{{}}}", value)
}

/// Render a BibLaTeX entry for `source` under the key `id`
pub fn to_biblatex(id: &str, source: &BibliographySource) -> String {
    let mut key = sanitize_key(id);
    if key.is_empty() {
        key = suggest_cite_key(source);
    }

    let kind = entry_type(&source.item_type);
    let text = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(escape_value)
    };

    let mut fields: Vec<(&str, String)> = Vec::new();
    if let Some(author) = format_names(&source.author) {
        fields.push(("author", author));
    }
    if let Some(editor) = format_names(&source.editor) {
        fields.push(("editor", editor));
    }
    if let Some(title) = text(&source.title) {
        fields.push(("title", title));
    }
    if let Some(container) = text(&source.container_title) {
        fields.push((container_field(kind), container));
    }

    if let Some(issued) = &source.issued {
        if !issued.date_parts.is_empty() {
            if let Some(iso) = issued.to_iso() {
                fields.push(("date", iso));
            }
        } else if let Some(year) = issued.year() {
            fields.push(("year", year.to_string()));
        }
    }

    for (name, value) in [
        ("publisher", &source.publisher),
        ("location", &source.publisher_place),
        ("volume", &source.volume),
        ("number", &source.issue),
    ] {
        if let Some(value) = text(value) {
            fields.push((name, value));
        }
    }
    if let Some(pages) = text(&source.page) {
        fields.push(("pages", format_pages(&pages)));
    }

    // verbatim fields
    if let Some(doi) = source.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        fields.push(("doi", escape_verbatim(doi)));
    }
    if let Some(url) = source.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        fields.push(("url", escape_verbatim(url)));
    }

    for (name, value) in [
        ("isbn", &source.isbn),
        ("issn", &source.issn),
        ("langid", &source.language),
        ("abstract", &source.abstract_text),
        ("note", &source.note),
    ] {
        if let Some(value) = text(value) {
            fields.push((name, value));
        }
    }

    let mut result = format!("@{}{{{},\n", kind, key);
    for (name, value) in fields {
        result.push_str("    ");
        result.push_str(name);
        result.push_str(" = ");
        result.push_str(&format_field_value(&value));
        result.push_str(",\n");
    }
    result.push('}');
    result
}
