//! Zotero item to CSL conversion

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::sqlite::{ZoteroCreator, ZoteroItem};
use crate::domain::{BibliographySource, CslDate, CslName};

pub fn csl_type(zotero_type: &str) -> &'static str {
    match zotero_type {
        "journalArticle" => "article-journal",
        "magazineArticle" => "article-magazine",
        "newspaperArticle" => "article-newspaper",
        "preprint" => "article",
        "book" => "book",
        "bookSection" => "chapter",
        "conferencePaper" => "paper-conference",
        "thesis" => "thesis",
        "report" => "report",
        "webpage" => "webpage",
        "blogPost" => "post-weblog",
        "forumPost" => "post",
        "manuscript" => "manuscript",
        "letter" | "email" | "instantMessage" => "personal_communication",
        "interview" => "interview",
        "film" | "videoRecording" => "motion_picture",
        "tvBroadcast" | "radioBroadcast" => "broadcast",
        "audioRecording" | "podcast" => "song",
        "artwork" => "graphic",
        "map" => "map",
        "patent" => "patent",
        "case" => "legal_case",
        "statute" => "legislation",
        "bill" | "hearing" => "bill",
        "presentation" => "speech",
        "computerProgram" => "software",
        "dataset" => "dataset",
        "standard" => "standard",
        "encyclopediaArticle" => "entry-encyclopedia",
        "dictionaryEntry" => "entry-dictionary",
        _ => "document",
    }
}

/// Zotero fields that map onto a CSL variable without transformation
fn csl_variable(field: &str) -> Option<&'static str> {
    let variable = match field {
        "title" => "title",
        "publicationTitle" | "bookTitle" | "proceedingsTitle" | "websiteTitle" | "blogTitle"
        | "encyclopediaTitle" | "dictionaryTitle" | "forumTitle" | "programTitle" => {
            "container-title"
        }
        "publisher" | "university" | "institution" | "label" | "studio" | "network" => "publisher",
        "place" => "publisher-place",
        "volume" => "volume",
        "issue" => "issue",
        "pages" => "page",
        "DOI" => "DOI",
        "url" => "URL",
        "ISBN" => "ISBN",
        "ISSN" => "ISSN",
        "abstractNote" => "abstract",
        "language" => "language",
        "extra" => "note",
        "edition" => "edition",
        "series" => "collection-title",
        "seriesNumber" => "collection-number",
        "numPages" => "number-of-pages",
        "numberOfVolumes" => "number-of-volumes",
        "shortTitle" => "title-short",
        "journalAbbreviation" => "container-title-short",
        "number" | "reportNumber" | "billNumber" | "patentNumber" => "number",
        "thesisType" | "reportType" | "websiteType" => "genre",
        "conferenceName" => "event-title",
        "archive" => "archive",
        "archiveLocation" => "archive_location",
        "callNumber" => "call-number",
        "rights" => "license",
        _ => return None,
    };
    Some(variable)
}

/// CSL role for a Zotero creator type; `None` drops the creator
fn creator_role(creator_type: &str) -> Option<&'static str> {
    match creator_type {
        "editor" => Some("editor"),
        "seriesEditor" => Some("collection-editor"),
        "bookAuthor" => Some("container-author"),
        "translator" => Some("translator"),
        "reviewedAuthor" => Some("reviewed-author"),
        "recipient" => Some("recipient"),
        "interviewer" => Some("interviewer"),
        "contributor" | "commenter" | "wordsBy" | "castMember" | "guest" | "counsel"
        | "attorneyAgent" | "cosponsor" | "producer" | "scriptwriter" => None,
        _ => Some("author"),
    }
}

fn creator_name(creator: &ZoteroCreator) -> Option<CslName> {
    let last = creator.last_name.as_deref().map(str::trim).unwrap_or("");
    let first = creator.first_name.as_deref().map(str::trim).unwrap_or("");
    match (first.is_empty(), last.is_empty()) {
        (true, true) => None,
        (true, false) => Some(CslName::literal(last)),
        (false, true) => Some(CslName::literal(first)),
        (false, false) => Some(CslName::personal(last, Some(first.to_string()))),
    }
}

/// Parse Zotero's multipart date (`YYYY-MM-DD original text`, zero parts unknown)
pub fn parse_date(value: &str) -> Option<CslDate> {
    let (sql_part, original) = match value.split_once(' ') {
        Some((head, tail)) => (head, tail.trim()),
        None => (value, value),
    };

    if let Ok(date) = NaiveDate::parse_from_str(sql_part, "%Y-%m-%d") {
        return Some(CslDate::from_parts(vec![
            date.year(),
            date.month() as i32,
            date.day() as i32,
        ]));
    }

    let parts: Vec<i32> = sql_part
        .split('-')
        .map_while(|p| p.parse::<i32>().ok())
        .take_while(|n| *n > 0)
        .collect();
    if parts.is_empty() || sql_part.split('-').count() != 3 {
        if original.trim().is_empty() {
            return None;
        }
        return Some(CslDate {
            raw: Some(original.to_string()),
            ..Default::default()
        });
    }
    Some(CslDate::from_parts(parts))
}

/// `accessDate` is stored as a SQL timestamp
fn parse_access_date(value: &str) -> Option<CslDate> {
    let datetime = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(CslDate::from_parts(vec![
        datetime.year(),
        datetime.month() as i32,
        datetime.day() as i32,
    ]))
}

/// Convert an item into a CSL source with the given id
pub fn item_to_source(item: &ZoteroItem, id: &str, provider_key: &str) -> BibliographySource {
    let mut source = BibliographySource::new(id, provider_key);
    source.item_type = csl_type(&item.item_type).to_string();

    for (field, value) in &item.fields {
        if value.trim().is_empty() {
            continue;
        }
        match field.as_str() {
            "date" => source.issued = parse_date(value),
            "accessDate" => {
                if let Some(accessed) = parse_access_date(value) {
                    if let Ok(value) = serde_json::to_value(accessed) {
                        source.other.insert("accessed".to_string(), value);
                    }
                }
            }
            other => {
                if let Some(variable) = csl_variable(other) {
                    set_variable(&mut source, variable, value.clone());
                }
            }
        }
    }

    for creator in &item.creators {
        let (Some(role), Some(name)) = (creator_role(&creator.creator_type), creator_name(creator))
        else {
            continue;
        };
        match role {
            "author" => source.author.push(name),
            "editor" => source.editor.push(name),
            role => {
                let entry = source
                    .other
                    .entry(role.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let (Value::Array(names), Ok(name)) = (entry, serde_json::to_value(name)) {
                    names.push(name);
                }
            }
        }
    }

    source
}

fn set_variable(source: &mut BibliographySource, variable: &str, value: String) {
    let slot = match variable {
        "title" => &mut source.title,
        "container-title" => &mut source.container_title,
        "publisher" => &mut source.publisher,
        "publisher-place" => &mut source.publisher_place,
        "volume" => &mut source.volume,
        "issue" => &mut source.issue,
        "page" => &mut source.page,
        "DOI" => &mut source.doi,
        "URL" => &mut source.url,
        "ISBN" => &mut source.isbn,
        "ISSN" => &mut source.issn,
        "abstract" => &mut source.abstract_text,
        "language" => &mut source.language,
        "note" => &mut source.note,
        other => {
            source
                .other
                .entry(other.to_string())
                .or_insert(Value::String(value));
            return;
        }
    };
    // first non-empty field wins (publicationTitle before series titles, ...)
    if slot.is_none() {
        *slot = Some(value);
    }
}
