//! BibTeX/BibLaTeX reading for local bibliography files
//!
//! A nom-based reader that handles:
//! - @string definitions (with the standard month macros predefined)
//! - @preamble and @comment sections (skipped)
//! - Braced, quoted, numeric and macro field values with `#` concatenation
//! - Nested braces in field values
//!
//! Entries are converted straight into CSL-shaped [`BibliographySource`]s.

use lazy_static::lazy_static;
use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::map,
    IResult,
};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

use crate::domain::{BibliographySource, CslDate, CslName};

/// A raw entry as written in the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibtexEntry {
    pub entry_type: String,
    pub cite_key: String,
    /// Field names are lowercased; values are undecoded
    pub fields: Vec<(String, String)>,
}

impl BibtexEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Result of reading a BibTeX file: entries plus recoverable errors
#[derive(Debug, Clone, Default)]
pub struct BibtexDocument {
    pub entries: Vec<BibtexEntry>,
    pub errors: Vec<String>,
}

lazy_static! {
    static ref MONTH_MACROS: HashMap<String, String> = [
        ("jan", "January"),
        ("feb", "February"),
        ("mar", "March"),
        ("apr", "April"),
        ("may", "May"),
        ("jun", "June"),
        ("jul", "July"),
        ("aug", "August"),
        ("sep", "September"),
        ("oct", "October"),
        ("nov", "November"),
        ("dec", "December"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    /// Named LaTeX symbols that stand alone (no argument)
    static ref LATEX_SYMBOLS: HashMap<&'static str, &'static str> = [
        ("ss", "ß"),
        ("ae", "æ"),
        ("AE", "Æ"),
        ("oe", "œ"),
        ("OE", "Œ"),
        ("o", "ø"),
        ("O", "Ø"),
        ("aa", "å"),
        ("AA", "Å"),
        ("l", "ł"),
        ("L", "Ł"),
        ("i", "ı"),
        ("j", "ȷ"),
        ("textendash", "–"),
        ("textemdash", "—"),
        ("ldots", "…"),
        ("dots", "…"),
    ]
    .into_iter()
    .collect();
}

/// Parse a BibTeX document, recovering from malformed entries
pub fn parse_bibtex(input: &str) -> BibtexDocument {
    let mut document = BibtexDocument::default();
    let mut strings = MONTH_MACROS.clone();
    let mut remaining = input;
    let mut line = 1;

    while let Some(pos) = remaining.find('@') {
        let at = &remaining[pos..];
        line += remaining[..pos].matches('\n').count();

        match parse_at_block(at, &strings) {
            Ok((rest, block)) => {
                match block {
                    AtBlock::Entry(entry) => document.entries.push(entry),
                    AtBlock::String(key, value) => {
                        strings.insert(key.to_lowercase(), value);
                    }
                    AtBlock::Skipped => {}
                }
                line += at[..at.len() - rest.len()].matches('\n').count();
                remaining = rest;
            }
            Err(_) => {
                document
                    .errors
                    .push(format!("line {}: failed to parse entry", line));
                remaining = &at[1..];
            }
        }
    }

    document
}

enum AtBlock {
    Entry(BibtexEntry),
    String(String, String),
    Skipped,
}

fn parse_at_block<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, AtBlock> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, kind) = take_while1(|c: char| c.is_ascii_alphanumeric())(rest)?;

    match kind.to_lowercase().as_str() {
        "string" => {
            let (rest, _) = open_delimiter(rest)?;
            let (rest, (key, value)) = parse_assignment(rest, strings)?;
            let (rest, _) = close_delimiter(rest)?;
            Ok((rest, AtBlock::String(key, value)))
        }
        "preamble" => {
            let (rest, _) = open_delimiter(rest)?;
            let (rest, _) = parse_value(rest, strings)?;
            let (rest, _) = close_delimiter(rest)?;
            Ok((rest, AtBlock::Skipped))
        }
        "comment" => {
            let (rest, _) = multispace0(rest)?;
            if rest.starts_with('{') {
                let (rest, _) = braced_span(rest)?;
                Ok((rest, AtBlock::Skipped))
            } else {
                let end = rest.find('\n').unwrap_or(rest.len());
                Ok((&rest[end..], AtBlock::Skipped))
            }
        }
        _ => {
            let (rest, entry) = parse_entry_body(rest, kind, strings)?;
            Ok((rest, AtBlock::Entry(entry)))
        }
    }
}

fn open_delimiter(input: &str) -> IResult<&str, char> {
    let (rest, _) = multispace0(input)?;
    let (rest, c) = alt((char('{'), char('(')))(rest)?;
    let (rest, _) = multispace0(rest)?;
    Ok((rest, c))
}

fn close_delimiter(input: &str) -> IResult<&str, char> {
    let (rest, _) = multispace0(input)?;
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    let (rest, _) = multispace0(rest)?;
    alt((char('}'), char(')')))(rest)
}

fn parse_entry_body<'a>(
    input: &'a str,
    entry_type: &str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, BibtexEntry> {
    let (rest, _) = open_delimiter(input)?;
    let (rest, cite_key) = take_while1(|c: char| !c.is_whitespace() && !",{}()".contains(c))(rest)?;
    let (mut rest, _) = multispace0(rest)?;

    let mut fields = Vec::new();
    while let Some(after_comma) = rest.strip_prefix(',') {
        let (next, _) = multispace0(after_comma)?;
        if next.starts_with('}') || next.starts_with(')') {
            rest = next;
            break;
        }
        let (next, (key, value)) = parse_assignment(next, strings)?;
        fields.push((key.to_lowercase(), value));
        let (next, _) = multispace0(next)?;
        rest = next;
    }

    let (rest, _) = close_delimiter(rest)?;

    Ok((
        rest,
        BibtexEntry {
            entry_type: entry_type.to_lowercase(),
            cite_key: cite_key.to_string(),
            fields,
        },
    ))
}

/// `key = value`
fn parse_assignment<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:.+".contains(c))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, value) = parse_value(rest, strings)?;
    Ok((rest, (key.to_string(), value)))
}

/// A value: parts joined by `#`
fn parse_value<'a>(input: &'a str, strings: &HashMap<String, String>) -> IResult<&'a str, String> {
    let mut value = String::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;
        let (rest, part) = alt((
            map(braced_span, |s: &str| s[1..s.len() - 1].to_string()),
            quoted_value,
            map(take_while1(|c: char| c.is_ascii_digit()), |s: &str| s.to_string()),
            map(
                take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:.+".contains(c)),
                |name: &str| {
                    strings
                        .get(&name.to_lowercase())
                        .cloned()
                        .unwrap_or_else(|| name.to_string())
                },
            ),
        ))(rest)?;
        value.push_str(&part);

        let (rest, _) = multispace0(rest)?;
        match rest.strip_prefix('#') {
            Some(next) => remaining = next,
            None => return Ok((rest, value)),
        }
    }
}

/// `{...}` including the outer braces, respecting nesting
fn braced_span(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let bytes = input.as_bytes();
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 1,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..pos + 1]));
                }
            }
            _ => {}
        }
        pos += 1;
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

/// `"..."`, where quotes inside braces do not terminate
fn quoted_value(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('"')(input)?;
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' => pos += 1,
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b'"' if depth == 0 => return Ok((&rest[pos + 1..], rest[..pos].to_string())),
            _ => {}
        }
        pos += 1;
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::TakeUntil,
    )))
}

// ===== LaTeX decoding =====

fn combining_mark(accent: char) -> Option<char> {
    let mark = match accent {
        '"' => '\u{0308}',
        '\'' => '\u{0301}',
        '`' => '\u{0300}',
        '^' => '\u{0302}',
        '~' => '\u{0303}',
        '=' => '\u{0304}',
        '.' => '\u{0307}',
        'u' => '\u{0306}',
        'v' => '\u{030C}',
        'H' => '\u{030B}',
        'c' => '\u{0327}',
        'k' => '\u{0328}',
        'r' => '\u{030A}',
        'd' => '\u{0323}',
        'b' => '\u{0331}',
        _ => return None,
    };
    Some(mark)
}

/// Decode LaTeX markup into plain Unicode text.
///
/// Accents become combining marks composed with NFC; formatting commands are
/// dropped while their arguments are kept; braces are removed.
pub fn decode_latex(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                let next = chars[i + 1];
                if next.is_ascii_alphabetic() {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end].is_ascii_alphabetic() {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    i = end;

                    if name.len() == 1 {
                        if let Some(mark) = name.chars().next().and_then(combining_mark) {
                            let (base, next_i) = accent_target(&chars, i);
                            if let Some(base) = base {
                                out.push(base);
                                out.push(mark);
                            }
                            i = next_i;
                            continue;
                        }
                    }

                    if let Some(symbol) = LATEX_SYMBOLS.get(name.as_str()) {
                        out.push_str(symbol);
                        // `\ss{}` or `\ss ` terminators
                        if chars.get(i) == Some(&'{') && chars.get(i + 1) == Some(&'}') {
                            i += 2;
                        } else if chars.get(i) == Some(&' ') {
                            i += 1;
                        }
                    } else if chars.get(i) == Some(&' ') {
                        // unknown command (\textit, \emph, ...): keep its argument
                        i += 1;
                    }
                } else if let Some(mark) = combining_mark(next) {
                    let (base, next_i) = accent_target(&chars, i + 2);
                    if let Some(base) = base {
                        out.push(base);
                        out.push(mark);
                    }
                    i = next_i;
                } else {
                    match next {
                        '\\' => out.push(' '),
                        other => out.push(other),
                    }
                    i += 2;
                }
            }
            '{' | '}' => i += 1,
            '~' => {
                out.push(' ');
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                if chars.get(i + 2) == Some(&'-') {
                    out.push('—');
                    i += 3;
                } else {
                    out.push('–');
                    i += 2;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ").nfc().collect()
}

/// The character an accent applies to, starting at `i`: `x`, `{x}` or `{\i}`
fn accent_target(chars: &[char], mut i: usize) -> (Option<char>, usize) {
    while i < chars.len() && chars[i] == ' ' {
        i += 1;
    }
    match chars.get(i) {
        Some('{') => {
            let mut j = i + 1;
            let mut base = None;
            while j < chars.len() && chars[j] != '}' {
                if base.is_none() && chars[j] != '\\' {
                    base = Some(chars[j]);
                }
                j += 1;
            }
            (base, (j + 1).min(chars.len()))
        }
        Some('\\') => (chars.get(i + 1).copied(), (i + 2).min(chars.len())),
        Some(c) => (Some(*c), i + 1),
        None => (None, i),
    }
}

// ===== Conversion to CSL =====

/// Split on ` and ` at brace depth zero
fn split_names(value: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    let words = value.split_whitespace();

    for word in words {
        if depth == 0 && word.eq_ignore_ascii_case("and") && !current.is_empty() {
            names.push(std::mem::take(&mut current));
            continue;
        }
        for c in word.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        names.push(current);
    }
    names
}

/// Split on a delimiter at brace depth zero
fn split_top_level(value: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in value.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if c == delimiter && depth == 0 {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Parse one BibTeX name (`Last, First`, `First von Last` or `{Literal}`)
fn parse_name(raw: &str) -> CslName {
    let trimmed = raw.trim();
    let fully_braced = braced_span(trimmed)
        .map(|(rest, _)| rest.is_empty())
        .unwrap_or(false);
    if fully_braced {
        return CslName::literal(decode_latex(trimmed));
    }

    let parts = split_top_level(trimmed, ',');
    match parts.as_slice() {
        [family, given] | [family, _, given] => {
            let given = decode_latex(given);
            CslName::personal(decode_latex(family), Some(given))
        }
        _ => {
            let words = split_top_level(trimmed, ' ');
            let words: Vec<&str> = words.iter().map(String::as_str).filter(|w| !w.is_empty()).collect();
            if words.len() <= 1 {
                return CslName::personal(decode_latex(trimmed), None);
            }
            // "von" particles start the family name
            let family_start = words[..words.len() - 1]
                .iter()
                .position(|w| w.chars().next().map(|c| c.is_lowercase()).unwrap_or(false))
                .unwrap_or(words.len() - 1);
            let given = words[..family_start].join(" ");
            let family = words[family_start..].join(" ");
            CslName::personal(decode_latex(&family), Some(decode_latex(&given)))
        }
    }
}

fn parse_names(value: &str) -> Vec<CslName> {
    split_names(value).iter().map(|n| parse_name(n)).collect()
}

fn month_number(value: &str) -> Option<i32> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let prefix = value.chars().take(3).collect::<String>().to_lowercase();
    [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ]
    .iter()
    .position(|m| *m == prefix)
    .map(|i| i as i32 + 1)
}

/// Parse a BibLaTeX `date` field (`YYYY`, `YYYY-MM`, `YYYY-MM-DD`, ranges use the start)
fn parse_date_field(value: &str) -> Option<CslDate> {
    let start = value.split('/').next()?.trim();
    let parts: Vec<i32> = start
        .split('-')
        .map_while(|p| p.trim().parse::<i32>().ok())
        .collect();
    if parts.is_empty() {
        return Some(CslDate {
            literal: Some(value.to_string()),
            ..Default::default()
        });
    }
    Some(CslDate::from_parts(parts))
}

fn csl_type(entry_type: &str, entry: &BibtexEntry) -> &'static str {
    match entry_type {
        "article" => {
            if entry.field("journal").is_some() || entry.field("journaltitle").is_some() {
                "article-journal"
            } else {
                "article"
            }
        }
        "book" | "mvbook" => "book",
        "inbook" | "incollection" | "bookinbook" => "chapter",
        "inproceedings" | "conference" => "paper-conference",
        "proceedings" | "collection" => "book",
        "phdthesis" | "mastersthesis" | "thesis" => "thesis",
        "techreport" | "report" => "report",
        "manual" => "book",
        "online" | "electronic" | "www" => "webpage",
        "unpublished" => "manuscript",
        "patent" => "patent",
        "dataset" => "dataset",
        "software" => "software",
        _ => "document",
    }
}

/// Convert a BibTeX entry into a normalized source
pub fn entry_to_source(entry: &BibtexEntry, provider_key: &str) -> BibliographySource {
    let mut source = BibliographySource::new(entry.cite_key.clone(), provider_key);
    source.item_type = csl_type(&entry.entry_type, entry).to_string();

    let text = |name: &str| entry.field(name).map(decode_latex);

    source.title = text("title");
    if let Some(authors) = entry.field("author") {
        source.author = parse_names(authors);
    }
    if let Some(editors) = entry.field("editor") {
        source.editor = parse_names(editors);
    }

    source.issued = match entry.field("date") {
        Some(date) => parse_date_field(date),
        None => entry.field("year").and_then(|year| {
            let year: i32 = year.trim().parse().ok()?;
            let mut parts = vec![year];
            if let Some(month) = entry.field("month").and_then(month_number) {
                parts.push(month);
            }
            Some(CslDate::from_parts(parts))
        }),
    };

    source.container_title = text("journaltitle")
        .or_else(|| text("journal"))
        .or_else(|| text("booktitle"));
    source.publisher = text("publisher")
        .or_else(|| text("school"))
        .or_else(|| text("institution"));
    source.publisher_place = text("location").or_else(|| text("address"));
    source.volume = text("volume");
    source.issue = text("number").or_else(|| text("issue"));
    source.page = text("pages").map(|p| p.replace(['–', '—'], "-"));
    source.doi = entry.field("doi").map(|s| s.trim().to_string());
    source.url = entry.field("url").map(|s| s.trim().to_string());
    source.isbn = text("isbn");
    source.issn = text("issn");
    source.abstract_text = text("abstract");
    source.language = text("langid").or_else(|| text("language"));
    source.note = text("note");
    if let Some(keywords) = text("keywords") {
        source.other.insert("keyword".to_string(), keywords.into());
    }

    source
}
