//! Markup scanning
//!
//! A small, regex-driven view over rendered pages: balanced elements by tag,
//! anchors with their accessible names, and table rows as records. It only
//! needs to understand the server-rendered pages of the applications under
//! test, not arbitrary HTML.

use std::collections::BTreeMap;

use crosscheck_common::Record;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));

static SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid space pattern"));

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .expect("valid attribute pattern")
});

static NUMERIC_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x?)([0-9A-Fa-f]+);").expect("valid entity pattern"));

/// A balanced element found in a document
#[derive(Debug, Clone, PartialEq)]
pub struct Element<'a> {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub outer: &'a str,
    pub inner: &'a str,
}

impl Element<'_> {
    pub fn text(&self) -> String {
        text_content(self.inner)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
}

/// A hyperlink and its accessible name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub name: String,
    pub href: Option<String>,
}

/// Outermost elements with one of `tags`, in document order
///
/// Nesting is tracked across all listed tags, so a table nested inside a
/// row stays inside that row's element. An element left open at the end of
/// the document runs to the end.
pub fn elements<'a>(doc: &'a str, tags: &[&str]) -> Vec<Element<'a>> {
    let names = tags
        .iter()
        .map(|tag| regex::escape(tag))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = match Regex::new(&format!(r"(?is)<(/?)({})\b([^>]*)>", names)) {
        Ok(pattern) => pattern,
        Err(_) => return Vec::new(),
    };

    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<(usize, usize, String, BTreeMap<String, String>)> = None;

    for caps in pattern.captures_iter(doc) {
        let (Some(whole), Some(slash), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let attr_src = caps.get(3).map(|m| m.as_str()).unwrap_or("");

        if slash.as_str().is_empty() {
            if is_self_closing(attr_src) {
                continue;
            }
            if depth == 0 {
                open = Some((
                    whole.start(),
                    whole.end(),
                    name.as_str().to_ascii_lowercase(),
                    attributes(attr_src),
                ));
            }
            depth += 1;
        } else if depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some((start, inner_start, tag, attrs)) = open.take() {
                    found.push(Element {
                        tag,
                        attrs,
                        outer: &doc[start..whole.end()],
                        inner: &doc[inner_start..whole.start()],
                    });
                }
            }
        }
    }

    if let Some((start, inner_start, tag, attrs)) = open {
        found.push(Element {
            tag,
            attrs,
            outer: &doc[start..],
            inner: &doc[inner_start..],
        });
    }

    found
}

/// A trailing `/` outside any attribute value, as in `<br/>`
///
/// `<a href=/owners/>` is not self-closing: the slash belongs to the
/// unquoted value.
fn is_self_closing(attr_src: &str) -> bool {
    ATTRIBUTE.replace_all(attr_src, "").trim_end().ends_with('/')
}

/// The element with `tag` whose id attribute equals `id`
pub fn find_by_id<'a>(doc: &'a str, tag: &str, id: &str) -> Option<Element<'a>> {
    let pattern = Regex::new(&format!(
        r#"(?is)<{}\b[^>]*\bid\s*=\s*["']?{}["'\s>/]"#,
        regex::escape(tag),
        regex::escape(id)
    ))
    .ok()?;
    let start = pattern.find(doc)?.start();
    elements(&doc[start..], &[tag]).into_iter().next()
}

/// Parse `name="value"` pairs; names are lowercased
pub fn attributes(src: &str) -> BTreeMap<String, String> {
    ATTRIBUTE
        .captures_iter(src)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

/// Visible text: tags stripped, entities decoded, whitespace collapsed
pub fn text_content(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    SPACE.replace_all(&decoded, " ").trim().to_string()
}

pub fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");

    let numeric = NUMERIC_ENTITY.replace_all(&named, |caps: &regex::Captures<'_>| {
        let radix = if caps[1].is_empty() { 10 } else { 16 };
        u32::from_str_radix(&caps[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    // Ampersand last so "&amp;lt;" stays "&lt;"
    numeric.replace("&amp;", "&")
}

/// All anchors in a fragment; `aria-label` wins over inner text
pub fn anchors(fragment: &str) -> Vec<Anchor> {
    elements(fragment, &["a"])
        .into_iter()
        .flat_map(|element| {
            // Anchors never nest; a stray nested one is still reported.
            let mut nested = anchors(element.inner);
            let name = element
                .attr("aria-label")
                .map(|label| SPACE.replace_all(label.trim(), " ").to_string())
                .unwrap_or_else(|| element.text());
            let mut out = vec![Anchor {
                name,
                href: element.attr("href").map(str::to_string),
            }];
            out.append(&mut nested);
            out
        })
        .collect()
}

/// Records for the rows of one table element's inner markup
///
/// A row made only of header cells names the columns of following rows.
/// A `th`/`td` pair row becomes a single-field record. Every record also
/// carries the row's collapsed `text`.
pub fn table_records(table_inner: &str) -> Vec<Record> {
    let mut headers: Vec<String> = Vec::new();
    let mut records = Vec::new();

    for row in elements(table_inner, &["tr"]) {
        let cells = elements(row.inner, &["th", "td"]);
        if cells.is_empty() {
            continue;
        }

        if cells.iter().all(|cell| cell.tag == "th") {
            headers = cells.iter().map(Element::text).collect();
            continue;
        }

        let mut record = Record::new();
        if cells.len() == 2 && cells[0].tag == "th" && cells[1].tag == "td" {
            record.insert(cells[0].text(), Value::from(cells[1].text()));
        } else {
            for (index, cell) in cells.iter().enumerate() {
                let key = headers
                    .get(index)
                    .filter(|header| !header.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("col{}", index));
                record.insert(key, Value::from(cell.text()));
            }
        }
        record.insert("text".to_string(), Value::from(row.text()));
        records.push(record);
    }

    records
}

/// Records for a whole rendered page
///
/// Field-pair rows (`<th>Name</th><td>..</td>`) across the page's tables
/// merge into one leading record, the way a detail view presents a single
/// entity. All other rows become one record each.
pub fn page_records(doc: &str) -> Vec<Record> {
    let mut detail = Record::new();
    let mut detail_text = Vec::new();
    let mut rows = Vec::new();

    for table in elements(doc, &["table"]) {
        for record in table_records(table.inner) {
            let is_pair = record.len() == 2 && !record.contains_key("col0");
            if is_pair {
                for (key, value) in &record {
                    if key == "text" {
                        if let Value::String(text) = value {
                            detail_text.push(text.clone());
                        }
                    } else {
                        detail.insert(key.clone(), value.clone());
                    }
                }
            } else {
                rows.push(record);
            }
        }
    }

    let mut records = Vec::new();
    if !detail.is_empty() {
        detail.insert("text".to_string(), Value::from(detail_text.join(" ")));
        records.push(detail);
    }
    records.extend(rows);
    records
}
