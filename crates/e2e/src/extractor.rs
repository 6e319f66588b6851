//! Identifier extraction
//!
//! Derives the identifier the application assigned to a new entity from the
//! response that created it: a redirect location, a link in rendered markup
//! or a field of a JSON body. Extraction is pure. When the expected element
//! is missing, malformed or ambiguous it fails; it never guesses.

use std::collections::BTreeMap;

use crosscheck_common::{EntityId, EntityKind, EntityRef, ResponseEnvelope};
use regex::Regex;
use serde_json::Value;

use crate::error::ExtractionError;
use crate::markup;

/// How to choose between several matching links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Exactly one candidate, anything else is ambiguous
    Only,
    /// The first candidate in document order
    First,
}

/// Structural query for one hyperlink in a rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkQuery {
    /// Accessible name of the link; `None` accepts any link whose href
    /// satisfies the capture
    pub name: Option<String>,
    /// Only look inside the outermost table row containing this text
    pub within_row: Option<String>,
    /// Only look inside the table with this id
    pub within_table: Option<String>,
    pub pick: Pick,
}

impl LinkQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            within_row: None,
            within_table: None,
            pick: Pick::Only,
        }
    }

    pub fn within_row(mut self, text: impl Into<String>) -> Self {
        self.within_row = Some(text.into());
        self
    }

    pub fn within_table(mut self, id: impl Into<String>) -> Self {
        self.within_table = Some(id.into());
        self
    }

    pub fn pick(mut self, pick: Pick) -> Self {
        self.pick = pick;
        self
    }
}

/// One explicit template per known application contract
#[derive(Debug, Clone)]
pub enum PathTemplate {
    /// Location path such as `owners/{id}`; the trailing placeholder is captured
    Redirect { pattern: String },
    /// A link in the page, its href matched against `capture` (group 1)
    Link { query: LinkQuery, capture: Regex },
    /// A named field of a JSON object body
    JsonField { field: String },
}

impl PathTemplate {
    pub fn redirect(pattern: impl Into<String>) -> Self {
        PathTemplate::Redirect {
            pattern: pattern.into(),
        }
    }

    pub fn link(query: LinkQuery, capture: &str) -> Result<Self, ExtractionError> {
        let capture = Regex::new(capture).map_err(|e| ExtractionError::PatternMismatch {
            expected: "valid capture pattern".to_string(),
            found: e.to_string(),
        })?;
        Ok(PathTemplate::Link { query, capture })
    }

    pub fn json_field(field: impl Into<String>) -> Self {
        PathTemplate::JsonField {
            field: field.into(),
        }
    }

    fn expected_shape(&self) -> &'static str {
        match self {
            PathTemplate::Redirect { .. } => "redirect",
            PathTemplate::Link { .. } => "html",
            PathTemplate::JsonField { .. } => "json",
        }
    }
}

/// Extract the bare identifier from an envelope
pub fn extract_id(
    envelope: &ResponseEnvelope,
    template: &PathTemplate,
) -> Result<EntityId, ExtractionError> {
    let raw = match (envelope, template) {
        (ResponseEnvelope::Redirect { location, .. }, PathTemplate::Redirect { pattern }) => {
            from_location(location, pattern)?
        }
        (ResponseEnvelope::Html { document, .. }, PathTemplate::Link { query, capture }) => {
            from_link(document, query, capture)?
        }
        (ResponseEnvelope::Json { body, .. }, PathTemplate::JsonField { field }) => {
            from_field(body, field)?
        }
        (envelope, template) => {
            return Err(ExtractionError::PatternMismatch {
                expected: format!("{} response", template.expected_shape()),
                found: format!("{} response (status {})", envelope.shape(), envelope.status()),
            })
        }
    };

    EntityId::new(raw).map_err(|_| ExtractionError::PatternMismatch {
        expected: "non-empty identifier".to_string(),
        found: "empty string".to_string(),
    })
}

/// Extract an identifier and wrap it in a reference to the new entity
pub fn extract(
    envelope: &ResponseEnvelope,
    template: &PathTemplate,
    kind: EntityKind,
    parent: Option<EntityRef>,
    attributes: BTreeMap<String, String>,
) -> Result<EntityRef, ExtractionError> {
    let id = extract_id(envelope, template)?;
    let actual = parent.as_ref().map(EntityRef::kind);
    EntityRef::new(kind, id, parent, attributes).map_err(|_| ExtractionError::PatternMismatch {
        expected: format!(
            "{} parent for {}",
            kind.parent_kind().map(|k| k.as_str()).unwrap_or("no"),
            kind
        ),
        found: actual.map(|k| k.as_str()).unwrap_or("none").to_string(),
    })
}

/// Compile a redirect template into an anchored location regex
pub fn redirect_regex(pattern: &str) -> Result<Regex, ExtractionError> {
    let placeholder = Regex::new(r"\{[^}/]+\}").map_err(|e| ExtractionError::PatternMismatch {
        expected: "valid placeholder pattern".to_string(),
        found: e.to_string(),
    })?;

    let trimmed = pattern.trim_matches('/');
    let holes: Vec<_> = placeholder.find_iter(trimmed).collect();
    let mut source = String::from(r"(?:^|/)");
    let mut cursor = 0;
    for (index, hole) in holes.iter().enumerate() {
        source.push_str(&regex::escape(&trimmed[cursor..hole.start()]));
        if index + 1 == holes.len() {
            source.push_str(r"([^/?#;]+)");
        } else {
            source.push_str(r"[^/?#;]+");
        }
        cursor = hole.end();
    }
    source.push_str(&regex::escape(&trimmed[cursor..]));
    // Servlet containers may append ;jsessionid to the last segment
    source.push_str(r"(?:;[^/?#]*)?/?(?:[?#].*)?$");

    Regex::new(&source).map_err(|e| ExtractionError::PatternMismatch {
        expected: pattern.to_string(),
        found: e.to_string(),
    })
}

fn from_location(location: &str, pattern: &str) -> Result<String, ExtractionError> {
    if location.trim().is_empty() {
        return Err(ExtractionError::ElementNotFound {
            what: "redirect location".to_string(),
        });
    }

    let regex = redirect_regex(pattern)?;
    let path = crate::transport::location_path(location);
    regex
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractionError::PatternMismatch {
            expected: pattern.to_string(),
            found: path.clone(),
        })
}

fn from_link(document: &str, query: &LinkQuery, capture: &Regex) -> Result<String, ExtractionError> {
    let scope = match &query.within_table {
        Some(id) => markup::find_by_id(document, "table", id)
            .ok_or_else(|| ExtractionError::ElementNotFound {
                what: format!("table #{}", id),
            })?
            .inner,
        None => document,
    };

    let scope = match &query.within_row {
        Some(text) => {
            let rows: Vec<_> = markup::elements(scope, &["tr"])
                .into_iter()
                .filter(|row| row.text().contains(text.as_str()))
                .collect();
            match rows.len() {
                0 => {
                    return Err(ExtractionError::ElementNotFound {
                        what: format!("row containing '{}'", text),
                    })
                }
                1 => rows[0].inner,
                count if query.pick == Pick::Only => {
                    return Err(ExtractionError::AmbiguousMatch {
                        what: format!("row containing '{}'", text),
                        count,
                    })
                }
                _ => rows[0].inner,
            }
        }
        None => scope,
    };

    let candidates: Vec<markup::Anchor> = markup::anchors(scope)
        .into_iter()
        .filter(|anchor| match &query.name {
            Some(name) => anchor.name == *name,
            None => anchor
                .href
                .as_deref()
                .map(|href| capture.is_match(href))
                .unwrap_or(false),
        })
        .collect();

    let what = match &query.name {
        Some(name) => format!("link '{}'", name),
        None => format!("link matching {}", capture.as_str()),
    };

    let chosen = match (candidates.len(), query.pick) {
        (0, _) => return Err(ExtractionError::ElementNotFound { what }),
        (1, _) | (_, Pick::First) => &candidates[0],
        (count, Pick::Only) => return Err(ExtractionError::AmbiguousMatch { what, count }),
    };

    let href = chosen
        .href
        .as_deref()
        .ok_or_else(|| ExtractionError::PatternMismatch {
            expected: capture.as_str().to_string(),
            found: format!("{} without href", what),
        })?;

    capture
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ExtractionError::PatternMismatch {
            expected: capture.as_str().to_string(),
            found: href.to_string(),
        })
}

fn from_field(body: &Value, field: &str) -> Result<String, ExtractionError> {
    let object = body.as_object().ok_or_else(|| ExtractionError::PatternMismatch {
        expected: "JSON object".to_string(),
        found: json_kind(body).to_string(),
    })?;

    let value = match object.get(field) {
        Some(value) => value,
        None => {
            let matches: Vec<&Value> = object
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(field))
                .map(|(_, value)| value)
                .collect();
            match matches.len() {
                0 => {
                    return Err(ExtractionError::ElementNotFound {
                        what: format!("field '{}'", field),
                    })
                }
                1 => matches[0],
                count => {
                    return Err(ExtractionError::AmbiguousMatch {
                        what: format!("field '{}'", field),
                        count,
                    })
                }
            }
        }
    };

    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        other => Err(ExtractionError::PatternMismatch {
            expected: format!("number or non-empty string in '{}'", field),
            found: json_kind(other).to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
