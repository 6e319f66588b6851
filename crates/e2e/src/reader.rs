//! Read channels
//!
//! Alternate observation paths for entities written through another
//! channel. Every read normalizes its response into `Record`s: JSON objects
//! as they come, rendered rows keyed by column header plus a `text` key.

use std::fmt;

use crosscheck_common::{value_text, Domain, EntityKind, EntityRef, Record, ResponseEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::contracts;
use crate::error::{ReadError, TransportError};
use crate::markup;
use crate::transport::{ChannelRequest, Endpoints, Transport};

/// Redirect hops a read will follow before giving up
const MAX_REDIRECTS: usize = 5;

/// Where to look for an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum ReadChannel {
    /// Owner page of the entity's owner
    OwnerDetail,
    /// Owner search by last name
    OwnerSearch { last_name: String },
    /// `api/{collection}/{id}`; the collection defaults to the entity's
    ApiItem {
        #[serde(default)]
        collection: Option<String>,
    },
    /// `api/{collection}`
    ApiCollection {
        #[serde(default)]
        collection: Option<String>,
    },
    /// Any rendered page, optionally narrowed to one table
    Page {
        domain: Domain,
        path: String,
        #[serde(default)]
        table_id: Option<String>,
    },
}

impl fmt::Display for ReadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadChannel::OwnerDetail => write!(f, "owner_detail"),
            ReadChannel::OwnerSearch { last_name } => write!(f, "owner_search({})", last_name),
            ReadChannel::ApiItem { collection } => {
                write!(f, "api_item({})", collection.as_deref().unwrap_or("*"))
            }
            ReadChannel::ApiCollection { collection } => {
                write!(f, "api_collection({})", collection.as_deref().unwrap_or("*"))
            }
            ReadChannel::Page { domain, path, .. } => write!(f, "page({}:{})", domain, path),
        }
    }
}

/// Issues reads and normalizes what comes back
pub struct Reader {
    endpoints: Endpoints,
}

impl Reader {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    /// All records the channel currently shows; not-found reads are empty
    pub async fn read(&self, channel: &ReadChannel, entity: &EntityRef) -> Result<Vec<Record>, ReadError> {
        let unsupported = || ReadError::Unsupported {
            channel: channel.to_string(),
            kind: entity.kind(),
        };

        match channel {
            ReadChannel::OwnerDetail => {
                let owner = entity.ancestor(EntityKind::Owner).ok_or_else(unsupported)?;
                let envelope = self
                    .fetch(Domain::PetClinic, ChannelRequest::get(contracts::owner_page(owner.id().as_str())))
                    .await?;
                html_records(&envelope, None)
            }

            ReadChannel::OwnerSearch { last_name } => {
                if entity.kind().domain() != Domain::PetClinic {
                    return Err(unsupported());
                }
                let envelope = self
                    .fetch(
                        Domain::PetClinic,
                        ChannelRequest::get("owners").with_query("lastName", last_name.clone()),
                    )
                    .await?;
                search_records(&envelope)
            }

            ReadChannel::ApiItem { collection } => {
                let collection = collection
                    .as_deref()
                    .or_else(|| contracts::api_collection(entity.kind()))
                    .ok_or_else(unsupported)?;
                let path = format!("api/{}/{}", collection, entity.id());
                let envelope = self.fetch(Domain::BookStore, ChannelRequest::get(path)).await?;
                api_records(&envelope)
            }

            ReadChannel::ApiCollection { collection } => {
                let collection = collection
                    .as_deref()
                    .or_else(|| contracts::api_collection(entity.kind()))
                    .ok_or_else(unsupported)?;
                let path = format!("api/{}", collection);
                let envelope = self.fetch(Domain::BookStore, ChannelRequest::get(path)).await?;
                api_records(&envelope)
            }

            ReadChannel::Page {
                domain,
                path,
                table_id,
            } => {
                let envelope = self.fetch(*domain, ChannelRequest::get(path.clone())).await?;
                match envelope {
                    ResponseEnvelope::Json { .. } => api_records(&envelope),
                    _ => html_records(&envelope, table_id.as_deref()),
                }
            }
        }
    }

    /// GET that follows redirects, as a browser would
    async fn fetch(&self, domain: Domain, request: ChannelRequest) -> Result<ResponseEnvelope, ReadError> {
        let transport: &dyn Transport = self.endpoints.for_domain(domain).as_ref();
        let origin = request.path.clone();
        let mut envelope = transport.send(request).await?;

        for _ in 0..MAX_REDIRECTS {
            match &envelope {
                ResponseEnvelope::Redirect { location, .. } => {
                    debug!("Following redirect {} -> {}", origin, location);
                    envelope = transport.send(ChannelRequest::get(location.clone())).await?;
                }
                _ => return Ok(envelope),
            }
        }

        if envelope.is_redirect() {
            return Err(TransportError::RedirectLoop(origin).into());
        }
        Ok(envelope)
    }
}

/// Records of the given entity among `records`
///
/// A record with an `id` key is the entity when that id equals the
/// reference's. Any other record is when one of its cells holds the
/// reference's identifying value as whole words, so `Doe-1` never locates a
/// row for `Doe-10`.
pub fn locate<'a>(entity: &EntityRef, records: &'a [Record]) -> Vec<&'a Record> {
    records
        .iter()
        .filter(|record| match id_value(record) {
            Some(id) => value_text(id) == entity.id().as_str(),
            None => entity
                .identifying_value()
                .map(|value| holds_value(record, value))
                .unwrap_or(false),
        })
        .collect()
}

fn holds_value(record: &Record, value: &str) -> bool {
    record
        .values()
        .filter(|cell| !cell.is_object() && !cell.is_array())
        .any(|cell| contains_words(&value_text(cell), value))
}

/// `needle`'s words appear contiguously in `haystack`
fn contains_words(haystack: &str, needle: &str) -> bool {
    let needle: Vec<&str> = needle.split_whitespace().collect();
    if needle.is_empty() {
        return false;
    }
    let words: Vec<&str> = haystack.split_whitespace().collect();
    words.windows(needle.len()).any(|window| window == needle.as_slice())
}

/// The `text` of a rendered row, or all scalar values of a JSON record
pub fn record_text(record: &Record) -> String {
    if let Some(Value::String(text)) = record.get("text") {
        return text.clone();
    }
    record
        .values()
        .filter(|value| !value.is_object() && !value.is_array())
        .map(value_text)
        .collect::<Vec<_>>()
        .join(" ")
}

fn id_value(record: &Record) -> Option<&Value> {
    record
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("id"))
        .map(|(_, value)| value)
}

fn unexpected(envelope: &ResponseEnvelope) -> ReadError {
    ReadError::Unexpected {
        status: envelope.status(),
        shape: envelope.shape(),
        excerpt: envelope.excerpt(200),
    }
}

fn html_records(envelope: &ResponseEnvelope, table_id: Option<&str>) -> Result<Vec<Record>, ReadError> {
    match envelope {
        ResponseEnvelope::Html { status: 404, .. } => Ok(Vec::new()),
        ResponseEnvelope::Html { status: 200, document } => Ok(match table_id {
            Some(id) => markup::find_by_id(document, "table", id)
                .map(|table| markup::table_records(table.inner))
                .unwrap_or_default(),
            None => markup::page_records(document),
        }),
        other => Err(unexpected(other)),
    }
}

fn search_records(envelope: &ResponseEnvelope) -> Result<Vec<Record>, ReadError> {
    match envelope {
        ResponseEnvelope::Html { status: 200, document } => {
            if document.contains(contracts::NOT_FOUND_TEXT) {
                return Ok(Vec::new());
            }
            // A single hit lands on the owner page instead of the list
            Ok(match markup::find_by_id(document, "table", contracts::OWNERS_TABLE) {
                Some(table) => markup::table_records(table.inner),
                None => markup::page_records(document),
            })
        }
        other => Err(unexpected(other)),
    }
}

fn api_records(envelope: &ResponseEnvelope) -> Result<Vec<Record>, ReadError> {
    match envelope {
        ResponseEnvelope::Json { status: 404, .. } | ResponseEnvelope::Html { status: 404, .. } => {
            Ok(Vec::new())
        }
        ResponseEnvelope::Json { status, body } if (200..300).contains(status) => Ok(json_records(body)),
        other => Err(unexpected(other)),
    }
}

/// Objects of a JSON body: an array, a wrapped array or a single object
pub fn json_records(body: &Value) -> Vec<Record> {
    match body {
        Value::Array(items) => items.iter().filter_map(|item| item.as_object().cloned()).collect(),
        Value::Object(object) if id_value(object).is_none() => {
            let wrapped: Vec<&Vec<Value>> = object.values().filter_map(Value::as_array).collect();
            match wrapped.as_slice() {
                [items] => items.iter().filter_map(|item| item.as_object().cloned()).collect(),
                _ => vec![object.clone()],
            }
        }
        Value::Object(object) => vec![object.clone()],
        _ => Vec::new(),
    }
}
