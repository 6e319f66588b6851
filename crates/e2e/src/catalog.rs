//! Catalog reads
//!
//! Listings, searches and reference data that scenarios and precondition
//! lookups consult without targeting one known entity.

use std::collections::BTreeMap;

use crosscheck_common::{value_text, Domain, EntityId, EntityKind, EntityRef, Record, ResponseEnvelope};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::contracts;
use crate::error::CatalogError;
use crate::extractor;
use crate::markup;
use crate::reader;
use crate::transport::{ChannelRequest, Endpoints};

static VET_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"<vetList\b").expect("valid vet entry pattern"));

/// Outcome of an owner search by last name
#[derive(Debug, Clone, PartialEq)]
pub enum OwnerSearch {
    /// Exactly one owner; the application redirected straight to it
    Single(EntityRef),
    /// A result list; `first` is the first row
    Many { first: EntityRef, rows: usize },
    /// The well-formed "has not been found" answer
    NotFound,
}

impl OwnerSearch {
    pub fn count(&self) -> usize {
        match self {
            OwnerSearch::Single(_) => 1,
            OwnerSearch::Many { rows, .. } => *rows,
            OwnerSearch::NotFound => 0,
        }
    }

    pub fn first(&self) -> Option<&EntityRef> {
        match self {
            OwnerSearch::Single(owner) | OwnerSearch::Many { first: owner, .. } => Some(owner),
            OwnerSearch::NotFound => None,
        }
    }
}

/// A listing whose size can be compared before and after an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "of", rename_all = "snake_case")]
pub enum Listing {
    /// Owner search; an empty name lists every owner
    Owners {
        #[serde(default)]
        last_name: String,
    },
    /// A REST collection such as `Books`
    Api { collection: String },
}

/// Veterinarian as listed by `vets.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vet {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub specialties: Vec<Specialty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialty {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

/// `vets.json` is either a bare array or wrapped in `vetList`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VetListing {
    Bare(Vec<Vet>),
    Wrapped {
        #[serde(rename = "vetList")]
        vet_list: Vec<Vet>,
    },
}

impl VetListing {
    pub fn into_vets(self) -> Vec<Vet> {
        match self {
            VetListing::Bare(vets) | VetListing::Wrapped { vet_list: vets } => vets,
        }
    }
}

/// One row of the customers-by-country aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryAggregate {
    #[serde(rename = "CountryName", alias = "countryName")]
    pub country_name: String,
    #[serde(alias = "Value")]
    pub value: f64,
}

pub struct Catalog {
    endpoints: Endpoints,
}

impl Catalog {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    async fn get(&self, domain: Domain, request: ChannelRequest) -> Result<ResponseEnvelope, CatalogError> {
        Ok(self
            .endpoints
            .for_domain(domain)
            .send(request)
            .await?)
    }

    /// Search owners by last name (prefix match on the application side)
    pub async fn search_owners(&self, last_name: &str) -> Result<OwnerSearch, CatalogError> {
        let envelope = self
            .get(
                Domain::PetClinic,
                ChannelRequest::get("owners").with_query("lastName", last_name),
            )
            .await?;

        let outcome = match &envelope {
            ResponseEnvelope::Redirect { .. } => {
                let id = extractor::extract_id(&envelope, &contracts::owner_redirect())?;
                let attributes = self.owner_details(&id, last_name).await?;
                OwnerSearch::Single(owner_ref(id, attributes)?)
            }
            ResponseEnvelope::Html { status: 200, document } => {
                if document.contains(contracts::NOT_FOUND_TEXT) {
                    OwnerSearch::NotFound
                } else {
                    let table = markup::find_by_id(document, "table", contracts::OWNERS_TABLE)
                        .ok_or_else(|| {
                            CatalogError::Malformed(
                                "owner search shows neither results nor a not-found message".to_string(),
                            )
                        })?;
                    let rows = markup::table_records(table.inner);
                    match rows.first() {
                        None => OwnerSearch::NotFound,
                        Some(row) => {
                            let id = extractor::extract_id(&envelope, &contracts::owner_list_link())?;
                            let first = owner_ref(id, listing_attributes(row, last_name))?;
                            OwnerSearch::Many {
                                first,
                                rows: rows.len(),
                            }
                        }
                    }
                }
            }
            other => return Err(unexpected(other)),
        };

        debug!("Owner search '{}': {} result(s)", last_name, outcome.count());
        Ok(outcome)
    }

    /// Attributes shown on an owner's page, which a single search hit
    /// redirects to
    async fn owner_details(&self, id: &EntityId, searched: &str) -> Result<BTreeMap<String, String>, CatalogError> {
        let page = self
            .get(Domain::PetClinic, ChannelRequest::get(contracts::owner_page(id.as_str())))
            .await?;
        match &page {
            ResponseEnvelope::Html { status: 200, document } => {
                let detail = markup::page_records(document)
                    .into_iter()
                    .next()
                    .filter(|record| record.contains_key("Name"))
                    .ok_or_else(|| {
                        CatalogError::Malformed(format!("owner page {} shows no owner information", id))
                    })?;
                Ok(listing_attributes(&detail, searched))
            }
            other => Err(unexpected(other)),
        }
    }

    /// All records of a REST collection
    pub async fn list_api(&self, collection: &str) -> Result<Vec<Record>, CatalogError> {
        let envelope = self
            .get(Domain::BookStore, ChannelRequest::get(format!("api/{}", collection)))
            .await?;
        match &envelope {
            ResponseEnvelope::Json { status, body } if (200..300).contains(status) => {
                Ok(reader::json_records(body))
            }
            other => Err(unexpected(other)),
        }
    }

    /// Records of `kind` in its REST collection
    pub async fn list(&self, kind: EntityKind) -> Result<Vec<Record>, CatalogError> {
        let collection = contracts::api_collection(kind)
            .ok_or_else(|| CatalogError::Malformed(format!("{} has no REST collection", kind)))?;
        self.list_api(collection).await
    }

    /// Current size of a listing
    pub async fn count(&self, listing: &Listing) -> Result<usize, CatalogError> {
        match listing {
            Listing::Owners { last_name } => Ok(self.search_owners(last_name).await?.count()),
            Listing::Api { collection } => Ok(self.list_api(collection).await?.len()),
        }
    }

    pub async fn vets_json(&self) -> Result<Vec<Vet>, CatalogError> {
        let envelope = self
            .get(Domain::PetClinic, ChannelRequest::get(contracts::VETS_JSON))
            .await?;
        match envelope {
            ResponseEnvelope::Json { status: 200, body } => {
                let listing: VetListing = serde_json::from_value(body)
                    .map_err(|e| CatalogError::Malformed(format!("vet listing: {}", e)))?;
                Ok(listing.into_vets())
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Number of vets in the XML listing
    pub async fn vets_xml(&self) -> Result<usize, CatalogError> {
        let envelope = self
            .get(Domain::PetClinic, ChannelRequest::get(contracts::VETS_XML))
            .await?;
        match &envelope {
            ResponseEnvelope::Html { status: 200, document } => {
                if !document.contains("<vets") {
                    return Err(CatalogError::Malformed("vet XML lacks a <vets> root".to_string()));
                }
                Ok(VET_ENTRY.find_iter(document).count())
            }
            other => Err(unexpected(other)),
        }
    }

    /// Aggregates for one country; an unmatched country is an empty list
    pub async fn customers_by_country(&self, country: &str) -> Result<Vec<CountryAggregate>, CatalogError> {
        let envelope = self
            .get(
                Domain::BookStore,
                ChannelRequest::get(contracts::CUSTOMERS_BY_COUNTRY).with_query("country", country),
            )
            .await?;
        match envelope {
            ResponseEnvelope::Json { status: 200, body } => match body {
                Value::Null => Ok(Vec::new()),
                body => serde_json::from_value(body)
                    .map_err(|e| CatalogError::Malformed(format!("country aggregates: {}", e))),
            },
            other => Err(unexpected(&other)),
        }
    }
}

fn owner_ref(
    id: EntityId,
    attributes: BTreeMap<String, String>,
) -> Result<EntityRef, CatalogError> {
    EntityRef::new(EntityKind::Owner, id, None, attributes)
        .map_err(|e| CatalogError::Malformed(e.to_string()))
}

/// Owner attributes from a search result row (`Name` is "first last")
fn listing_attributes(row: &Record, searched: &str) -> BTreeMap<String, String> {
    let mut attributes: BTreeMap<String, String> = row
        .iter()
        .filter(|(key, _)| key.as_str() != "text")
        .map(|(key, value)| (key.clone(), value_text(value)))
        .collect();

    let name = attributes.get("Name").cloned().unwrap_or_default();
    let last = match name.rsplit_once(' ') {
        Some((first, last)) => {
            attributes.insert("firstName".to_string(), first.to_string());
            last.to_string()
        }
        None if !name.is_empty() => name.clone(),
        None => searched.to_string(),
    };
    attributes.insert("lastName".to_string(), last);
    attributes
}

fn unexpected(envelope: &ResponseEnvelope) -> CatalogError {
    CatalogError::Unexpected {
        status: envelope.status(),
        shape: envelope.shape(),
        excerpt: envelope.excerpt(200),
    }
}
