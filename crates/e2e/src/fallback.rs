//! Precondition fallback
//!
//! A scenario that needs "an owner named X" cannot know whether the shared
//! environment already has one. The resolver looks first and, when the
//! lookup comes back empty, provisions a uniquely named substitute.
//!
//! ```text
//!   Seek ──(non-empty)──▶ Found
//!     │                     ▲
//!  (empty)                  │
//!     ▼                     │
//!   Synthesize ──(created)──┘
//! ```
//!
//! A failed synthesis is fatal and never retried.

use std::collections::BTreeMap;

use crosscheck_common::{
    token, value_text, Channel, EntityKind, EntityRef, ProvisioningSpec, ResponseEnvelope,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::catalog::Catalog;
use crate::contracts;
use crate::error::{CatalogError, FallbackError};
use crate::extractor;
use crate::provisioner::FixtureProvisioner;

/// How to look for an existing entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Lookup {
    /// Owner search; the first listed owner wins
    OwnerByLastName { last_name: String },
    /// A REST collection, optionally filtered on one field
    ApiCollection {
        collection: String,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        value: Option<String>,
    },
}

impl Lookup {
    fn name(&self) -> &'static str {
        match self {
            Lookup::OwnerByLastName { .. } => "owner_by_last_name",
            Lookup::ApiCollection { .. } => "api_collection",
        }
    }

    fn criterion(&self) -> Option<&str> {
        match self {
            Lookup::OwnerByLastName { last_name } => Some(last_name.as_str()),
            Lookup::ApiCollection { value, .. } => value.as_deref(),
        }
    }

    fn supports(&self, kind: EntityKind) -> bool {
        match self {
            Lookup::OwnerByLastName { .. } => kind == EntityKind::Owner,
            Lookup::ApiCollection { .. } => contracts::api_collection(kind).is_some(),
        }
    }
}

/// "An entity matching this lookup exists", plus how to make one if not
#[derive(Debug, Clone)]
pub struct Precondition {
    pub kind: EntityKind,
    pub lookup: Lookup,
    /// Spec for the substitute
    pub template: ProvisioningSpec,
    /// Field of `template` that receives the uniqueness token
    pub discriminator: String,
    pub channel: Channel,
    pub parent: Option<EntityRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolverState {
    Seek,
    Found(EntityRef),
    Synthesize,
}

impl ResolverState {
    pub fn name(&self) -> &'static str {
        match self {
            ResolverState::Seek => "seek",
            ResolverState::Found(_) => "found",
            ResolverState::Synthesize => "synthesize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Existing,
    Synthesized,
}

/// Outcome of resolving one precondition
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entity: EntityRef,
    pub origin: Origin,
    /// Criterion value later steps should use
    pub criterion: String,
    /// States visited, in order
    pub trace: Vec<&'static str>,
}

pub struct FallbackResolver<'a> {
    catalog: &'a Catalog,
    provisioner: &'a FixtureProvisioner,
}

impl<'a> FallbackResolver<'a> {
    pub fn new(catalog: &'a Catalog, provisioner: &'a FixtureProvisioner) -> Self {
        Self {
            catalog,
            provisioner,
        }
    }

    pub async fn resolve(&self, precondition: &Precondition) -> Result<Resolution, FallbackError> {
        if !precondition.lookup.supports(precondition.kind) {
            return Err(FallbackError::UnsupportedLookup {
                kind: precondition.kind,
                lookup: precondition.lookup.name().to_string(),
            });
        }

        let mut criterion = precondition
            .lookup
            .criterion()
            .map(str::to_string)
            .unwrap_or_default();
        let mut origin = Origin::Existing;
        let mut trace = Vec::new();
        let mut state = ResolverState::Seek;

        loop {
            trace.push(state.name());
            state = match state {
                ResolverState::Seek => match self.seek(precondition).await? {
                    Some(entity) => ResolverState::Found(entity),
                    None => {
                        info!(
                            "No {} matches {} '{}', synthesizing a substitute",
                            precondition.kind,
                            precondition.lookup.name(),
                            criterion
                        );
                        ResolverState::Synthesize
                    }
                },

                ResolverState::Synthesize => {
                    let (spec, value) = discriminated(precondition, &criterion);
                    let entity = self
                        .provisioner
                        .provision(
                            precondition.kind,
                            &spec,
                            precondition.parent.as_ref(),
                            precondition.channel,
                        )
                        .await
                        .map_err(FallbackError::Synthesis)?;
                    criterion = value;
                    origin = Origin::Synthesized;
                    ResolverState::Found(entity)
                }

                ResolverState::Found(entity) => {
                    info!("Precondition resolved to {} ({:?})", entity, origin);
                    return Ok(Resolution {
                        entity,
                        origin,
                        criterion,
                        trace,
                    });
                }
            };
        }
    }

    async fn seek(&self, precondition: &Precondition) -> Result<Option<EntityRef>, FallbackError> {
        match &precondition.lookup {
            Lookup::OwnerByLastName { last_name } => {
                let search = self.catalog.search_owners(last_name).await?;
                Ok(search.first().cloned())
            }
            Lookup::ApiCollection {
                collection,
                field,
                value,
            } => {
                let records = self.catalog.list_api(collection).await?;
                let found = records.into_iter().find(|record| match (field, value) {
                    (Some(field), Some(value)) => record
                        .iter()
                        .any(|(key, v)| key.eq_ignore_ascii_case(field) && value_text(v) == *value),
                    _ => true,
                });

                match found {
                    None => Ok(None),
                    Some(record) => {
                        let attributes: BTreeMap<String, String> = record
                            .iter()
                            .filter(|(_, v)| !v.is_object() && !v.is_array())
                            .map(|(key, v)| (key.clone(), value_text(v)))
                            .collect();
                        let envelope = ResponseEnvelope::Json {
                            status: 200,
                            body: Value::Object(record),
                        };
                        let id = extractor::extract_id(&envelope, &contracts::json_id())
                            .map_err(CatalogError::from)?;
                        let entity = EntityRef::new(precondition.kind, id, None, attributes)
                            .map_err(|e| CatalogError::Malformed(e.to_string()))?;
                        Ok(Some(entity))
                    }
                }
            }
        }
    }
}

/// The template with a fresh token in its discriminator field
fn discriminated(precondition: &Precondition, criterion: &str) -> (ProvisioningSpec, String) {
    let base = precondition
        .template
        .field_text(&precondition.discriminator)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| {
            if criterion.is_empty() {
                precondition.kind.to_string()
            } else {
                criterion.to_string()
            }
        });
    let value = token::tokenized(&base);
    let spec = precondition
        .template
        .clone()
        .with(precondition.discriminator.clone(), value.clone());
    (spec, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner_precondition(template: ProvisioningSpec) -> Precondition {
        Precondition {
            kind: EntityKind::Owner,
            lookup: Lookup::OwnerByLastName {
                last_name: "Davis".to_string(),
            },
            template,
            discriminator: "lastName".to_string(),
            channel: Channel::Form,
            parent: None,
        }
    }

    #[test]
    fn test_discriminator_gets_token() {
        let pre = owner_precondition(ProvisioningSpec::new(EntityKind::Owner).with("firstName", "Betty"));
        let (spec, value) = discriminated(&pre, "Davis");
        assert!(value.starts_with("Davis"));
        assert!(value.len() > "Davis".len());
        assert_eq!(spec.field_text("lastName").as_deref(), Some(value.as_str()));
        assert_eq!(spec.field_text("firstName").as_deref(), Some("Betty"));
    }

    #[test]
    fn test_template_value_wins_over_criterion() {
        let pre = owner_precondition(ProvisioningSpec::new(EntityKind::Owner).with("lastName", "Auto-"));
        let (_, value) = discriminated(&pre, "Davis");
        assert!(value.starts_with("Auto-"));
    }

    #[test]
    fn test_lookup_support() {
        let lookup = Lookup::OwnerByLastName {
            last_name: "x".to_string(),
        };
        assert!(lookup.supports(EntityKind::Owner));
        assert!(!lookup.supports(EntityKind::Book));

        let lookup: Lookup = serde_yaml::from_str("by: api_collection\ncollection: Books").unwrap();
        assert!(lookup.supports(EntityKind::Book));
        assert!(!lookup.supports(EntityKind::Pet));
    }
}
