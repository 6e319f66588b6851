//! Fixture provisioning
//!
//! Creates entities through the channel a scenario asks for and hands back an
//! immutable `EntityRef`. The provisioner keeps no state of its own; the
//! reference it returns is the only trace of the write on this side.

use std::collections::BTreeMap;

use crosscheck_common::{
    value_text, Channel, EntityId, EntityKind, EntityRef, ProvisioningSpec, ResponseEnvelope,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contracts::{self, CreateContract, Encoding, Identify};
use crate::error::{ExtractionError, ProvisioningError};
use crate::extractor::{self, LinkQuery, PathTemplate};
use crate::markup;
use crate::transport::{ChannelRequest, Endpoints, Transport};

static INLINE_HELP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<(?:span|div|p|small)\b[^>]*\bclass\s*=\s*["'][^"']*\b(?:help-inline|invalid-feedback|field-validation-error|text-danger)\b[^"']*["'][^>]*>(.*?)</(?:span|div|p|small)>"#,
    )
    .expect("valid inline help pattern")
});

/// Messages the applications render next to rejected fields
const KNOWN_PHRASES: &[&str] = &[
    "may not be empty",
    "must not be empty",
    "numeric value out of bounds",
    "is required",
];

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    /// The deployment answered 405; nothing changed
    Unsupported,
}

pub struct FixtureProvisioner {
    endpoints: Endpoints,
}

impl FixtureProvisioner {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }

    fn transport(&self, kind: EntityKind) -> &dyn Transport {
        self.endpoints.for_domain(kind.domain()).as_ref()
    }

    /// Create one entity and return its reference
    ///
    /// Parent linkage and channel support are checked before anything is
    /// sent. A response that is not the channel's success status is a
    /// `Rejected` error and no extraction is attempted.
    pub async fn provision(
        &self,
        kind: EntityKind,
        spec: &ProvisioningSpec,
        parent: Option<&EntityRef>,
        channel: Channel,
    ) -> Result<EntityRef, ProvisioningError> {
        if spec.kind != kind {
            return Err(ProvisioningError::SpecKindMismatch {
                expected: kind,
                actual: spec.kind,
            });
        }
        kind.check_parent(parent)?;

        let contract = contracts::create_contract(kind, channel)
            .ok_or(ProvisioningError::UnsupportedChannel { kind, channel })?;

        let missing = spec.missing_fields();
        if !missing.is_empty() {
            debug!("Sending incomplete {} spec, missing {:?}", kind, missing);
        }

        let request = create_request(&contract, spec, parent);
        debug!("Provisioning {} via {} at {}", kind, channel, request.path);
        let envelope = self.transport(kind).send(request).await?;

        let accepted = match channel {
            Channel::Form => envelope.is_redirect(),
            Channel::Api => envelope.is_success(),
        };
        if !accepted {
            debug!("{} create rejected with status {}", kind, envelope.status());
            return Err(ProvisioningError::Rejected {
                channel,
                status: envelope.status(),
                body: envelope.body_text(),
            });
        }

        let id = self.identify(&contract, &envelope, spec, parent).await?;
        let attributes = echoed_attributes(spec.attributes(), &envelope);
        let entity = EntityRef::new(kind, id, parent.cloned(), attributes)?;

        info!("Provisioned {} via {}", entity, channel);
        Ok(entity)
    }

    async fn identify(
        &self,
        contract: &CreateContract,
        envelope: &ResponseEnvelope,
        spec: &ProvisioningSpec,
        parent: Option<&EntityRef>,
    ) -> Result<EntityId, ProvisioningError> {
        match &contract.identify {
            Identify::Response(template) => Ok(extractor::extract_id(envelope, template)?),

            Identify::OwnerPageLink {
                redirect,
                link_name,
                capture,
            } => {
                let owner_id = expect_owner_redirect(envelope, redirect, parent)?;
                let name = spec
                    .field_text(contract.kind.identifying_field())
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(|| ExtractionError::ElementNotFound {
                        what: format!("{} in {} spec", contract.kind.identifying_field(), contract.kind),
                    })?;

                let page = self
                    .transport(contract.kind)
                    .send(ChannelRequest::get(contracts::owner_page(owner_id.as_str())))
                    .await?;
                let template = PathTemplate::link(LinkQuery::named(*link_name).within_row(name), capture)?;
                Ok(extractor::extract_id(&page, &template)?)
            }

            Identify::NaturalKey { redirect, field } => {
                expect_owner_redirect(envelope, redirect, parent)?;
                Ok(EntityId::new(spec.field_text(field).unwrap_or_default())?)
            }
        }
    }

    /// Replace an entity's fields through the REST channel
    pub async fn update(
        &self,
        entity: &EntityRef,
        spec: &ProvisioningSpec,
    ) -> Result<EntityRef, ProvisioningError> {
        let kind = entity.kind();
        if spec.kind != kind {
            return Err(ProvisioningError::SpecKindMismatch {
                expected: kind,
                actual: spec.kind,
            });
        }
        let collection = contracts::api_collection(kind).ok_or(ProvisioningError::UnsupportedChannel {
            kind,
            channel: Channel::Api,
        })?;

        let mut body = spec.json_body();
        if let Value::Object(fields) = &mut body {
            fields.insert("Id".to_string(), entity.id().to_json());
            if let Some(author) = entity.parent() {
                fields
                    .entry("AuthorId")
                    .or_insert_with(|| author.id().to_json());
            }
        }

        let path = format!("api/{}/{}", collection, entity.id());
        let envelope = self
            .transport(kind)
            .send(ChannelRequest::put_json(path, body))
            .await?;
        if !envelope.is_success() {
            return Err(ProvisioningError::Rejected {
                channel: Channel::Api,
                status: envelope.status(),
                body: envelope.body_text(),
            });
        }

        let mut attributes = entity.attributes().clone();
        attributes.extend(spec.attributes());
        let attributes = echoed_attributes(attributes, &envelope);
        let updated = EntityRef::new(kind, entity.id().clone(), entity.parent().cloned(), attributes)?;

        info!("Updated {}", updated);
        Ok(updated)
    }

    /// Delete an entity through the REST channel
    ///
    /// Deletion support depends on the deployment, so a 405 is reported as
    /// `Unsupported` rather than as a failure.
    pub async fn delete(&self, entity: &EntityRef) -> Result<DeletionOutcome, ProvisioningError> {
        let kind = entity.kind();
        let collection = contracts::api_collection(kind).ok_or(ProvisioningError::UnsupportedChannel {
            kind,
            channel: Channel::Api,
        })?;

        let path = format!("api/{}/{}", collection, entity.id());
        let envelope = self.transport(kind).send(ChannelRequest::delete(path)).await?;

        match envelope.status() {
            200..=299 => {
                info!("Deleted {}", entity);
                Ok(DeletionOutcome::Deleted)
            }
            405 => {
                warn!("Deletion of {} is not supported by this deployment", entity);
                Ok(DeletionOutcome::Unsupported)
            }
            status => Err(ProvisioningError::Rejected {
                channel: Channel::Api,
                status,
                body: envelope.body_text(),
            }),
        }
    }
}

fn create_request(
    contract: &CreateContract,
    spec: &ProvisioningSpec,
    parent: Option<&EntityRef>,
) -> ChannelRequest {
    let path = contracts::fill_path(contract.path, parent);
    match contract.encoding {
        Encoding::Form => ChannelRequest::post_form(path, spec.form_pairs()),
        Encoding::Json => {
            let mut body = spec.json_body();
            if let (Value::Object(fields), Some(author)) = (&mut body, parent) {
                if author.kind() == EntityKind::Author {
                    fields
                        .entry("AuthorId")
                        .or_insert_with(|| author.id().to_json());
                }
            }
            ChannelRequest::post_json(path, body)
        }
    }
}

/// The form channel redirects back to the owner the entity was added to
fn expect_owner_redirect(
    envelope: &ResponseEnvelope,
    redirect: &PathTemplate,
    parent: Option<&EntityRef>,
) -> Result<EntityId, ProvisioningError> {
    let owner_id = extractor::extract_id(envelope, redirect)?;
    if let Some(owner) = parent.and_then(|p| p.ancestor(EntityKind::Owner)) {
        if owner.id() != &owner_id {
            return Err(ExtractionError::PatternMismatch {
                expected: contracts::owner_page(owner.id().as_str()),
                found: contracts::owner_page(owner_id.as_str()),
            }
            .into());
        }
    }
    Ok(owner_id)
}

/// Spec fields overlaid with the scalar fields a JSON response echoed
fn echoed_attributes(
    mut attributes: BTreeMap<String, String>,
    envelope: &ResponseEnvelope,
) -> BTreeMap<String, String> {
    if let ResponseEnvelope::Json {
        body: Value::Object(fields),
        ..
    } = envelope
    {
        for (name, value) in fields {
            if !value.is_object() && !value.is_array() && !value.is_null() {
                attributes.insert(name.clone(), value_text(value));
            }
        }
    }
    attributes
}

/// Validation messages in a rejected response body
///
/// Understands the REST channel's `errors` map and the inline help text of
/// re-rendered forms. Anything else (an error page, say) yields nothing.
pub fn validation_messages(body: &str) -> Vec<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        return json_errors(&json);
    }

    let mut messages: Vec<String> = INLINE_HELP
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|inner| markup::text_content(inner.as_str()))
        .filter(|text| !text.is_empty())
        .collect();
    messages.dedup();

    if messages.is_empty() {
        let lower = body.to_ascii_lowercase();
        messages = KNOWN_PHRASES
            .iter()
            .filter(|phrase| lower.contains(*phrase))
            .map(|phrase| phrase.to_string())
            .collect();
    }

    messages
}

/// Messages for a REST validation rejection
///
/// The `errors` map wins, then a `title` or `message` field, then an excerpt
/// of the body itself. Never empty.
pub fn api_messages(status: u16, body: &str) -> Vec<String> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let messages = json_errors(&json);
        if !messages.is_empty() {
            return messages;
        }
        if let Some(summary) = ["title", "message", "Message"]
            .iter()
            .filter_map(|key| json.get(*key).and_then(Value::as_str))
            .find(|text| !text.trim().is_empty())
        {
            return vec![summary.trim().to_string()];
        }
    }

    let body = body.trim();
    if body.is_empty() || body == "null" {
        vec![format!("rejected with status {}", status)]
    } else {
        vec![crate::error::excerpt(body)]
    }
}

fn json_errors(json: &Value) -> Vec<String> {
    let errors = match json.get("errors") {
        Some(errors) => errors,
        None => return Vec::new(),
    };

    let mut messages = Vec::new();
    match errors {
        Value::Object(fields) => {
            for (field, value) in fields {
                match value {
                    Value::Array(items) => messages.extend(items.iter().map(value_text)),
                    Value::String(text) => messages.push(text.clone()),
                    other => messages.push(format!("{}: {}", field, other)),
                }
            }
        }
        Value::Array(items) => messages.extend(items.iter().map(value_text)),
        Value::String(text) => messages.push(text.clone()),
        _ => {}
    }
    messages.retain(|message| !message.trim().is_empty());
    messages
}
