//! Core types for crosscheck

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Kind of domain entity a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Owner,
    Pet,
    Visit,
    Author,
    Book,
}

/// Application under test that owns an entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    PetClinic,
    BookStore,
}

/// Access path used to write or read the system under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Form submission answered by a redirect (or a re-rendered form)
    #[default]
    Form,
    /// JSON REST call
    Api,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Form => write!(f, "form"),
            Channel::Api => write!(f, "api"),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::PetClinic => write!(f, "pet_clinic"),
            Domain::BookStore => write!(f, "book_store"),
        }
    }
}

/// How an entity kind relates to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRule {
    /// Top-level entity, must not carry a parent
    None,
    /// Always linked to a parent of this kind
    Required(EntityKind),
    /// Linked to a parent of this kind, or explicitly unlinked
    Optional(EntityKind),
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Owner,
        EntityKind::Pet,
        EntityKind::Visit,
        EntityKind::Author,
        EntityKind::Book,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Owner => "owner",
            EntityKind::Pet => "pet",
            EntityKind::Visit => "visit",
            EntityKind::Author => "author",
            EntityKind::Book => "book",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            EntityKind::Owner | EntityKind::Pet | EntityKind::Visit => Domain::PetClinic,
            EntityKind::Author | EntityKind::Book => Domain::BookStore,
        }
    }

    pub fn parent_rule(&self) -> ParentRule {
        match self {
            EntityKind::Owner | EntityKind::Author => ParentRule::None,
            EntityKind::Pet => ParentRule::Required(EntityKind::Owner),
            EntityKind::Visit => ParentRule::Required(EntityKind::Pet),
            EntityKind::Book => ParentRule::Optional(EntityKind::Author),
        }
    }

    /// Expected parent kind, if any
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self.parent_rule() {
            ParentRule::None => None,
            ParentRule::Required(kind) | ParentRule::Optional(kind) => Some(kind),
        }
    }

    /// Fields the application requires when creating this kind
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Owner => &["firstName", "lastName", "address", "city", "telephone"],
            EntityKind::Pet => &["name", "birthDate", "type"],
            EntityKind::Visit => &["date", "description"],
            EntityKind::Author => &["Name"],
            EntityKind::Book => &["Title", "Genre", "Year", "Price"],
        }
    }

    /// Field that carries the uniqueness token for this kind
    pub fn identifying_field(&self) -> &'static str {
        match self {
            EntityKind::Owner => "lastName",
            EntityKind::Pet => "name",
            EntityKind::Visit => "description",
            EntityKind::Author => "Name",
            EntityKind::Book => "Title",
        }
    }

    /// Validate a parent reference against this kind's parent rule
    pub fn check_parent(&self, parent: Option<&EntityRef>) -> Result<()> {
        let actual = parent.map(EntityRef::kind);
        let ok = match (self.parent_rule(), actual) {
            (ParentRule::None, None) => true,
            (ParentRule::Required(expected), Some(actual)) => expected == actual,
            (ParentRule::Optional(_), None) => true,
            (ParentRule::Optional(expected), Some(actual)) => expected == actual,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(Error::InvalidParent {
                kind: *self,
                expected: self.parent_kind(),
                actual,
            })
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownKind(s.to_string()))
    }
}

/// Opaque, non-empty identifier assigned by the system under test
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(Error::EmptyId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// JSON form of the id: numeric ids stay numbers
    pub fn to_json(&self) -> Value {
        match self.0.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(self.0.clone()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable reference to an entity created in the system under test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    kind: EntityKind,
    id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent: Option<Box<EntityRef>>,
    attributes: BTreeMap<String, String>,
}

impl EntityRef {
    /// Build a reference, enforcing the parent linkage of `kind`
    pub fn new(
        kind: EntityKind,
        id: EntityId,
        parent: Option<EntityRef>,
        attributes: BTreeMap<String, String>,
    ) -> Result<Self> {
        kind.check_parent(parent.as_ref())?;
        Ok(Self {
            kind,
            id,
            parent: parent.map(Box::new),
            attributes,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn parent(&self) -> Option<&EntityRef> {
        self.parent.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Value of the field that carries this entity's uniqueness token
    pub fn identifying_value(&self) -> Option<&str> {
        self.attribute(self.kind.identifying_field())
    }

    /// Walk up the parent chain (starting at self) to the first ref of `kind`
    pub fn ancestor(&self, kind: EntityKind) -> Option<&EntityRef> {
        let mut current = Some(self);
        while let Some(entity) = current {
            if entity.kind == kind {
                return Some(entity);
            }
            current = entity.parent();
        }
        None
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)?;
        if let Some(parent) = self.parent() {
            write!(f, " (of {})", parent)?;
        }
        Ok(())
    }
}

/// Field values for creating one entity kind
///
/// An incomplete spec is legal: it is how negative scenarios exercise
/// the application's rejection path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningSpec {
    pub kind: EntityKind,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ProvisioningSpec {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn without(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field rendered as the text a form would submit
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(value_text)
    }

    /// Required fields that are absent or blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        self.kind
            .required_fields()
            .iter()
            .copied()
            .filter(|name| {
                self.field_text(name)
                    .map(|text| text.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Fields as url-encodable pairs, in field-name order
    pub fn form_pairs(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value_text(value)))
            .collect()
    }

    /// Fields as a JSON object body
    pub fn json_body(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Fields as echoed string attributes
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value_text(value)))
            .collect()
    }
}

/// Render a JSON value as plain text (strings unquoted, null empty)
pub fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
