//! Application contracts
//!
//! Every path, encoding and identifier template the orchestration relies on
//! lives here. When one of the applications changes a route or a page
//! layout, this is the one file to update.

use crosscheck_common::{Channel, EntityKind, EntityRef};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::extractor::{LinkQuery, PathTemplate, Pick};

static OWNER_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"owners/(\d+)").expect("valid owner href pattern"));

/// Body encoding of a create request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Form,
    Json,
}

/// How the identifier of a freshly created entity is recovered
#[derive(Debug, Clone)]
pub enum Identify {
    /// Straight from the create response
    Response(PathTemplate),
    /// Redirect back to the owner, then a link in the owner page
    OwnerPageLink {
        redirect: PathTemplate,
        link_name: &'static str,
        capture: &'static str,
    },
    /// The application exposes no id; the identifying field stands in
    NaturalKey {
        redirect: PathTemplate,
        field: &'static str,
    },
}

/// Create request for one (kind, channel) pair
#[derive(Debug, Clone)]
pub struct CreateContract {
    pub kind: EntityKind,
    pub channel: Channel,
    /// Relative path with `{ownerId}` / `{petId}` placeholders
    pub path: &'static str,
    pub encoding: Encoding,
    pub identify: Identify,
}

/// The create contract for `kind` on `channel`, if the application has one
pub fn create_contract(kind: EntityKind, channel: Channel) -> Option<CreateContract> {
    let (path, encoding, identify) = match (kind, channel) {
        (EntityKind::Owner, Channel::Form) => (
            "owners/new",
            Encoding::Form,
            Identify::Response(owner_redirect()),
        ),
        (EntityKind::Pet, Channel::Form) => (
            "owners/{ownerId}/pets/new",
            Encoding::Form,
            Identify::OwnerPageLink {
                redirect: owner_redirect(),
                link_name: "Add Visit",
                capture: r"pets/(\d+)/visits",
            },
        ),
        (EntityKind::Visit, Channel::Form) => (
            "owners/{ownerId}/pets/{petId}/visits/new",
            Encoding::Form,
            Identify::NaturalKey {
                redirect: owner_redirect(),
                field: "description",
            },
        ),
        (EntityKind::Author, Channel::Api) => ("api/Authors", Encoding::Json, Identify::Response(json_id())),
        (EntityKind::Book, Channel::Api) => ("api/Books", Encoding::Json, Identify::Response(json_id())),
        _ => return None,
    };

    Some(CreateContract {
        kind,
        channel,
        path,
        encoding,
        identify,
    })
}

/// Channels that can create `kind`
pub fn supported_channels(kind: EntityKind) -> Vec<Channel> {
    [Channel::Form, Channel::Api]
        .into_iter()
        .filter(|channel| create_contract(kind, *channel).is_some())
        .collect()
}

/// REST collection that holds `kind`, if any
pub fn api_collection(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Author => Some("Authors"),
        EntityKind::Book => Some("Books"),
        _ => None,
    }
}

/// Substitute `{ownerId}` and `{petId}` from the parent chain
pub fn fill_path(path: &str, parent: Option<&EntityRef>) -> String {
    let mut filled = path.to_string();
    if let Some(parent) = parent {
        if let Some(owner) = parent.ancestor(EntityKind::Owner) {
            filled = filled.replace("{ownerId}", owner.id().as_str());
        }
        if let Some(pet) = parent.ancestor(EntityKind::Pet) {
            filled = filled.replace("{petId}", pet.id().as_str());
        }
    }
    filled
}

/// Redirect target after any successful owner, pet or visit form
pub fn owner_redirect() -> PathTemplate {
    PathTemplate::redirect("owners/{id}")
}

/// Owner detail page path
pub fn owner_page(owner_id: &str) -> String {
    format!("owners/{}", owner_id)
}

/// First owner link in the search result listing
pub fn owner_list_link() -> PathTemplate {
    PathTemplate::Link {
        query: LinkQuery {
            name: None,
            within_row: None,
            within_table: Some(OWNERS_TABLE.to_string()),
            pick: Pick::First,
        },
        capture: OWNER_HREF.clone(),
    }
}

pub fn json_id() -> PathTemplate {
    PathTemplate::json_field("Id")
}

/// Id of the owner search results table
pub const OWNERS_TABLE: &str = "owners";

/// Text the owner search renders when nothing matched
pub const NOT_FOUND_TEXT: &str = "has not been found";

pub const VETS_JSON: &str = "vets.json";
pub const VETS_XML: &str = "vets.xml";
pub const CUSTOMERS_BY_COUNTRY: &str = "Customers/GetCustomerByCountry";

#[cfg(test)]
mod tests {
    use super::*;
    use crosscheck_common::EntityId;
    use std::collections::BTreeMap;

    fn chain() -> EntityRef {
        let owner = EntityRef::new(
            EntityKind::Owner,
            EntityId::new("42").unwrap(),
            None,
            BTreeMap::new(),
        )
        .unwrap();
        EntityRef::new(
            EntityKind::Pet,
            EntityId::new("7").unwrap(),
            Some(owner),
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_fill_path_from_parent_chain() {
        let pet = chain();
        assert_eq!(
            fill_path("owners/{ownerId}/pets/{petId}/visits/new", Some(&pet)),
            "owners/42/pets/7/visits/new"
        );
        assert_eq!(fill_path("owners/new", None), "owners/new");
    }

    #[test]
    fn test_channel_support() {
        assert_eq!(supported_channels(EntityKind::Owner), vec![Channel::Form]);
        assert_eq!(supported_channels(EntityKind::Book), vec![Channel::Api]);
        assert!(create_contract(EntityKind::Author, Channel::Form).is_none());
    }

    #[test]
    fn test_api_collections() {
        assert_eq!(api_collection(EntityKind::Author), Some("Authors"));
        assert_eq!(api_collection(EntityKind::Visit), None);
    }
}
