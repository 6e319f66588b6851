//! Precondition resolution: use what exists, synthesize what does not

mod common;

use common::{html, json, owner_list, owner_not_found, redirect, Apps};
use crosscheck_common::{Channel, EntityKind, ProvisioningSpec};
use crosscheck_e2e::error::{FallbackError, ProvisioningError};
use crosscheck_e2e::{Catalog, FallbackResolver, FixtureProvisioner, Lookup, Origin, Precondition};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::Mock;

fn davis() -> Precondition {
    Precondition {
        kind: EntityKind::Owner,
        lookup: Lookup::OwnerByLastName {
            last_name: "Davis".to_string(),
        },
        template: ProvisioningSpec::new(EntityKind::Owner)
            .with("firstName", "Betty")
            .with("address", "638 Cardinal Ave.")
            .with("city", "Sun Prairie")
            .with("telephone", "6085551749"),
        discriminator: "lastName".to_string(),
        channel: Channel::Form,
        parent: None,
    }
}

#[tokio::test]
async fn existing_owner_is_used_as_is() {
    let apps = Apps::start().await;
    common::mount_owner_search(
        &apps.pet_clinic,
        "Davis",
        html(200, owner_list(&[(2, "Betty Davis"), (4, "Harold Davis")])),
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(redirect("/owners/99"))
        .expect(0)
        .mount(&apps.pet_clinic)
        .await;

    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let resolution = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&davis())
        .await
        .unwrap();

    assert_eq!(resolution.origin, Origin::Existing);
    assert_eq!(resolution.entity.id().as_str(), "2");
    assert_eq!(resolution.entity.attribute("firstName"), Some("Betty"));
    assert_eq!(resolution.criterion, "Davis");
    assert_eq!(resolution.trace, vec!["seek", "found"]);
}

#[tokio::test]
async fn missing_owner_is_synthesized_with_a_unique_name() {
    let apps = Apps::start().await;
    common::mount_owner_search(&apps.pet_clinic, "Davis", html(200, owner_not_found())).await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .and(body_string_contains("lastName=Davis"))
        .and(body_string_contains("firstName=Betty"))
        .respond_with(redirect("/owners/77"))
        .expect(1)
        .mount(&apps.pet_clinic)
        .await;

    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let resolution = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&davis())
        .await
        .unwrap();

    assert_eq!(resolution.origin, Origin::Synthesized);
    assert_eq!(resolution.entity.id().as_str(), "77");
    assert!(resolution.criterion.starts_with("Davis"));
    assert_ne!(resolution.criterion, "Davis");
    assert_eq!(
        resolution.entity.attribute("lastName"),
        Some(resolution.criterion.as_str())
    );
    assert_eq!(resolution.trace, vec!["seek", "synthesize", "found"]);
}

#[tokio::test]
async fn failed_synthesis_is_fatal() {
    let apps = Apps::start().await;
    common::mount_owner_search(&apps.pet_clinic, "Davis", html(200, owner_not_found())).await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .respond_with(html(500, "<html>Something happened...</html>"))
        .expect(1)
        .mount(&apps.pet_clinic)
        .await;

    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let err = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&davis())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FallbackError::Synthesis(ProvisioningError::Rejected { status: 500, .. })
    ));
}

#[tokio::test]
async fn api_collection_lookup_filters_on_a_field() {
    let apps = Apps::start().await;
    Mock::given(method("GET"))
        .and(path("/api/Authors"))
        .respond_with(json(
            200,
            json!([{"Id": 1, "Name": "Isaac Asimov"}, {"Id": 2, "Name": "Frank Herbert"}]),
        ))
        .mount(&apps.book_store)
        .await;

    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let precondition = Precondition {
        kind: EntityKind::Author,
        lookup: Lookup::ApiCollection {
            collection: "Authors".to_string(),
            field: Some("Name".to_string()),
            value: Some("Frank Herbert".to_string()),
        },
        template: ProvisioningSpec::new(EntityKind::Author),
        discriminator: "Name".to_string(),
        channel: Channel::Api,
        parent: None,
    };

    let resolution = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&precondition)
        .await
        .unwrap();
    assert_eq!(resolution.origin, Origin::Existing);
    assert_eq!(resolution.entity.id().as_str(), "2");
    assert_eq!(resolution.entity.attribute("Name"), Some("Frank Herbert"));
}

#[tokio::test]
async fn empty_collection_synthesizes_through_the_api() {
    let apps = Apps::start().await;
    Mock::given(method("GET"))
        .and(path("/api/Authors"))
        .respond_with(json(200, json!([])))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/Authors"))
        .respond_with(json(201, json!({"Id": 12, "Name": "AutoAuthor_1"})))
        .expect(1)
        .mount(&apps.book_store)
        .await;

    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let precondition = Precondition {
        kind: EntityKind::Author,
        lookup: Lookup::ApiCollection {
            collection: "Authors".to_string(),
            field: None,
            value: None,
        },
        template: ProvisioningSpec::new(EntityKind::Author).with("Name", "AutoAuthor_"),
        discriminator: "Name".to_string(),
        channel: Channel::Api,
        parent: None,
    };

    let resolution = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&precondition)
        .await
        .unwrap();
    assert_eq!(resolution.origin, Origin::Synthesized);
    assert_eq!(resolution.entity.id().as_str(), "12");
    assert!(resolution.criterion.starts_with("AutoAuthor_"));
}

#[tokio::test]
async fn lookup_must_fit_the_kind() {
    let apps = Apps::start().await;
    let catalog = Catalog::new(apps.endpoints());
    let provisioner = FixtureProvisioner::new(apps.endpoints());
    let precondition = Precondition {
        kind: EntityKind::Book,
        ..davis()
    };

    let err = FallbackResolver::new(&catalog, &provisioner)
        .resolve(&precondition)
        .await
        .unwrap_err();
    assert!(matches!(err, FallbackError::UnsupportedLookup { .. }));
}
