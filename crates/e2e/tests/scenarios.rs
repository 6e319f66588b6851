//! Whole scenarios through the runner, plus the bundled scenario files

mod common;

use std::path::Path;

use common::{html, json, owner_form_with_errors, owner_page, redirect, Apps, Pet};
use crosscheck_e2e::{FailureKind, HarnessConfig, Scenario, ScenarioRunner};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

const OWNER_AND_PET: &str = r#"
name: owner-and-pet
tags: [pet_clinic]
consistency:
  timeout_ms: 1000
  poll_interval_ms: 20
steps:
  - action: provision
    alias: owner
    kind: owner
    fields:
      firstName: John
      lastName: Doe
      address: 123 Main St
      city: Metropolis
      telephone: "1234567890"
  - action: provision
    alias: pet
    kind: pet
    parent: owner
    fields:
      name: Rex
      birthDate: "2020-01-01"
      type: dog
  - action: verify
    target: pet
    read:
      via: owner_detail
    expect:
      text: dog
    cardinality: exactly_one
  - action: expect_rejection
    kind: owner
    fields:
      firstName: John
      lastName: ""
    message_contains: empty
  - action: log
    message: "pet ${pet.id} of owner ${pet.parent.id}"
"#;

const LOST_AUTHOR: &str = r#"
name: lost-author
tags: [book_store]
consistency:
  timeout_ms: 200
  poll_interval_ms: 20
steps:
  - action: provision
    alias: author
    kind: author
    fields:
      Name: Frank Herbert
  - action: verify
    target: author
    read:
      via: api_item
  - action: log
    message: never reached
"#;

async fn mount_pet_clinic(apps: &Apps) {
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .and(body_string_contains("lastName=Doe"))
        .respond_with(redirect("/owners/42"))
        .with_priority(1)
        .mount(&apps.pet_clinic)
        .await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .respond_with(html(200, owner_form_with_errors(&["must not be empty"])))
        .mount(&apps.pet_clinic)
        .await;
    Mock::given(method("POST"))
        .and(path("/owners/42/pets/new"))
        .respond_with(redirect("/owners/42"))
        .mount(&apps.pet_clinic)
        .await;
    common::mount_owner_page(
        &apps.pet_clinic,
        42,
        owner_page(42, "John", "Doe", &[Pet { id: 7, name: "Rex", visits: &[] }]),
    )
    .await;
}

async fn mount_book_store(apps: &Apps) {
    Mock::given(method("POST"))
        .and(path("/api/Authors"))
        .respond_with(json(201, json!({"Id": 3, "Name": "Frank Herbert"})))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&apps.book_store)
        .await;
}

fn runner_for(apps: &Apps) -> ScenarioRunner {
    ScenarioRunner::new(HarnessConfig {
        pet_clinic_url: apps.pet_clinic.uri(),
        book_store_url: apps.book_store.uri(),
        ..Default::default()
    })
}

#[tokio::test]
async fn owner_and_pet_scenario_passes() {
    let apps = Apps::start().await;
    mount_pet_clinic(&apps).await;

    let scenario = Scenario::from_yaml(OWNER_AND_PET).unwrap();
    let result = runner_for(&apps).run_scenario(&scenario).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.steps.len(), 5);
    assert_eq!(result.steps[4].detail.as_deref(), Some("pet 7 of owner 42"));
    assert!(result.steps[3]
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("must not be empty"));
}

#[tokio::test]
async fn failing_step_ends_only_its_scenario() {
    let apps = Apps::start().await;
    mount_pet_clinic(&apps).await;
    mount_book_store(&apps).await;

    let scenarios = vec![
        Scenario::from_yaml(OWNER_AND_PET).unwrap(),
        Scenario::from_yaml(LOST_AUTHOR).unwrap(),
    ];
    let suite = runner_for(&apps).run_all(&scenarios).await;

    assert_eq!(suite.total, 2);
    assert_eq!(suite.passed, 1);
    assert_eq!(suite.failed, 1);

    let lost = &suite.results[1];
    assert!(!lost.success);
    assert_eq!(lost.steps.len(), 2);
    let failed = lost.failed_step().unwrap();
    assert_eq!(failed.action, "verify");
    assert_eq!(failed.failure, Some(FailureKind::Timeout));
    assert_ne!(suite.results[0].run_id, lost.run_id);
}

#[tokio::test]
async fn accepted_invalid_input_is_reported() {
    let apps = Apps::start().await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .respond_with(redirect("/owners/43"))
        .mount(&apps.pet_clinic)
        .await;

    let scenario = Scenario::from_yaml(
        r#"
name: lenient-owner-form
steps:
  - action: expect_rejection
    kind: owner
    fields:
      firstName: John
      lastName: ""
"#,
    )
    .unwrap();
    let result = runner_for(&apps).run_scenario(&scenario).await;

    assert!(!result.success);
    assert_eq!(
        result.steps[0].failure,
        Some(FailureKind::UnexpectedAcceptance)
    );
}

#[test]
fn bundled_scenarios_parse() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
    let scenarios = Scenario::load_all(&dir).unwrap();
    assert!(scenarios.len() >= 6);

    let mut names: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), scenarios.len(), "scenario names must be unique");

    assert!(!Scenario::filter_by_tag(&scenarios, "pet_clinic").is_empty());
    assert!(!Scenario::filter_by_tag(&scenarios, "book_store").is_empty());
}
