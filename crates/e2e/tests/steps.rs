//! Each step kind through the runner, against stand-in applications

mod common;

use common::{html, json, owner_list, owner_not_found, owner_page, redirect, Apps};
use crosscheck_e2e::{FailureKind, HarnessConfig, Scenario, ScenarioResult, ScenarioRunner};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

async fn run(apps: &Apps, yaml: &str) -> ScenarioResult {
    let scenario = Scenario::from_yaml(yaml).unwrap();
    ScenarioRunner::new(HarnessConfig {
        pet_clinic_url: apps.pet_clinic.uri(),
        book_store_url: apps.book_store.uri(),
        ..Default::default()
    })
    .run_scenario(&scenario)
    .await
}

fn detail(result: &ScenarioResult, step: usize) -> &str {
    result.steps[step].detail.as_deref().unwrap_or_default()
}

async fn mount_author(apps: &Apps, id: u32, name: &str) {
    Mock::given(method("POST"))
        .and(path("/api/Authors"))
        .respond_with(json(201, json!({"Id": id, "Name": name})))
        .mount(&apps.book_store)
        .await;
}

const DOOMED_AUTHOR: &str = r#"
name: doomed-author
consistency:
  timeout_ms: 200
  poll_interval_ms: 20
steps:
  - action: provision
    alias: author
    kind: author
    fields:
      Name: Doomed-1
  - action: delete
    target: author
    listing:
      via: api_collection
"#;

#[tokio::test]
async fn verify_fields_must_equal_exactly() {
    let apps = Apps::start().await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .respond_with(redirect("/owners/42"))
        .mount(&apps.pet_clinic)
        .await;
    common::mount_owner_page(&apps.pet_clinic, 42, owner_page(42, "Johnny", "Doe-1", &[])).await;

    let result = run(
        &apps,
        r#"
name: exact-fields
consistency:
  timeout_ms: 200
  poll_interval_ms: 20
steps:
  - action: provision
    alias: owner
    kind: owner
    fields:
      firstName: Johnny
      lastName: Doe-1
      address: 123 Main St
      city: Metropolis
      telephone: "1234567890"
  - action: verify
    target: owner
    read:
      via: owner_detail
    expect:
      Name: Johnny Doe-1
      City: Metropolis
      text: Main St
  - action: verify
    target: owner
    read:
      via: owner_detail
    expect:
      Name: ohn
      City: Metro
"#,
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.steps.len(), 3);
    assert!(result.steps[1].success, "{:?}", result.steps[1].error);
    assert_eq!(result.steps[2].failure, Some(FailureKind::Mismatch));
}

#[tokio::test]
async fn deleted_author_is_gone_from_item_and_listing() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Doomed-1").await;
    Mock::given(method("DELETE"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors"))
        .respond_with(json(200, json!([{"Id": 1, "Name": "Isaac Asimov"}])))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, DOOMED_AUTHOR).await;

    assert!(result.success, "{:?}", result.error);
    assert!(detail(&result, 1).contains("no longer retrievable"));
}

#[tokio::test]
async fn deleted_author_still_listed_is_a_mismatch() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Doomed-1").await;
    Mock::given(method("DELETE"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors"))
        .respond_with(json(200, json!([{"Id": 3, "Name": "Doomed-1"}])))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, DOOMED_AUTHOR).await;

    assert!(!result.success);
    let failed = result.failed_step().unwrap();
    assert_eq!(failed.action, "delete");
    assert_eq!(failed.failure, Some(FailureKind::Mismatch));
}

#[tokio::test]
async fn unsupported_delete_leaves_author_retrievable() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Doomed-1").await;
    Mock::given(method("DELETE"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(json(200, json!({"Id": 3, "Name": "Doomed-1"})))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, DOOMED_AUTHOR).await;

    assert!(result.success, "{:?}", result.error);
    assert!(detail(&result, 1).contains("unsupported"));
}

#[tokio::test]
async fn unsupported_delete_of_a_vanished_author_times_out() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Doomed-1").await;
    Mock::given(method("DELETE"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, DOOMED_AUTHOR).await;

    assert_eq!(result.failed_step().and_then(|s| s.failure), Some(FailureKind::Timeout));
}

const RENAME_AUTHOR: &str = r#"
name: rename-author
consistency:
  timeout_ms: 200
  poll_interval_ms: 20
steps:
  - action: provision
    alias: author
    kind: author
    fields:
      Name: Frank
  - action: update
    target: author
    fields:
      Name: Frank Herbert
  - action: log
    message: "now ${author.Name}"
"#;

#[tokio::test]
async fn update_is_confirmed_and_rebinds_the_alias() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Frank").await;
    Mock::given(method("PUT"))
        .and(path("/api/Authors/3"))
        .and(body_string_contains("Frank Herbert"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(json(200, json!({"Id": 3, "Name": "Frank Herbert"})))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, RENAME_AUTHOR).await;

    assert!(result.success, "{:?}", result.error);
    assert!(detail(&result, 1).contains("confirmed"));
    assert_eq!(detail(&result, 2), "now Frank Herbert");
}

#[tokio::test]
async fn update_that_never_lands_is_a_mismatch() {
    let apps = Apps::start().await;
    mount_author(&apps, 3, "Frank").await;
    Mock::given(method("PUT"))
        .and(path("/api/Authors/3"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Authors/3"))
        .respond_with(json(200, json!({"Id": 3, "Name": "Frank"})))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, RENAME_AUTHOR).await;

    let failed = result.failed_step().unwrap();
    assert_eq!(failed.action, "update");
    assert_eq!(failed.failure, Some(FailureKind::Mismatch));
}

const RESOLVE_DAVIS: &str = r#"
name: resolve-davis
steps:
  - action: resolve
    alias: davis
    kind: owner
    lookup:
      by: owner_by_last_name
      last_name: Davis
    template:
      firstName: Betty
      address: 638 Cardinal Ave.
      city: Sun Prairie
      telephone: "6085551749"
    bind_criterion: davis_name
  - action: log
    message: "${davis_name} is owner ${davis.id}"
"#;

#[tokio::test]
async fn resolve_uses_an_existing_owner() {
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

    let result = run(&apps, RESOLVE_DAVIS).await;

    assert!(result.success, "{:?}", result.error);
    assert!(detail(&result, 0).contains("Existing"));
    assert!(detail(&result, 0).contains("seek -> found"));
    assert_eq!(detail(&result, 1), "Davis is owner 2");
}

#[tokio::test]
async fn resolve_synthesizes_a_missing_owner() {
    let apps = Apps::start().await;
    common::mount_owner_search(&apps.pet_clinic, "Davis", html(200, owner_not_found())).await;
    Mock::given(method("POST"))
        .and(path("/owners/new"))
        .and(body_string_contains("lastName=Davis"))
        .respond_with(redirect("/owners/77"))
        .expect(1)
        .mount(&apps.pet_clinic)
        .await;

    let result = run(&apps, RESOLVE_DAVIS).await;

    assert!(result.success, "{:?}", result.error);
    assert!(detail(&result, 0).contains("Synthesized"));
    assert!(detail(&result, 0).contains("seek -> synthesize -> found"));
    let log = detail(&result, 1);
    assert!(log.starts_with("Davis"));
    assert!(log.ends_with("is owner 77"));
    assert_ne!(log, "Davis is owner 77");
}

#[tokio::test]
async fn search_owners_checks_the_expected_outcome() {
    let apps = Apps::start().await;
    common::mount_owner_search(
        &apps.pet_clinic,
        "Davis",
        html(200, owner_list(&[(2, "Betty Davis"), (4, "Harold Davis")])),
    )
    .await;
    common::mount_owner_search(&apps.pet_clinic, "Nobody", html(200, owner_not_found())).await;

    let result = run(
        &apps,
        r#"
name: search-owners
steps:
  - action: search_owners
    last_name: Davis
    expect: found
    bind: first
  - action: log
    message: "${first.firstName} ${first.lastName} is ${first.id}"
  - action: search_owners
    last_name: Nobody
    expect: not_found
  - action: search_owners
    last_name: Nobody
    expect: found
"#,
    )
    .await;

    assert_eq!(result.steps.len(), 4);
    assert!(detail(&result, 0).contains("found 2 owner(s)"));
    assert_eq!(detail(&result, 1), "Betty Davis is 2");
    assert!(result.steps[2].success);
    assert_eq!(result.steps[3].failure, Some(FailureKind::Assertion));
}

#[tokio::test]
async fn check_vets_enforces_the_minimum() {
    let apps = Apps::start().await;
    Mock::given(method("GET"))
        .and(path("/vets.json"))
        .respond_with(json(
            200,
            json!({"vetList": [
                {"id": 1, "firstName": "James", "lastName": "Carter", "specialties": []},
                {"id": 2, "firstName": "Helen", "lastName": "Leary", "specialties": []}
            ]}),
        ))
        .mount(&apps.pet_clinic)
        .await;
    Mock::given(method("GET"))
        .and(path("/vets.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<vets><vetList><id>1</id></vetList><vetList><id>2</id></vetList></vets>",
            "application/xml",
        ))
        .mount(&apps.pet_clinic)
        .await;

    let result = run(
        &apps,
        r#"
name: vets
steps:
  - action: check_vets
    format: json
    min_count: 2
  - action: check_vets
    format: xml
    min_count: 3
"#,
    )
    .await;

    assert_eq!(detail(&result, 0), "2 vet(s) listed");
    assert_eq!(result.steps[1].failure, Some(FailureKind::Assertion));
}

#[tokio::test]
async fn customers_by_country_checks_emptiness() {
    let apps = Apps::start().await;
    Mock::given(method("GET"))
        .and(path("/Customers/GetCustomerByCountry"))
        .and(query_param("country", "Atlantis"))
        .respond_with(json(200, json!([])))
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/Customers/GetCustomerByCountry"))
        .and(query_param("country", "Germany"))
        .respond_with(json(200, json!([{"CountryName": "Germany", "Value": 11}])))
        .mount(&apps.book_store)
        .await;

    let result = run(
        &apps,
        r#"
name: customers
steps:
  - action: customers_by_country
    country: Atlantis
    expect_empty: true
  - action: customers_by_country
    country: Germany
    expect_empty: false
  - action: customers_by_country
    country: Germany
    expect_empty: true
"#,
    )
    .await;

    assert!(result.steps[0].success);
    assert_eq!(detail(&result, 1), "1 aggregate row(s) for 'Germany'");
    assert_eq!(result.steps[2].failure, Some(FailureKind::Assertion));
}

const UNTITLED_BOOK: &str = r#"
name: untitled-book
steps:
  - action: expect_rejection
    kind: book
    fields:
      Genre: SciFi
      Year: 1965
    message_contains: Bad Request
    unchanged:
      of: api
      collection: Books
"#;

async fn mount_bad_request(apps: &Apps) {
    Mock::given(method("POST"))
        .and(path("/api/Books"))
        .respond_with(json(400, json!({"status": 400, "title": "Bad Request"})))
        .mount(&apps.book_store)
        .await;
}

#[tokio::test]
async fn rejection_leaves_the_listing_unchanged() {
    let apps = Apps::start().await;
    mount_bad_request(&apps).await;
    Mock::given(method("GET"))
        .and(path("/api/Books"))
        .respond_with(json(200, json!([{"Id": 1, "Title": "Dune"}, {"Id": 2, "Title": "Emma"}])))
        .expect(2)
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, UNTITLED_BOOK).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(detail(&result, 0), "rejected (400): Bad Request");
}

#[tokio::test]
async fn rejection_that_still_persists_fails_the_count() {
    let apps = Apps::start().await;
    mount_bad_request(&apps).await;
    Mock::given(method("GET"))
        .and(path("/api/Books"))
        .respond_with(json(200, json!([{"Id": 1, "Title": "Dune"}])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&apps.book_store)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/Books"))
        .respond_with(json(200, json!([{"Id": 1, "Title": "Dune"}, {"Id": 2}])))
        .mount(&apps.book_store)
        .await;

    let result = run(&apps, UNTITLED_BOOK).await;

    assert!(!result.success);
    assert_eq!(result.steps[0].failure, Some(FailureKind::Assertion));
    assert!(result.steps[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("from 1 to 2"));
}
