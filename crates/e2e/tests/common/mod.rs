//! Stand-ins for the two applications, served by wiremock
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use crosscheck_e2e::{Endpoints, HttpTransport};
use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct Apps {
    pub pet_clinic: MockServer,
    pub book_store: MockServer,
}

impl Apps {
    pub async fn start() -> Self {
        Self {
            pet_clinic: MockServer::start().await,
            book_store: MockServer::start().await,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        let timeout = Duration::from_secs(5);
        Endpoints::new(
            Arc::new(HttpTransport::new(&self.pet_clinic.uri(), timeout).unwrap()),
            Arc::new(HttpTransport::new(&self.book_store.uri(), timeout).unwrap()),
        )
    }
}

pub fn html(status: u16, body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.into(), "text/html;charset=UTF-8")
}

pub fn json(status: u16, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(body)
}

pub fn redirect(location: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("Location", location)
}

pub struct Pet<'a> {
    pub id: u32,
    pub name: &'a str,
    pub visits: &'a [&'a str],
}

/// Owner detail page the way the pet clinic renders it
pub fn owner_page(owner_id: u32, first: &str, last: &str, pets: &[Pet<'_>]) -> String {
    let rows: String = pets
        .iter()
        .map(|pet| {
            let visits: String = pet
                .visits
                .iter()
                .map(|v| format!("<tr><td>2024-01-01</td><td>{}</td></tr>", v))
                .collect();
            format!(
                r#"<tr>
  <td valign="top"><dl><dt>Name</dt><dd>{name}</dd><dt>Type</dt><dd>dog</dd></dl></td>
  <td valign="top"><table class="table-condensed">
    <thead><tr><th>Visit Date</th><th>Description</th></tr></thead>
    {visits}
    <tr>
      <td><a href="/owners/{owner}/pets/{pet}/edit">Edit Pet</a></td>
      <td><a href="/owners/{owner}/pets/{pet}/visits/new">Add Visit</a></td>
    </tr>
  </table></td>
</tr>"#,
                name = pet.name,
                visits = visits,
                owner = owner_id,
                pet = pet.id
            )
        })
        .collect();

    format!(
        r#"<html><body>
<h2>Owner Information</h2>
<table class="table table-striped">
  <tr><th>Name</th><td><b>{first} {last}</b></td></tr>
  <tr><th>Address</th><td>123 Main St</td></tr>
  <tr><th>City</th><td>Metropolis</td></tr>
  <tr><th>Telephone</th><td>1234567890</td></tr>
</table>
<a href="/owners/{owner}/edit">Edit Owner</a>
<h2>Pets and Visits</h2>
<table class="table table-striped">
{rows}
</table>
</body></html>"#,
        first = first,
        last = last,
        owner = owner_id,
        rows = rows
    )
}

/// Owner search result list
pub fn owner_list(owners: &[(u32, &str)]) -> String {
    let rows: String = owners
        .iter()
        .map(|(id, name)| {
            format!(
                r#"<tr><td><a href="/owners/{id}">{name}</a></td><td>638 Cardinal Ave.</td><td>Sun Prairie</td><td>6085551749</td><td></td></tr>"#,
                id = id,
                name = name
            )
        })
        .collect();
    format!(
        r#"<html><body><h2>Owners</h2>
<table id="owners" class="table table-striped">
  <thead><tr><th>Name</th><th>Address</th><th>City</th><th>Telephone</th><th>Pets</th></tr></thead>
  <tbody>{}</tbody>
</table></body></html>"#,
        rows
    )
}

pub fn owner_not_found() -> String {
    r#"<html><body><h2>Find Owners</h2>
<form action="/owners" method="get"><input name="lastName" value=""/>
<span class="help-inline"><div><p>has not been found</p></div></span>
</form></body></html>"#
        .to_string()
}

/// Owner form re-rendered with inline validation help
pub fn owner_form_with_errors(messages: &[&str]) -> String {
    let help: String = messages
        .iter()
        .map(|m| format!(r#"<span class="help-inline">{}</span>"#, m))
        .collect();
    format!(
        r#"<html><body><h2>Owner</h2><form method="post">
<div class="control-group error"><input name="lastName" value=""/>{}</div>
<button type="submit">Add Owner</button></form></body></html>"#,
        help
    )
}

pub async fn mount_owner_search(server: &MockServer, last_name: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/owners"))
        .and(query_param("lastName", last_name))
        .respond_with(response)
        .mount(server)
        .await;
}

pub async fn mount_owner_page(server: &MockServer, owner_id: u32, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/owners/{}", owner_id)))
        .respond_with(html(200, body))
        .mount(server)
        .await;
}
