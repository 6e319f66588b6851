//! HTTP transport for both channels
//!
//! The transport is the only place that looks at status lines, headers and
//! content types. Everything it returns is already a `ResponseEnvelope`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crosscheck_common::{Domain, ResponseEnvelope};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::HarnessConfig;
use crate::error::{E2eResult, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(Value),
}

/// One request against the system under test, relative to a base URL
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ChannelRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_form(path: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Form(fields),
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn put_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Supplied HTTP capability
#[async_trait]
pub trait Transport: Send + Sync {
    fn base_url(&self) -> &str;

    async fn send(&self, request: ChannelRequest) -> Result<ResponseEnvelope, TransportError>;
}

/// reqwest-backed transport that never follows redirects on its own
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base: Url::parse(&normalize_base(base_url))?,
        })
    }

    fn url_for(&self, request: &ChannelRequest) -> Result<Url, TransportError> {
        let mut url = self.base.join(&request.path)?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        self.base.as_str()
    }

    async fn send(&self, request: ChannelRequest) -> Result<ResponseEnvelope, TransportError> {
        let url = self.url_for(&request)?;
        debug!("{:?} {}", request.method, url);

        let mut builder = self.client.request(request.method.as_reqwest(), url);
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(&fields)),
            RequestBody::Json(body) => builder.json(&body),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let location = header_text(response.headers(), LOCATION);
        let content_type = header_text(response.headers(), CONTENT_TYPE);
        let body = response.text().await?;

        let envelope = classify(status, location.as_deref(), content_type.as_deref(), body)?;
        debug!("-> {} {}", status, envelope.shape());
        Ok(envelope)
    }
}

/// Transports for both applications under test
#[derive(Clone)]
pub struct Endpoints {
    pub pet_clinic: Arc<dyn Transport>,
    pub book_store: Arc<dyn Transport>,
}

impl Endpoints {
    pub fn new(pet_clinic: Arc<dyn Transport>, book_store: Arc<dyn Transport>) -> Self {
        Self {
            pet_clinic,
            book_store,
        }
    }

    /// Fresh clients for one scenario
    pub fn connect(config: &HarnessConfig) -> E2eResult<Self> {
        let timeout = config.request_timeout();
        Ok(Self {
            pet_clinic: Arc::new(HttpTransport::new(&config.pet_clinic_url, timeout)?),
            book_store: Arc::new(HttpTransport::new(&config.book_store_url, timeout)?),
        })
    }

    pub fn for_domain(&self, domain: Domain) -> &Arc<dyn Transport> {
        match domain {
            Domain::PetClinic => &self.pet_clinic,
            Domain::BookStore => &self.book_store,
        }
    }
}

/// Decide the envelope shape of a response, once
pub fn classify(
    status: u16,
    location: Option<&str>,
    content_type: Option<&str>,
    body: String,
) -> Result<ResponseEnvelope, TransportError> {
    if (300..400).contains(&status) {
        if let Some(location) = location {
            return Ok(ResponseEnvelope::Redirect {
                status,
                location: location_path(location),
            });
        }
    }

    let is_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);

    if is_json {
        let body = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        return Ok(ResponseEnvelope::Json { status, body });
    }

    Ok(ResponseEnvelope::Html {
        status,
        document: body,
    })
}

/// Path (plus query) of a Location header, whether absolute or relative
pub fn location_path(location: &str) -> String {
    match Url::parse(location) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => location.to_string(),
    }
}

fn normalize_base(base_url: &str) -> String {
    if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    }
}

fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

fn header_text(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
