//! Error types for fixture orchestration
//!
//! Provisioning, extraction and consistency failures are fatal to the
//! current scenario. A `ValidationError` is the expected outcome of a
//! negative scenario and is asserted, not propagated.

use crosscheck_common::{Channel, EntityKind};
use thiserror::Error;

/// Failures of the HTTP capability itself
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Response claimed JSON but did not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Too many redirects while reading {0}")]
    RedirectLoop(String),
}

/// Identifier could not be derived from a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Element not found: {what}")]
    ElementNotFound { what: String },

    #[error("Pattern mismatch: expected {expected}, found {found}")]
    PatternMismatch { expected: String, found: String },

    #[error("Ambiguous match: {count} candidates for {what}")]
    AmbiguousMatch { what: String, count: usize },
}

/// The application rejected domain input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation rejected input (status {status}): {}", .messages.join("; "))]
pub struct ValidationError {
    pub status: u16,
    pub messages: Vec<String>,
}

/// Fixture creation failed
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Invalid parent for {kind}: expected {}, got {}", describe(.expected), describe(.actual))]
    InvalidParent {
        kind: EntityKind,
        expected: Option<EntityKind>,
        actual: Option<EntityKind>,
    },

    #[error("Spec is for {actual}, not {expected}")]
    SpecKindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("{kind} cannot be written through the {channel} channel")]
    UnsupportedChannel { kind: EntityKind, channel: Channel },

    #[error("Rejected by the {channel} channel with status {status}: {}", excerpt(.body))]
    Rejected {
        channel: Channel,
        status: u16,
        body: String,
    },

    #[error("Identifier extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProvisioningError {
    /// Validation messages, if this is a rejection of domain input
    ///
    /// A 400 or 422 from the REST channel is always a validation failure,
    /// whatever its body looks like. The form channel only counts when the
    /// re-rendered page carries validation messages.
    pub fn validation(&self) -> Option<ValidationError> {
        match self {
            ProvisioningError::Rejected {
                channel: Channel::Api,
                status: status @ (400 | 422),
                body,
            } => Some(ValidationError {
                status: *status,
                messages: crate::provisioner::api_messages(*status, body),
            }),
            ProvisioningError::Rejected {
                channel: Channel::Form,
                status,
                body,
            } => {
                let messages = crate::provisioner::validation_messages(body);
                if messages.is_empty() {
                    None
                } else {
                    Some(ValidationError {
                        status: *status,
                        messages,
                    })
                }
            }
            _ => None,
        }
    }
}

impl From<crosscheck_common::Error> for ProvisioningError {
    fn from(e: crosscheck_common::Error) -> Self {
        match e {
            crosscheck_common::Error::InvalidParent {
                kind,
                expected,
                actual,
            } => ProvisioningError::InvalidParent {
                kind,
                expected,
                actual,
            },
            crosscheck_common::Error::EmptyId => ProvisioningError::Extraction(
                ExtractionError::PatternMismatch {
                    expected: "non-empty identifier".to_string(),
                    found: "empty string".to_string(),
                },
            ),
            crosscheck_common::Error::UnknownKind(kind) => {
                ProvisioningError::Extraction(ExtractionError::PatternMismatch {
                    expected: "known entity kind".to_string(),
                    found: kind,
                })
            }
        }
    }
}

/// A read against an alternate channel failed
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("{channel} cannot observe {kind} entities")]
    Unsupported { channel: String, kind: EntityKind },

    #[error("Unexpected {shape} response with status {status}: {excerpt}")]
    Unexpected {
        status: u16,
        shape: &'static str,
        excerpt: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Entity never became visible within the consistency window
#[derive(Error, Debug, Clone)]
#[error("{entity} not visible via {channel} after {attempts} attempt(s) in {elapsed_ms} ms (last seen: {})", .last_seen.as_deref().unwrap_or("nothing"))]
pub struct ConsistencyTimeoutError {
    pub entity: String,
    pub channel: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub last_seen: Option<String>,
}

/// Cross-channel verification failed
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Timeout(#[from] ConsistencyTimeoutError),

    #[error("{entity} visible via {channel} but does not satisfy '{predicate}' after {attempts} attempt(s): {last_seen}")]
    Mismatch {
        entity: String,
        channel: String,
        predicate: String,
        attempts: u32,
        last_seen: String,
    },

    #[error("{entity} still visible via {channel} after {attempts} attempt(s) in {elapsed_ms} ms")]
    StillPresent {
        entity: String,
        channel: String,
        attempts: u32,
        elapsed_ms: u64,
    },

    #[error("Read failed: {0}")]
    Read(#[from] ReadError),
}

/// Catalog reads (listings, searches, reference data)
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unexpected {shape} response with status {status}: {excerpt}")]
    Unexpected {
        status: u16,
        shape: &'static str,
        excerpt: String,
    },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Identifier extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Precondition could not be established
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Lookup failed: {0}")]
    Lookup(#[from] CatalogError),

    #[error("{lookup} lookup cannot resolve {kind} preconditions")]
    UnsupportedLookup { kind: EntityKind, lookup: String },

    #[error("Synthesizing substitute failed: {0}")]
    Synthesis(#[source] ProvisioningError),
}

/// Top-level error for scenarios and the harness
#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Unknown alias or placeholder: {0}")]
    UnknownAlias(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Expected rejection, but {0}")]
    UnexpectedAcceptance(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("Precondition failed: {0}")]
    Fallback(#[from] FallbackError),

    #[error("Catalog read failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Model error: {0}")]
    Model(#[from] crosscheck_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

fn describe(kind: &Option<EntityKind>) -> String {
    match kind {
        Some(kind) => kind.to_string(),
        None => "no parent".to_string(),
    }
}

pub(crate) fn excerpt(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    }
}
