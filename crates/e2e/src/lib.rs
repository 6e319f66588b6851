//! Crosscheck E2E harness
//!
//! This crate drives two live web applications (a pet clinic rendered as
//! HTML forms and a book store exposed as a JSON REST API) and checks that
//! data written through one channel becomes visible through another:
//! - Provisions fixtures through form posts or REST calls
//! - Extracts the identifiers the applications assign
//! - Polls a second channel until the entity shows up, or times out
//! - Falls back to a synthesized fixture when a precondition is missing
//! - Parses declarative YAML scenarios
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ScenarioRunner (one task each)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)  ──▶  ScenarioContext (aliases, token)     │
//! │    ├── provision ─────▶ FixtureProvisioner ──┐              │
//! │    ├── resolve ───────▶ FallbackResolver     │ extractor    │
//! │    │                      ├── Catalog        │ contracts    │
//! │    │                      └── Provisioner ◀──┘              │
//! │    ├── verify ────────▶ ConsistencyVerifier ──▶ Reader      │
//! │    └── expect_rejection / update / delete / search ...      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Endpoints: Transport (reqwest, redirects not followed)     │
//! │    ├── pet_clinic  (HTML + form posts)                      │
//! │    └── book_store  (JSON REST)                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod contracts;
pub mod error;
pub mod extractor;
pub mod fallback;
pub mod markup;
pub mod provisioner;
pub mod reader;
pub mod runner;
pub mod scenario;
pub mod transport;
pub mod verifier;

pub use catalog::{Catalog, Listing, OwnerSearch};
pub use config::{ConsistencySettings, HarnessConfig};
pub use context::ScenarioContext;
pub use error::{E2eError, E2eResult};
pub use extractor::{extract, extract_id, PathTemplate};
pub use fallback::{FallbackResolver, Lookup, Origin, Precondition, Resolution};
pub use provisioner::{DeletionOutcome, FixtureProvisioner};
pub use reader::{ReadChannel, Reader};
pub use runner::{FailureKind, ScenarioResult, ScenarioRunner, StepResult, SuiteResult};
pub use scenario::{Scenario, ScenarioStep};
pub use transport::{ChannelRequest, Endpoints, HttpTransport, Transport};
pub use verifier::{Cardinality, ConsistencyCheck, ConsistencyVerifier, MatchPredicate};
