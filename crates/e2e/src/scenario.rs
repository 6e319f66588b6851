//! Declarative YAML scenarios

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crosscheck_common::{Channel, EntityKind};

use crate::catalog::Listing;
use crate::error::{E2eError, E2eResult};
use crate::fallback::Lookup;
use crate::reader::ReadChannel;
use crate::verifier::Cardinality;

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Overrides of the configured consistency window
    #[serde(default)]
    pub consistency: ConsistencyOverride,

    /// Steps to execute in order
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyOverride {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

/// A single step in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Create an entity and bind it to `alias`
    Provision {
        alias: String,
        kind: EntityKind,
        #[serde(default)]
        channel: Option<Channel>,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },

    /// Look up an entity, creating a substitute if none exists
    Resolve {
        alias: String,
        kind: EntityKind,
        lookup: Lookup,
        #[serde(default)]
        template: BTreeMap<String, Value>,
        /// Field that receives the uniqueness token; the kind's identifying
        /// field by default
        #[serde(default)]
        discriminator: Option<String>,
        #[serde(default)]
        channel: Option<Channel>,
        #[serde(default)]
        parent: Option<String>,
        /// Variable that receives the effective criterion
        #[serde(default)]
        bind_criterion: Option<String>,
    },

    /// Wait until `target` is visible through another channel
    Verify {
        target: String,
        read: ReadChannel,
        /// Fields must equal their values; `text` need only be contained
        #[serde(default)]
        expect: BTreeMap<String, String>,
        #[serde(default)]
        cardinality: Cardinality,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        poll_ms: Option<u64>,
    },

    /// Submit a create that the application must refuse
    ExpectRejection {
        kind: EntityKind,
        #[serde(default)]
        channel: Option<Channel>,
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
        #[serde(default)]
        message_contains: Option<String>,
        /// Listing whose size must not change
        #[serde(default)]
        unchanged: Option<Listing>,
    },

    /// Replace fields of `target` through the REST channel
    Update {
        target: String,
        #[serde(default)]
        fields: BTreeMap<String, Value>,
        /// Verify the new values via the item endpoint
        #[serde(default = "default_true")]
        verify: bool,
    },

    /// Delete `target`, then check the outcome either way
    Delete {
        target: String,
        /// Listing to check for absence; the item endpoint is always checked
        #[serde(default)]
        listing: Option<ReadChannel>,
    },

    /// Owner search with an expected outcome
    SearchOwners {
        last_name: String,
        expect: SearchExpectation,
        #[serde(default)]
        bind: Option<String>,
    },

    /// Vet listing in one of its encodings
    CheckVets {
        format: VetFormat,
        #[serde(default)]
        min_count: Option<usize>,
    },

    /// Country aggregates; the endpoint answers 200 even without a match
    CustomersByCountry {
        country: String,
        #[serde(default)]
        expect_empty: Option<bool>,
    },

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchExpectation {
    Found,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetFormat {
    Json,
    Xml,
}

impl ScenarioStep {
    /// Short name for logs and results
    pub fn action(&self) -> &'static str {
        match self {
            ScenarioStep::Provision { .. } => "provision",
            ScenarioStep::Resolve { .. } => "resolve",
            ScenarioStep::Verify { .. } => "verify",
            ScenarioStep::ExpectRejection { .. } => "expect_rejection",
            ScenarioStep::Update { .. } => "update",
            ScenarioStep::Delete { .. } => "delete",
            ScenarioStep::SearchOwners { .. } => "search_owners",
            ScenarioStep::CheckVets { .. } => "check_vets",
            ScenarioStep::CustomersByCountry { .. } => "customers_by_country",
            ScenarioStep::Log { .. } => "log",
        }
    }

    /// Aliases this step reads
    fn uses(&self) -> Vec<&str> {
        match self {
            ScenarioStep::Provision { parent, .. }
            | ScenarioStep::Resolve { parent, .. }
            | ScenarioStep::ExpectRejection { parent, .. } => parent.iter().map(String::as_str).collect(),
            ScenarioStep::Verify { target, .. }
            | ScenarioStep::Update { target, .. }
            | ScenarioStep::Delete { target, .. } => vec![target.as_str()],
            _ => Vec::new(),
        }
    }

    /// Alias this step binds
    fn binds(&self) -> Option<&str> {
        match self {
            ScenarioStep::Provision { alias, .. } | ScenarioStep::Resolve { alias, .. } => Some(alias.as_str()),
            ScenarioStep::SearchOwners { bind, .. } => bind.as_deref(),
            _ => None,
        }
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml).map_err(E2eError::from)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Every alias a step uses must be bound by an earlier step
    pub fn validate(&self) -> E2eResult<()> {
        if self.steps.is_empty() {
            return Err(E2eError::ScenarioParse(format!("{}: no steps", self.name)));
        }

        let mut bound: HashSet<&str> = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            for alias in step.uses() {
                if !bound.contains(alias) {
                    return Err(E2eError::ScenarioParse(format!(
                        "{}: step {} ({}) uses '{}' before it is bound",
                        self.name,
                        index + 1,
                        step.action(),
                        alias
                    )));
                }
            }
            if let Some(alias) = step.binds() {
                bound.insert(alias);
            }
        }
        Ok(())
    }
}
