//! Scenario runner
//!
//! Executes scenarios step by step against the two applications. Steps of a
//! scenario run strictly in order; separate scenarios run concurrently, each
//! with its own context and its own HTTP clients. The first failing step
//! ends its scenario and no other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crosscheck_common::{value_text, Channel, EntityKind, ProvisioningSpec};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};

use crate::catalog::{Catalog, Listing};
use crate::config::{ConsistencySettings, HarnessConfig};
use crate::context::ScenarioContext;
use crate::contracts;
use crate::error::{E2eError, E2eResult, ProvisioningError, VerifyError};
use crate::fallback::{FallbackResolver, Lookup, Precondition};
use crate::provisioner::{DeletionOutcome, FixtureProvisioner};
use crate::reader::ReadChannel;
use crate::scenario::{Scenario, ScenarioStep, SearchExpectation, VetFormat};
use crate::transport::Endpoints;
use crate::verifier::{Cardinality, ConsistencyCheck, ConsistencyVerifier, MatchPredicate};

/// Why a step failed, so timeouts and wrong data are never conflated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A create was rejected or could not be sent
    Provisioning,
    /// The new entity's identifier could not be derived
    Extraction,
    /// Never became visible within the consistency window
    Timeout,
    /// Visible, but with the wrong content (or still present after deletion)
    Mismatch,
    /// A create that should have been rejected was accepted
    UnexpectedAcceptance,
    Assertion,
    Precondition,
    Read,
    Setup,
}

impl FailureKind {
    pub fn of(error: &E2eError) -> Self {
        match error {
            E2eError::Provisioning(ProvisioningError::Extraction(_)) => FailureKind::Extraction,
            E2eError::Provisioning(_) => FailureKind::Provisioning,
            E2eError::Verify(VerifyError::Timeout(_)) => FailureKind::Timeout,
            E2eError::Verify(VerifyError::Mismatch { .. } | VerifyError::StillPresent { .. }) => {
                FailureKind::Mismatch
            }
            E2eError::Verify(VerifyError::Read(_)) => FailureKind::Read,
            E2eError::Fallback(_) => FailureKind::Precondition,
            E2eError::UnexpectedAcceptance(_) => FailureKind::UnexpectedAcceptance,
            E2eError::AssertionFailed(_) => FailureKind::Assertion,
            E2eError::Catalog(_) | E2eError::Transport(_) => FailureKind::Read,
            _ => FailureKind::Setup,
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub action: String,
    pub success: bool,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub run_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|step| !step.success)
    }
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

pub struct ScenarioRunner {
    config: HarnessConfig,
}

impl ScenarioRunner {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Load the configured scenarios directory and run it, optionally by tag
    pub async fn run_dir(&self, tag: Option<&str>) -> E2eResult<SuiteResult> {
        let scenarios = Scenario::load_all(&self.config.scenarios_dir)?;
        let selected: Vec<Scenario> = match tag {
            Some(tag) => Scenario::filter_by_tag(&scenarios, tag)
                .into_iter()
                .cloned()
                .collect(),
            None => scenarios,
        };
        Ok(self.run_all(&selected).await)
    }

    /// Run scenarios concurrently, at most `max_concurrency` at a time
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        info!("Running {} scenario(s)...", scenarios.len());

        let runs = scenarios.iter().map(|scenario| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.run_scenario(scenario).await
            }
        });
        let results = join_all(runs).await;

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        for result in &results {
            if result.success {
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            total: results.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run one scenario with fresh HTTP clients
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        match Endpoints::connect(&self.config) {
            Ok(endpoints) => self.run_with(endpoints, scenario).await,
            Err(e) => ScenarioResult {
                name: scenario.name.clone(),
                run_id: String::new(),
                success: false,
                duration_ms: 0,
                steps: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }

    /// Run one scenario against the given transports
    pub async fn run_with(&self, endpoints: Endpoints, scenario: &Scenario) -> ScenarioResult {
        let mut ctx = ScenarioContext::new();
        let span = info_span!("scenario", name = %scenario.name, run_id = %ctx.run_id);
        let settings = self.config.consistency.overridden(
            scenario.consistency.timeout_ms,
            scenario.consistency.poll_interval_ms,
        );
        let session = Session::new(endpoints, settings);

        async move {
            let start = Instant::now();
            let mut steps = Vec::new();
            let mut scenario_error = None;

            debug!("Running scenario: {}", scenario.name);

            for (index, step) in scenario.steps.iter().enumerate() {
                let step_start = Instant::now();
                let outcome = session.execute(step, &mut ctx).await;
                let duration_ms = step_start.elapsed().as_millis() as u64;

                match outcome {
                    Ok(detail) => {
                        debug!("step {} {} ok: {}", index + 1, step.action(), detail);
                        steps.push(StepResult {
                            index,
                            action: step.action().to_string(),
                            success: true,
                            duration_ms,
                            detail: Some(detail),
                            error: None,
                            failure: None,
                        });
                    }
                    Err(e) => {
                        let failure = FailureKind::of(&e);
                        error!(
                            "step {} {} failed after {} ms ({:?}): {}",
                            index + 1,
                            step.action(),
                            duration_ms,
                            failure,
                            e
                        );
                        scenario_error = Some(format!("step {} ({}): {}", index + 1, step.action(), e));
                        steps.push(StepResult {
                            index,
                            action: step.action().to_string(),
                            success: false,
                            duration_ms,
                            detail: None,
                            error: Some(e.to_string()),
                            failure: Some(failure),
                        });
                        break; // Stop on first failure
                    }
                }
            }

            ScenarioResult {
                name: scenario.name.clone(),
                run_id: ctx.run_id.to_string(),
                success: scenario_error.is_none(),
                duration_ms: start.elapsed().as_millis() as u64,
                steps,
                error: scenario_error,
            }
        }
        .instrument(span)
        .await
    }
}

/// Components one scenario works with
struct Session {
    provisioner: FixtureProvisioner,
    verifier: ConsistencyVerifier,
    catalog: Catalog,
    settings: ConsistencySettings,
}

impl Session {
    fn new(endpoints: Endpoints, settings: ConsistencySettings) -> Self {
        Self {
            provisioner: FixtureProvisioner::new(endpoints.clone()),
            verifier: ConsistencyVerifier::new(endpoints.clone()),
            catalog: Catalog::new(endpoints),
            settings,
        }
    }

    fn check(&self, entity: crosscheck_common::EntityRef, read: ReadChannel) -> ConsistencyCheck {
        ConsistencyCheck::new(entity, read).budget(self.settings)
    }

    /// Execute one step; the returned text describes what happened
    async fn execute(&self, step: &ScenarioStep, ctx: &mut ScenarioContext) -> E2eResult<String> {
        match step {
            ScenarioStep::Provision {
                alias,
                kind,
                channel,
                parent,
                fields,
            } => {
                let spec = ProvisioningSpec {
                    kind: *kind,
                    fields: ctx.interpolate_fields(fields)?,
                };
                let parent = ctx.get_opt(parent.as_deref())?.cloned();
                let channel = channel.unwrap_or_else(|| default_channel(*kind));

                let entity = self
                    .provisioner
                    .provision(*kind, &spec, parent.as_ref(), channel)
                    .await?;
                let detail = format!("{} bound to '{}'", entity, alias);
                ctx.bind(alias.clone(), entity);
                Ok(detail)
            }

            ScenarioStep::Resolve {
                alias,
                kind,
                lookup,
                template,
                discriminator,
                channel,
                parent,
                bind_criterion,
            } => {
                let precondition = Precondition {
                    kind: *kind,
                    lookup: interpolate_lookup(ctx, lookup)?,
                    template: ProvisioningSpec {
                        kind: *kind,
                        fields: ctx.interpolate_fields(template)?,
                    },
                    discriminator: discriminator
                        .clone()
                        .unwrap_or_else(|| kind.identifying_field().to_string()),
                    channel: channel.unwrap_or_else(|| default_channel(*kind)),
                    parent: ctx.get_opt(parent.as_deref())?.cloned(),
                };

                let resolution = FallbackResolver::new(&self.catalog, &self.provisioner)
                    .resolve(&precondition)
                    .await?;
                let detail = format!(
                    "{} ({:?}, {}) bound to '{}'",
                    resolution.entity,
                    resolution.origin,
                    resolution.trace.join(" -> "),
                    alias
                );
                if let Some(var) = bind_criterion {
                    ctx.set_var(var.clone(), resolution.criterion.clone());
                }
                ctx.bind(alias.clone(), resolution.entity);
                Ok(detail)
            }

            ScenarioStep::Verify {
                target,
                read,
                expect,
                cardinality,
                timeout_ms,
                poll_ms,
            } => {
                let entity = ctx.get(target)?.clone();
                let read = interpolate_read(ctx, read)?;
                // `text` searches the whole record; any other key is a field
                // that must equal the expected value exactly.
                let mut predicates = Vec::new();
                for (field, value) in expect {
                    let value = ctx.interpolate(value)?;
                    predicates.push(if field == "text" {
                        MatchPredicate::text_contains(value)
                    } else {
                        MatchPredicate::field_equals(field.clone(), value)
                    });
                }

                let mut check = self
                    .check(entity, read)
                    .matching(MatchPredicate::all(predicates))
                    .cardinality(*cardinality);
                if let Some(ms) = timeout_ms {
                    check = check.timeout(Duration::from_millis(*ms));
                }
                if let Some(ms) = poll_ms {
                    check = check.poll_interval(Duration::from_millis(*ms));
                }

                let verified = self.verifier.verify(&check).await?;
                Ok(format!(
                    "{} visible via {} after {} attempt(s)",
                    check.entity, check.read_channel, verified.attempts
                ))
            }

            ScenarioStep::ExpectRejection {
                kind,
                channel,
                parent,
                fields,
                message_contains,
                unchanged,
            } => {
                let spec = ProvisioningSpec {
                    kind: *kind,
                    fields: ctx.interpolate_fields(fields)?,
                };
                let parent = ctx.get_opt(parent.as_deref())?.cloned();
                let channel = channel.unwrap_or_else(|| default_channel(*kind));

                let unchanged = match unchanged {
                    Some(listing) => Some(interpolate_listing(ctx, listing)?),
                    None => None,
                };
                let before = match &unchanged {
                    Some(listing) => Some(self.catalog.count(listing).await?),
                    None => None,
                };

                let validation = match self
                    .provisioner
                    .provision(*kind, &spec, parent.as_ref(), channel)
                    .await
                {
                    Ok(entity) => {
                        return Err(E2eError::UnexpectedAcceptance(format!("{} was created", entity)))
                    }
                    Err(e) => match e.validation() {
                        Some(validation) => validation,
                        None => return Err(e.into()),
                    },
                };

                if let Some(needle) = message_contains {
                    let needle = ctx.interpolate(needle)?;
                    if !validation.messages.iter().any(|m| m.contains(needle.as_str())) {
                        return Err(E2eError::AssertionFailed(format!(
                            "no validation message contains '{}': {:?}",
                            needle, validation.messages
                        )));
                    }
                }

                if let (Some(listing), Some(before)) = (&unchanged, before) {
                    let after = self.catalog.count(listing).await?;
                    if after != before {
                        return Err(E2eError::AssertionFailed(format!(
                            "listing count changed from {} to {} after a rejected create",
                            before, after
                        )));
                    }
                }

                Ok(format!("rejected ({}): {}", validation.status, validation.messages.join("; ")))
            }

            ScenarioStep::Update {
                target,
                fields,
                verify,
            } => {
                let entity = ctx.get(target)?.clone();
                let spec = ProvisioningSpec {
                    kind: entity.kind(),
                    fields: ctx.interpolate_fields(fields)?,
                };
                let updated = self.provisioner.update(&entity, &spec).await?;

                let mut detail = format!("{} updated", updated);
                if *verify {
                    let predicate = MatchPredicate::all(
                        spec.fields
                            .iter()
                            .map(|(name, value)| MatchPredicate::field_equals(name.clone(), value_text(value)))
                            .collect(),
                    );
                    let check = self
                        .check(updated.clone(), ReadChannel::ApiItem { collection: None })
                        .matching(predicate);
                    let verified = self.verifier.verify(&check).await?;
                    detail.push_str(&format!(", confirmed after {} attempt(s)", verified.attempts));
                }
                ctx.bind(target.clone(), updated);
                Ok(detail)
            }

            ScenarioStep::Delete { target, listing } => {
                let entity = ctx.get(target)?.clone();
                match self.provisioner.delete(&entity).await? {
                    DeletionOutcome::Deleted => {
                        let item = ReadChannel::ApiItem { collection: None };
                        self.verifier
                            .verify_absent(&self.check(entity.clone(), item))
                            .await?;
                        if let Some(listing) = listing {
                            let listing = interpolate_read(ctx, listing)?;
                            self.verifier
                                .verify_absent(&self.check(entity.clone(), listing))
                                .await?;
                        }
                        Ok(format!("{} deleted and no longer retrievable", entity))
                    }
                    DeletionOutcome::Unsupported => {
                        let check = self
                            .check(entity.clone(), ReadChannel::ApiItem { collection: None })
                            .cardinality(Cardinality::ExactlyOne);
                        self.verifier.verify(&check).await?;
                        Ok(format!("deletion unsupported (405); {} still retrievable", entity))
                    }
                }
            }

            ScenarioStep::SearchOwners {
                last_name,
                expect,
                bind,
            } => {
                let last_name = ctx.interpolate(last_name)?;
                let outcome = self.catalog.search_owners(&last_name).await?;
                match (expect, outcome.first()) {
                    (SearchExpectation::Found, Some(owner)) => {
                        let detail = format!("'{}' found {} owner(s), first {}", last_name, outcome.count(), owner);
                        if let Some(alias) = bind {
                            ctx.bind(alias.clone(), owner.clone());
                        }
                        Ok(detail)
                    }
                    (SearchExpectation::NotFound, None) => Ok(format!("'{}' not found", last_name)),
                    (SearchExpectation::Found, None) => Err(E2eError::AssertionFailed(format!(
                        "expected owners named '{}', found none",
                        last_name
                    ))),
                    (SearchExpectation::NotFound, Some(_)) => Err(E2eError::AssertionFailed(format!(
                        "expected no owners named '{}', found {}",
                        last_name,
                        outcome.count()
                    ))),
                }
            }

            ScenarioStep::CheckVets { format, min_count } => {
                let count = match format {
                    VetFormat::Json => self.catalog.vets_json().await?.len(),
                    VetFormat::Xml => self.catalog.vets_xml().await?,
                };
                if let Some(min) = min_count {
                    if count < *min {
                        return Err(E2eError::AssertionFailed(format!(
                            "expected at least {} vet(s), listing has {}",
                            min, count
                        )));
                    }
                }
                Ok(format!("{} vet(s) listed", count))
            }

            ScenarioStep::CustomersByCountry {
                country,
                expect_empty,
            } => {
                let country = ctx.interpolate(country)?;
                let rows = self.catalog.customers_by_country(&country).await?;
                match expect_empty {
                    Some(true) if !rows.is_empty() => Err(E2eError::AssertionFailed(format!(
                        "expected no aggregates for '{}', got {}",
                        country,
                        rows.len()
                    ))),
                    Some(false) if rows.is_empty() => Err(E2eError::AssertionFailed(format!(
                        "expected aggregates for '{}', got none",
                        country
                    ))),
                    _ => Ok(format!("{} aggregate row(s) for '{}'", rows.len(), country)),
                }
            }

            ScenarioStep::Log { message } => {
                let message = ctx.interpolate(message)?;
                info!("{}", message);
                Ok(message)
            }
        }
    }
}

/// The only create channel a kind has
fn default_channel(kind: EntityKind) -> Channel {
    contracts::supported_channels(kind)
        .first()
        .copied()
        .unwrap_or_default()
}

fn interpolate_lookup(ctx: &ScenarioContext, lookup: &Lookup) -> E2eResult<Lookup> {
    Ok(match lookup {
        Lookup::OwnerByLastName { last_name } => Lookup::OwnerByLastName {
            last_name: ctx.interpolate(last_name)?,
        },
        Lookup::ApiCollection {
            collection,
            field,
            value,
        } => Lookup::ApiCollection {
            collection: ctx.interpolate(collection)?,
            field: field.clone(),
            value: value.as_deref().map(|v| ctx.interpolate(v)).transpose()?,
        },
    })
}

fn interpolate_listing(ctx: &ScenarioContext, listing: &Listing) -> E2eResult<Listing> {
    Ok(match listing {
        Listing::Owners { last_name } => Listing::Owners {
            last_name: ctx.interpolate(last_name)?,
        },
        Listing::Api { collection } => Listing::Api {
            collection: collection.clone(),
        },
    })
}

fn interpolate_read(ctx: &ScenarioContext, read: &ReadChannel) -> E2eResult<ReadChannel> {
    Ok(match read {
        ReadChannel::OwnerDetail => ReadChannel::OwnerDetail,
        ReadChannel::OwnerSearch { last_name } => ReadChannel::OwnerSearch {
            last_name: ctx.interpolate(last_name)?,
        },
        ReadChannel::ApiItem { collection } => ReadChannel::ApiItem {
            collection: collection.clone(),
        },
        ReadChannel::ApiCollection { collection } => ReadChannel::ApiCollection {
            collection: collection.clone(),
        },
        ReadChannel::Page {
            domain,
            path,
            table_id,
        } => ReadChannel::Page {
            domain: *domain,
            path: ctx.interpolate(path)?,
            table_id: table_id.clone(),
        },
    })
}
