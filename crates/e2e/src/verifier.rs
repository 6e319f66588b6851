//! Cross-channel consistency verification
//!
//! Polls an alternate read channel until an entity written elsewhere shows
//! up with the expected content, or the timeout budget runs out. Absence and
//! wrong content are reported as different errors: the first points at
//! propagation or a flaky environment, the second at a correctness bug.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crosscheck_common::{value_text, EntityRef, Record};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ConsistencySettings;
use crate::error::{ConsistencyTimeoutError, ReadError, VerifyError};
use crate::reader::{self, ReadChannel, Reader};
use crate::transport::Endpoints;

/// A described test over one record
#[derive(Clone)]
pub struct MatchPredicate {
    description: String,
    test: Arc<dyn Fn(&Record) -> bool + Send + Sync>,
}

impl MatchPredicate {
    pub fn custom(
        description: impl Into<String>,
        test: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            test: Arc::new(test),
        }
    }

    /// Any located record will do
    pub fn any() -> Self {
        Self::custom("any record", |_| true)
    }

    pub fn field_equals(field: impl Into<String>, expected: impl Into<String>) -> Self {
        let field = field.into();
        let expected = expected.into();
        Self::custom(format!("{} == {:?}", field, expected), move |record| {
            field_text(record, &field).map(|v| v == expected).unwrap_or(false)
        })
    }

    pub fn field_contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        let field = field.into();
        let needle = needle.into();
        Self::custom(format!("{} contains {:?}", field, needle), move |record| {
            field_text(record, &field)
                .map(|v| v.contains(needle.as_str()))
                .unwrap_or(false)
        })
    }

    /// The record's text (row text, or all scalar values) contains `needle`
    pub fn text_contains(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self::custom(format!("text contains {:?}", needle), move |record| {
            reader::record_text(record).contains(needle.as_str())
        })
    }

    pub fn all(predicates: Vec<MatchPredicate>) -> Self {
        if predicates.is_empty() {
            return Self::any();
        }
        let description = predicates
            .iter()
            .map(|p| p.description.as_str())
            .collect::<Vec<_>>()
            .join(" && ");
        Self::custom(description, move |record| predicates.iter().all(|p| p.matches(record)))
    }

    pub fn matches(&self, record: &Record) -> bool {
        (self.test)(record)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for MatchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MatchPredicate").field(&self.description).finish()
    }
}

/// Field value by exact name, falling back to a case-insensitive match
fn field_text(record: &Record, field: &str) -> Option<String> {
    record
        .get(field)
        .or_else(|| {
            record
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(field))
                .map(|(_, value)| value)
        })
        .map(value_text)
}

/// How many located records may satisfy the check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    #[default]
    AtLeastOne,
    /// A duplicate listing is a mismatch
    ExactlyOne,
}

/// One cross-channel visibility check
#[derive(Debug, Clone)]
pub struct ConsistencyCheck {
    pub entity: EntityRef,
    pub read_channel: ReadChannel,
    pub predicate: MatchPredicate,
    pub cardinality: Cardinality,
    pub timeout_budget: Duration,
    pub poll_interval: Duration,
}

impl ConsistencyCheck {
    pub fn new(entity: EntityRef, read_channel: ReadChannel) -> Self {
        let settings = ConsistencySettings::default();
        Self {
            entity,
            read_channel,
            predicate: MatchPredicate::any(),
            cardinality: Cardinality::AtLeastOne,
            timeout_budget: settings.timeout(),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn matching(mut self, predicate: MatchPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn budget(mut self, settings: ConsistencySettings) -> Self {
        self.timeout_budget = settings.timeout();
        self.poll_interval = settings.poll_interval();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_budget = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// The record that satisfied a check
#[derive(Debug, Clone)]
pub struct VerifiedRecord {
    pub record: Record,
    /// Located records that satisfied the predicate
    pub matches: usize,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Confirmation that an entity disappeared from a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAbsence {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// What the last attempt saw
enum Observation {
    /// Read fine, entity not among the records
    Absent { records: usize },
    /// Entity located, but the predicate or cardinality failed
    Wrong { located: usize, seen: String },
    /// The read itself failed
    Failed(ReadError),
}

impl Observation {
    fn describe(&self) -> Option<String> {
        match self {
            Observation::Absent { records: 0 } => None,
            Observation::Absent { records } => Some(format!("{} unrelated record(s)", records)),
            Observation::Wrong { seen, .. } => Some(seen.clone()),
            Observation::Failed(e) => Some(format!("read error: {}", e)),
        }
    }
}

pub struct ConsistencyVerifier {
    reader: Reader,
}

impl ConsistencyVerifier {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            reader: Reader::new(endpoints),
        }
    }

    /// Poll until the entity is visible and satisfies the check
    ///
    /// Returns on the first matching read. Read failures count as failed
    /// attempts, except a channel that cannot observe the entity at all.
    pub async fn verify(&self, check: &ConsistencyCheck) -> Result<VerifiedRecord, VerifyError> {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        let last = loop {
            attempts += 1;
            let observation = match self.reader.read(&check.read_channel, &check.entity).await {
                Ok(records) => {
                    let located = reader::locate(&check.entity, &records);
                    let matching: Vec<&Record> = located
                        .iter()
                        .copied()
                        .filter(|record| check.predicate.matches(record))
                        .collect();

                    let satisfied = match check.cardinality {
                        Cardinality::AtLeastOne => !matching.is_empty(),
                        Cardinality::ExactlyOne => located.len() == 1 && matching.len() == 1,
                    };

                    if satisfied {
                        let elapsed = start.elapsed();
                        info!(
                            "{} visible via {} after {} attempt(s) ({} ms)",
                            check.entity,
                            check.read_channel,
                            attempts,
                            elapsed.as_millis()
                        );
                        return Ok(VerifiedRecord {
                            record: matching[0].clone(),
                            matches: matching.len(),
                            attempts,
                            elapsed,
                        });
                    }

                    if located.is_empty() {
                        Observation::Absent {
                            records: records.len(),
                        }
                    } else {
                        Observation::Wrong {
                            located: located.len(),
                            seen: summarize(&located),
                        }
                    }
                }
                Err(e @ ReadError::Unsupported { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!("Read via {} failed: {}", check.read_channel, e);
                    Observation::Failed(e)
                }
            };

            let elapsed = start.elapsed();
            if elapsed >= check.timeout_budget {
                break observation;
            }
            let wait = check.poll_interval.min(check.timeout_budget - elapsed);
            debug!(
                "{} not yet consistent via {} (attempt {}), retrying in {} ms",
                check.entity,
                check.read_channel,
                attempts,
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match last {
            Observation::Wrong { located, seen } => {
                let seen = if located > 1 && check.cardinality == Cardinality::ExactlyOne {
                    format!("{} duplicate record(s): {}", located, seen)
                } else {
                    seen
                };
                Err(VerifyError::Mismatch {
                    entity: check.entity.to_string(),
                    channel: check.read_channel.to_string(),
                    predicate: check.predicate.description().to_string(),
                    attempts,
                    last_seen: seen,
                })
            }
            other => Err(ConsistencyTimeoutError {
                entity: check.entity.to_string(),
                channel: check.read_channel.to_string(),
                attempts,
                elapsed_ms,
                last_seen: other.describe(),
            }
            .into()),
        }
    }

    /// Poll until the entity can no longer be located on the channel
    pub async fn verify_absent(&self, check: &ConsistencyCheck) -> Result<VerifiedAbsence, VerifyError> {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        let last_error = loop {
            attempts += 1;
            let failure = match self.reader.read(&check.read_channel, &check.entity).await {
                Ok(records) => {
                    if reader::locate(&check.entity, &records).is_empty() {
                        let elapsed = start.elapsed();
                        info!(
                            "{} gone from {} after {} attempt(s)",
                            check.entity, check.read_channel, attempts
                        );
                        return Ok(VerifiedAbsence { attempts, elapsed });
                    }
                    None
                }
                Err(e @ ReadError::Unsupported { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!("Read via {} failed: {}", check.read_channel, e);
                    Some(e)
                }
            };

            let elapsed = start.elapsed();
            if elapsed >= check.timeout_budget {
                break failure;
            }
            tokio::time::sleep(check.poll_interval.min(check.timeout_budget - elapsed)).await;
        };

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(VerifyError::StillPresent {
                entity: check.entity.to_string(),
                channel: check.read_channel.to_string(),
                attempts,
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }
}

fn summarize(records: &[&Record]) -> String {
    const MAX: usize = 300;
    let text = records
        .iter()
        .map(|record| serde_json::Value::Object((*record).clone()).to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if text.chars().count() <= MAX {
        text
    } else {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    }
}
