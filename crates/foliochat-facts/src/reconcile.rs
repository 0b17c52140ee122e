//! Merge conversation, cache and freshly fetched facts into one view.
//!
//! For every subject and kind there is at most one prior fact (the cached
//! value if any, otherwise the value stated in the conversation) and at most
//! one fresh fact. The pair decides the classification:
//!
//! | prior | fresh | result |
//! |-------|-------|--------|
//! | yes   | yes, differs beyond epsilon | changed, fresh value |
//! | yes   | yes, within epsilon | preserved, confirmed |
//! | yes   | no    | preserved, possibly stale |
//! | no    | yes   | fresh |

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{SessionCache, is_stale};
use crate::fact::{Fact, FactKey, FactKind, Provenance, values_match};

/// Which source the merged value was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Prior and fresh values agree.
    Confirmed,
    Conversation,
    Cache,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Changed,
    Preserved,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedFact {
    pub fact: Fact,
    pub source: FactSource,
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    /// Signed percentage change from `previous_value`. `None` when the previous
    /// value was zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_stated_turn: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub merged: BTreeMap<FactKey, MergedFact>,
    pub changed: BTreeSet<FactKey>,
    pub preserved: BTreeSet<FactKey>,
    pub fresh: BTreeSet<FactKey>,
}

impl ReconciliationResult {
    pub fn get(&self, subject: &str, kind: FactKind) -> Option<&MergedFact> {
        self.merged.get(&FactKey::new(subject, kind))
    }

    pub fn is_changed(&self, subject: &str, kind: FactKind) -> bool {
        self.changed.contains(&FactKey::new(subject, kind))
    }

    pub fn changed_subjects(&self, kind: FactKind) -> Vec<String> {
        self.changed
            .iter()
            .filter(|key| key.kind == kind)
            .map(|key| key.subject.clone())
            .collect()
    }

    pub fn facts(&self) -> impl Iterator<Item = &MergedFact> {
        self.merged.values()
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    fn insert(&mut self, key: FactKey, merged: MergedFact) {
        let bucket = match merged.classification {
            Classification::Changed => &mut self.changed,
            Classification::Preserved => &mut self.preserved,
            Classification::Fresh => &mut self.fresh,
        };
        bucket.insert(key.clone());
        self.merged.insert(key, merged);
    }
}

/// Subjects split by whether an external fetch is needed this turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    /// Cached and within TTL.
    pub known: Vec<String>,
    pub to_fetch: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Self
    }

    /// Decide which subjects of `kind` must be fetched.
    ///
    /// The candidates are the requested subjects plus every subject of that
    /// kind the conversation or the cache already knows about. A value stated
    /// in conversation is never trusted as current on its own, so only a
    /// fetched value still within TTL can mark a subject as known.
    pub fn plan_fetch(
        &self,
        requested: &[String],
        kind: FactKind,
        conversation: &[Fact],
        cache: &SessionCache,
        now: DateTime<Utc>,
    ) -> FetchPlan {
        let universe: Vec<String> = requested
            .iter()
            .cloned()
            .chain(
                conversation
                    .iter()
                    .filter(|fact| fact.kind == kind)
                    .map(|fact| fact.subject_key.clone()),
            )
            .chain(cache.state().facts(kind).keys().cloned())
            .collect();

        let needs = cache.get_refresh_needs(&universe, kind, now);
        FetchPlan {
            known: needs.fresh,
            to_fetch: needs.stale,
        }
    }

    pub fn reconcile(
        &self,
        conversation: &[Fact],
        cache: &[Fact],
        fresh: &[Fact],
        now: DateTime<Utc>,
    ) -> ReconciliationResult {
        let mut stated: BTreeMap<FactKey, &Fact> = BTreeMap::new();
        for fact in conversation {
            stated.entry(fact.key()).or_insert(fact);
        }

        let cached: BTreeMap<FactKey, &Fact> =
            cache.iter().map(|fact| (fact.key(), fact)).collect();

        // Duplicate fresh observations: the latest one wins.
        let mut fetched: BTreeMap<FactKey, &Fact> = BTreeMap::new();
        for fact in fresh {
            fetched
                .entry(fact.key())
                .and_modify(|current| {
                    if fact.observed_at > current.observed_at {
                        *current = fact;
                    }
                })
                .or_insert(fact);
        }

        let keys: BTreeSet<FactKey> = stated
            .keys()
            .chain(cached.keys())
            .chain(fetched.keys())
            .cloned()
            .collect();

        let mut result = ReconciliationResult::default();
        for key in keys {
            let conversation_fact = stated.get(&key).copied();
            let cache_fact = cached.get(&key).copied();
            let first_stated_turn = conversation_fact
                .and_then(|fact| fact.turn_index)
                .or_else(|| cache_fact.and_then(|fact| fact.turn_index));

            let prior = match (cache_fact, conversation_fact) {
                (Some(fact), _) if fact.provenance == Provenance::Conversation => {
                    Some((fact, FactSource::Conversation))
                }
                (Some(fact), _) => Some((fact, FactSource::Cache)),
                (None, Some(fact)) => Some((fact, FactSource::Conversation)),
                (None, None) => None,
            };

            let merged = match (prior, fetched.get(&key).copied()) {
                (Some((prior, _)), Some(fresh)) if !values_match(key.kind, prior.value, fresh.value) => {
                    MergedFact {
                        fact: fresh.clone(),
                        source: FactSource::Api,
                        classification: Classification::Changed,
                        previous_value: Some(prior.value),
                        change_percent: change_percent(prior.value, fresh.value),
                        stale: false,
                        first_stated_turn,
                    }
                }
                (Some((prior, _)), Some(fresh)) => {
                    let mut fact = prior.clone();
                    fact.value = fresh.value;
                    fact.observed_at = fresh.observed_at;
                    MergedFact {
                        fact,
                        source: FactSource::Confirmed,
                        classification: Classification::Preserved,
                        previous_value: None,
                        change_percent: None,
                        stale: false,
                        first_stated_turn,
                    }
                }
                (Some((prior, source)), None) => MergedFact {
                    fact: prior.clone(),
                    source,
                    classification: Classification::Preserved,
                    previous_value: None,
                    change_percent: None,
                    stale: is_stale(prior, now),
                    first_stated_turn,
                },
                (None, Some(fresh)) => MergedFact {
                    fact: fresh.clone(),
                    source: FactSource::Api,
                    classification: Classification::Fresh,
                    previous_value: None,
                    change_percent: None,
                    stale: false,
                    first_stated_turn,
                },
                (None, None) => continue,
            };
            result.insert(key, merged);
        }

        debug!(
            merged = result.merged.len(),
            changed = result.changed.len(),
            preserved = result.preserved.len(),
            fresh = result.fresh.len(),
            "reconciled facts"
        );
        result
    }
}

fn change_percent(previous: f64, current: f64) -> Option<f64> {
    if previous == 0.0 {
        return None;
    }
    Some((current - previous) / previous.abs() * 100.0)
}
