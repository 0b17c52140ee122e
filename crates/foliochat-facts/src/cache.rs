//! Per-conversation fact cache with kind-specific time-to-live.
//!
//! Prices and computed totals go stale after five minutes, fundamentals after
//! an hour, and holdings after a day. Holdings are user-declared positions that
//! rarely change; refetching them as often as prices would only add external
//! calls.
//!
//! Only values a fetch produced or confirmed are stored as cache entries. A
//! value that so far has only been stated in conversation keeps conversation
//! provenance in the session, and is always listed for refresh.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fact::{Fact, FactKind, Provenance, normalize_subject};
use crate::reconcile::{FactSource, ReconciliationResult};

/// Time-to-live for a fact kind.
pub fn ttl_for(kind: FactKind) -> TimeDelta {
    match kind {
        FactKind::Price | FactKind::TotalValue => TimeDelta::minutes(5),
        FactKind::Metric => TimeDelta::minutes(60),
        FactKind::Holding => TimeDelta::hours(24),
    }
}

/// `now - observed_at > TTL[kind]`.
pub fn is_stale(fact: &Fact, now: DateTime<Utc>) -> bool {
    fact.age(now) > ttl_for(fact.kind)
}

/// Persisted per-conversation aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub prices: BTreeMap<String, Fact>,
    pub holdings: BTreeMap<String, Fact>,
    pub totals: BTreeMap<String, Fact>,
    pub metrics: BTreeMap<String, Fact>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    pub last_updated: Option<DateTime<Utc>>,
    pub turn_count: u64,
    pub portfolio_id: Option<String>,
}

impl SessionState {
    pub fn facts(&self, kind: FactKind) -> &BTreeMap<String, Fact> {
        match kind {
            FactKind::Price => &self.prices,
            FactKind::Holding => &self.holdings,
            FactKind::TotalValue => &self.totals,
            FactKind::Metric => &self.metrics,
        }
    }

    fn facts_mut(&mut self, kind: FactKind) -> &mut BTreeMap<String, Fact> {
        match kind {
            FactKind::Price => &mut self.prices,
            FactKind::Holding => &mut self.holdings,
            FactKind::TotalValue => &mut self.totals,
            FactKind::Metric => &mut self.metrics,
        }
    }

    pub fn get(&self, subject: &str, kind: FactKind) -> Option<&Fact> {
        self.facts(kind).get(&normalize_subject(subject))
    }

    /// Insert or replace the fact for its subject and kind.
    pub fn insert(&mut self, fact: Fact) {
        self.facts_mut(fact.kind)
            .insert(fact.subject_key.clone(), fact);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        FactKind::ALL
            .into_iter()
            .flat_map(move |kind| self.facts(kind).values())
    }

    pub fn len(&self) -> usize {
        FactKind::ALL
            .iter()
            .map(|kind| self.facts(*kind).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which requested subjects need an external fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshNeeds {
    /// Missing from the cache or past TTL.
    pub stale: Vec<String>,
    /// Present and within TTL.
    pub fresh: Vec<String>,
}

/// Session cache over a loaded [`SessionState`].
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    state: SessionState,
}

impl SessionCache {
    pub fn new(state: SessionState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn into_state(self) -> SessionState {
        self.state
    }

    /// Stored fact for a subject, tagged with cache provenance unless it was
    /// only ever stated in conversation.
    pub fn lookup(&self, subject: &str, kind: FactKind) -> Option<Fact> {
        self.state.get(subject, kind).map(as_cached)
    }

    pub fn facts_of(&self, kind: FactKind) -> Vec<Fact> {
        self.state.facts(kind).values().map(as_cached).collect()
    }

    pub fn all_facts(&self) -> Vec<Fact> {
        self.state.iter().map(as_cached).collect()
    }

    /// Partition `subjects` into those that must be refetched and those still fresh.
    /// Duplicates are collapsed, first occurrence order is kept.
    pub fn get_refresh_needs(
        &self,
        subjects: &[String],
        kind: FactKind,
        now: DateTime<Utc>,
    ) -> RefreshNeeds {
        let mut needs = RefreshNeeds::default();
        for subject in subjects {
            let subject = normalize_subject(subject);
            if subject.is_empty()
                || needs.stale.contains(&subject)
                || needs.fresh.contains(&subject)
            {
                continue;
            }
            match self.state.get(&subject, kind) {
                Some(fact) if is_verified(fact) && !is_stale(fact, now) => {
                    needs.fresh.push(subject)
                }
                _ => needs.stale.push(subject),
            }
        }
        debug!(
            kind = %kind,
            stale = needs.stale.len(),
            fresh = needs.fresh.len(),
            "computed refresh needs"
        );
        needs
    }

    /// Fold a turn's reconciled facts back into the session.
    ///
    /// Facts keep the observation time the reconciler chose. Conversation-only
    /// values stay unverified.
    pub fn absorb(&mut self, result: &ReconciliationResult, now: DateTime<Utc>) {
        for merged in result.merged.values() {
            let mut fact = merged.fact.clone();
            fact.provenance = match merged.source {
                FactSource::Conversation => Provenance::Conversation,
                FactSource::Confirmed | FactSource::Cache | FactSource::Api => Provenance::Cache,
            };
            if fact.turn_index.is_none() {
                fact.turn_index = merged.first_stated_turn;
            }
            self.state.insert(fact);
        }
        self.state.metadata.last_updated = Some(now);
        self.state.metadata.turn_count += 1;
    }

    pub fn set_portfolio_id(&mut self, portfolio_id: Option<String>) {
        if portfolio_id.is_some() {
            self.state.metadata.portfolio_id = portfolio_id;
        }
    }
}

fn is_verified(fact: &Fact) -> bool {
    fact.provenance != Provenance::Conversation
}

fn as_cached(fact: &Fact) -> Fact {
    let mut fact = fact.clone();
    if is_verified(&fact) {
        fact.provenance = Provenance::Cache;
    }
    fact
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciler;

    fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
        now - TimeDelta::minutes(minutes)
    }

    #[test]
    fn price_older_than_five_minutes_is_stale_but_holding_is_not() {
        let now = Utc::now();
        let mut state = SessionState::default();
        state.insert(Fact::price("AAPL", 150.0, minutes_ago(now, 6), Provenance::Api));
        state.insert(Fact::holding("AAPL", 10.0, minutes_ago(now, 6), Provenance::Cache));
        let cache = SessionCache::new(state);

        let subjects = vec!["AAPL".to_string()];
        let prices = cache.get_refresh_needs(&subjects, FactKind::Price, now);
        assert_eq!(prices.stale, vec!["AAPL"]);
        assert!(prices.fresh.is_empty());

        let holdings = cache.get_refresh_needs(&subjects, FactKind::Holding, now);
        assert!(holdings.stale.is_empty());
        assert_eq!(holdings.fresh, vec!["AAPL"]);
    }

    #[test]
    fn missing_subjects_need_refresh_and_duplicates_collapse() {
        let now = Utc::now();
        let mut state = SessionState::default();
        state.insert(Fact::price("MSFT", 410.0, minutes_ago(now, 1), Provenance::Api));
        let cache = SessionCache::new(state);

        let subjects = vec!["msft".into(), "NVDA".into(), "nvda".into(), "".into()];
        let needs = cache.get_refresh_needs(&subjects, FactKind::Price, now);
        assert_eq!(needs.fresh, vec!["MSFT"]);
        assert_eq!(needs.stale, vec!["NVDA"]);
    }

    #[test]
    fn ttl_boundaries_per_kind() {
        let now = Utc::now();
        let exactly_five = Fact::price("AAPL", 1.0, minutes_ago(now, 5), Provenance::Api);
        assert!(!is_stale(&exactly_five, now));

        let metric = Fact::metric("AAPL", "pe", 30.0, minutes_ago(now, 59), Provenance::Api);
        assert!(!is_stale(&metric, now));
        let metric = Fact::metric("AAPL", "pe", 30.0, minutes_ago(now, 61), Provenance::Api);
        assert!(is_stale(&metric, now));

        let total = Fact::total_value(1000.0, minutes_ago(now, 6), Provenance::Api);
        assert!(is_stale(&total, now));
    }

    #[test]
    fn lookups_report_cache_provenance() {
        let now = Utc::now();
        let mut state = SessionState::default();
        state.insert(Fact::price("AAPL", 150.0, now, Provenance::Api));
        let cache = SessionCache::new(state);
        assert_eq!(
            cache.lookup("aapl", FactKind::Price).unwrap().provenance,
            Provenance::Cache
        );
        assert!(cache.lookup("AAPL", FactKind::Holding).is_none());
    }

    #[test]
    fn absorb_folds_merged_facts_and_bumps_metadata() {
        let now = Utc::now();
        let conversation =
            vec![Fact::holding("AAPL", 10.0, now, Provenance::Conversation).with_turn(2)];
        let fresh = vec![Fact::price("AAPL", 155.0, now, Provenance::Api)];
        let result = Reconciler::new().reconcile(&conversation, &[], &fresh, now);

        let mut cache = SessionCache::default();
        cache.absorb(&result, now);

        let state = cache.state();
        assert_eq!(state.len(), 2);
        assert_eq!(state.metadata.turn_count, 1);
        assert_eq!(state.metadata.last_updated, Some(now));
        let holding = state.get("AAPL", FactKind::Holding).unwrap();
        assert_eq!(holding.provenance, Provenance::Conversation);
        assert_eq!(holding.turn_index, Some(2));
        let price = state.get("AAPL", FactKind::Price).unwrap();
        assert_eq!(price.provenance, Provenance::Cache);
    }

    #[test]
    fn conversation_values_never_count_as_fresh() {
        let now = Utc::now();
        let conversation =
            vec![Fact::price("AAPL", 150.0, now, Provenance::Conversation).with_turn(0)];
        let result = Reconciler::new().reconcile(&conversation, &[], &[], now);

        let mut cache = SessionCache::default();
        cache.absorb(&result, now);

        let needs = cache.get_refresh_needs(&["AAPL".to_string()], FactKind::Price, now);
        assert_eq!(needs.stale, vec!["AAPL"]);
        assert!(needs.fresh.is_empty());
        assert_eq!(
            cache.lookup("AAPL", FactKind::Price).unwrap().provenance,
            Provenance::Conversation
        );
        assert_eq!(cache.state().get("AAPL", FactKind::Price).unwrap().observed_at, now);

        // Once a fetch confirms it, the value is an ordinary cache entry.
        let later = now + TimeDelta::minutes(1);
        let fetched = vec![Fact::price("AAPL", 150.0, later, Provenance::Api)];
        let confirmed = Reconciler::new().reconcile(&[], &cache.all_facts(), &fetched, later);
        cache.absorb(&confirmed, later);
        let needs = cache.get_refresh_needs(&["AAPL".to_string()], FactKind::Price, later);
        assert_eq!(needs.fresh, vec!["AAPL"]);
    }

    #[test]
    fn session_state_survives_json() {
        let now = Utc::now();
        let mut state = SessionState::default();
        state.insert(Fact::total_value(45_000.0, now, Provenance::Api));
        state.metadata.portfolio_id = Some("retirement".into());
        let raw = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, state);
    }
}
