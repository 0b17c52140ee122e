//! External fact sources.
//!
//! Each fetcher is queried only for subjects the session cache cannot answer.
//! Fetchers run concurrently and fail independently: a failed fetcher leaves
//! its subjects to the prior values, which the reconciler flags as stale.

mod quotes;

use async_trait::async_trait;
use foliochat_common::Result;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::fact::{Fact, FactKind, Provenance};

pub use quotes::HttpQuoteFetcher;

/// Facts a single fetcher returned; subjects it could not resolve are absent.
pub type PartialFactSet = Vec<Fact>;

#[async_trait]
pub trait FactFetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Fact kinds this fetcher can produce.
    fn kinds(&self) -> &[FactKind];

    /// `Ok(None)` means the source had nothing for these subjects.
    async fn fetch(&self, subjects: &[String], kind: FactKind) -> Result<Option<PartialFactSet>>;
}

/// Combined output of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub facts: Vec<Fact>,
    /// Names of fetchers that returned an error.
    pub failed: Vec<String>,
}

/// Query every fetcher that serves `kind`, in parallel, and merge what came back.
///
/// Errors are logged and recorded in [`FetchReport::failed`]; they never fail
/// the whole fetch. Returned facts are stamped with API provenance.
pub async fn fetch_all(
    fetchers: &[Box<dyn FactFetcher>],
    subjects: &[String],
    kind: FactKind,
) -> FetchReport {
    let mut report = FetchReport::default();
    if subjects.is_empty() {
        return report;
    }

    let eligible: Vec<&dyn FactFetcher> = fetchers
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| f.kinds().contains(&kind))
        .collect();

    let outcomes = join_all(eligible.iter().map(|fetcher| async move {
        (fetcher.name().to_string(), fetcher.fetch(subjects, kind).await)
    }))
    .await;

    for (name, outcome) in outcomes {
        match outcome {
            Ok(Some(facts)) => {
                debug!(fetcher = %name, count = facts.len(), "fetched facts");
                report.facts.extend(facts.into_iter().map(|mut fact| {
                    fact.provenance = Provenance::Api;
                    fact.turn_index = None;
                    fact
                }));
            }
            Ok(None) => debug!(fetcher = %name, "fetcher returned no data"),
            Err(e) => {
                warn!(fetcher = %name, kind = %kind, error = %e, "fetch failed");
                report.failed.push(name);
            }
        }
    }
    report
}
