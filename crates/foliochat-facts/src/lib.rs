//! Conversational data consistency: facts stated in prior turns, facts held in
//! the per-session cache, and freshly fetched facts are merged here into one
//! authoritative view with provenance and change annotations.

pub mod cache;
pub mod extract;
pub mod fact;
pub mod fetch;
pub mod reconcile;

pub use cache::{RefreshNeeds, SessionCache, SessionMetadata, SessionState, is_stale, ttl_for};
pub use extract::{ConversationFactExtractor, FactRecognizer, RecognizedFact};
pub use fact::{Fact, FactKey, FactKind, PORTFOLIO_SUBJECT, Provenance, portfolio_subject};
pub use fetch::{FactFetcher, FetchReport, HttpQuoteFetcher, PartialFactSet, fetch_all};
pub use reconcile::{
    Classification, FactSource, FetchPlan, MergedFact, ReconciliationResult, Reconciler,
};
