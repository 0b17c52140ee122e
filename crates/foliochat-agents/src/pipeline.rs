//! The per-turn sequence: extract, look up, fetch, reconcile, prompt, invoke,
//! persist.

use std::sync::Arc;

use chrono::Utc;
use foliochat_common::{ConversationTurn, Error, Result, SessionId};
use foliochat_db::SessionStateStore;
use foliochat_facts::extract::mentioned_tickers;
use foliochat_facts::{
    ConversationFactExtractor, Fact, FactFetcher, FactKind, ReconciliationResult, Reconciler,
    SessionCache, SessionState, fetch_all, portfolio_subject,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::context::OrchestrationContext;
use crate::invoker::{InvokeRequest, Invoker};
use crate::portfolio::{Clarification, PortfolioCandidate, PortfolioResolution, resolve_portfolio};
use crate::prompt::build_system_prompt;
use crate::providers::ChatMessage;
use crate::relay::{DeltaSender, StreamDelta};

/// What the HTTP layer hands over for one user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInput {
    pub session_id: SessionId,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub portfolio_id: Option<String>,
    #[serde(default)]
    pub portfolios: Vec<PortfolioCandidate>,
}

impl TurnInput {
    pub fn new(session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            history: Vec::new(),
            portfolio_id: None,
            portfolios: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TurnUsage {
    pub input: u32,
    pub output: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub content: String,
    /// Empty when no provider was called.
    pub provider_used: String,
    pub usage: TurnUsage,
    pub facts_used: ReconciliationResult,
    pub session_state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification: Option<Clarification>,
}

pub struct OrchestrationPipeline {
    invoker: Invoker,
    store: Arc<dyn SessionStateStore>,
    fetchers: Vec<Box<dyn FactFetcher>>,
    extractor: ConversationFactExtractor,
    reconciler: Reconciler,
}

impl OrchestrationPipeline {
    pub fn new(context: Arc<OrchestrationContext>, store: Arc<dyn SessionStateStore>) -> Self {
        Self {
            invoker: context.invoker(),
            store,
            fetchers: Vec::new(),
            extractor: ConversationFactExtractor::new(),
            reconciler: Reconciler::new(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn FactFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    pub fn with_extractor(mut self, extractor: ConversationFactExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn context(&self) -> &Arc<OrchestrationContext> {
        self.invoker.context()
    }

    /// Run one turn. Session state is saved only after the provider call
    /// succeeds, so a failed or cancelled turn leaves the stored state as it was.
    #[instrument(skip(self, input, sink), fields(session = %input.session_id))]
    pub async fn run_turn(
        &self,
        input: &TurnInput,
        sink: Option<&DeltaSender>,
    ) -> Result<TurnOutcome> {
        let now = Utc::now();

        let mut turns = input.history.clone();
        turns.push(ConversationTurn::user(input.message.clone()).at(now));
        let conversation = self.extractor.extract(&turns, now);

        let state = self
            .store
            .load(&input.session_id)
            .await?
            .unwrap_or_default();
        let mut cache = SessionCache::new(state);
        let remembered = cache.state().metadata.portfolio_id.clone();

        let resolution = resolve_portfolio(
            input.portfolio_id.as_deref(),
            &input.portfolios,
            remembered.as_deref(),
        );
        let portfolio = match resolution {
            PortfolioResolution::NeedsClarification(clarification) => {
                return self.ask_for_portfolio(clarification, cache.into_state(), sink).await;
            }
            PortfolioResolution::Selected(candidate) => Some(candidate),
            PortfolioResolution::Unspecified => None,
        };

        let selected_id = portfolio.as_ref().map(|p| p.id.as_str());
        let switched = matches!(
            (selected_id, remembered.as_deref()),
            (Some(current), Some(before)) if current != before
        );
        let total_subject = portfolio_subject(selected_id);
        let conversation =
            scope_totals(conversation, &total_subject, switched, input.history.len());

        let mut fresh = self.fetch_fresh(&input.message, &conversation, &cache, now).await;
        if let Some(total) = portfolio.as_ref().and_then(|p| p.total_fact(now)) {
            fresh.push(total);
        }

        // Totals cached for other portfolios of this session are left out.
        let prior: Vec<Fact> = cache
            .all_facts()
            .into_iter()
            .filter(|f| f.kind != FactKind::TotalValue || f.subject_key == total_subject)
            .collect();

        let facts = self.reconciler.reconcile(&conversation, &prior, &fresh, now);
        info!(
            changed = facts.changed.len(),
            preserved = facts.preserved.len(),
            fresh = facts.fresh.len(),
            "facts reconciled"
        );

        let mut messages: Vec<ChatMessage> = input.history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(input.message.clone()));
        let request = InvokeRequest {
            messages,
            system: Some(build_system_prompt(&facts, portfolio.as_ref())),
            ..Default::default()
        };
        let completion = self.invoker.invoke(&request, None, sink).await?;

        cache.absorb(&facts, now);
        cache.set_portfolio_id(portfolio.map(|p| p.id));
        let session_state = cache.into_state();
        self.store.save(&input.session_id, &session_state).await?;

        Ok(TurnOutcome {
            content: completion.content,
            provider_used: completion.provider_used,
            usage: TurnUsage {
                input: completion.usage.input_tokens,
                output: completion.usage.output_tokens,
                total: completion.usage.total(),
            },
            facts_used: facts,
            session_state,
            clarification: None,
        })
    }

    /// Fetch every kind concurrently, each for the subjects the cache cannot
    /// answer. Failed fetchers are already logged by the fan-out.
    async fn fetch_fresh(
        &self,
        message: &str,
        conversation: &[Fact],
        cache: &SessionCache,
        now: chrono::DateTime<Utc>,
    ) -> Vec<Fact> {
        let mut priced = mentioned_tickers(message);
        priced.extend(
            conversation
                .iter()
                .filter(|f| f.kind == FactKind::Holding)
                .map(|f| f.subject_key.clone()),
        );
        priced.extend(cache.state().holdings.keys().cloned());

        let plans: Vec<(FactKind, Vec<String>)> = FactKind::ALL
            .into_iter()
            .map(|kind| {
                let requested: &[String] = if kind == FactKind::Price { &priced } else { &[] };
                let plan = self
                    .reconciler
                    .plan_fetch(requested, kind, conversation, cache, now);
                debug!(
                    kind = %kind,
                    known = plan.known.len(),
                    to_fetch = plan.to_fetch.len(),
                    "fetch plan"
                );
                (kind, plan.to_fetch)
            })
            .collect();

        let fetchers = &self.fetchers;
        let reports = join_all(
            plans
                .iter()
                .map(|(kind, subjects)| fetch_all(fetchers, subjects, *kind)),
        )
        .await;

        reports.into_iter().flat_map(|report| report.facts).collect()
    }

    async fn ask_for_portfolio(
        &self,
        clarification: Clarification,
        session_state: SessionState,
        sink: Option<&DeltaSender>,
    ) -> Result<TurnOutcome> {
        info!(options = clarification.options.len(), "portfolio is ambiguous, asking the user");
        if let Some(sink) = sink {
            sink.send(StreamDelta::text(clarification.question.clone()))
                .await
                .map_err(|_| Error::Cancelled)?;
        }
        Ok(TurnOutcome {
            content: clarification.question.clone(),
            provider_used: String::new(),
            usage: TurnUsage::default(),
            facts_used: ReconciliationResult::default(),
            session_state,
            clarification: Some(clarification),
        })
    }
}

/// Attach conversation totals to `subject`, the selected portfolio's total.
///
/// After a portfolio switch, totals stated in earlier turns describe the
/// previous portfolio and are dropped; a total in the current message is kept.
fn scope_totals(
    conversation: Vec<Fact>,
    subject: &str,
    switched: bool,
    current_turn: usize,
) -> Vec<Fact> {
    conversation
        .into_iter()
        .filter_map(|mut fact| {
            if fact.kind != FactKind::TotalValue {
                return Some(fact);
            }
            if switched && fact.turn_index.is_some_and(|turn| turn < current_turn) {
                return None;
            }
            fact.subject_key = subject.to_string();
            Some(fact)
        })
        .collect()
}
