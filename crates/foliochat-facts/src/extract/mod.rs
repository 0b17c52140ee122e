//! Recover facts stated in earlier turns of a conversation.
//!
//! Turns are scanned oldest to newest and only the first statement of each
//! subject and kind is kept. The assistant's earlier figure is what the user is
//! relying on; a later restatement may be a hallucinated drift and must not
//! replace it.

mod holding;
mod patterns;
mod price;
mod total;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use foliochat_common::{ConversationTurn, TurnRole};
use tracing::debug;

use crate::fact::{Fact, FactKey, FactKind, Provenance};

pub use holding::HoldingRecognizer;
pub use price::PriceRecognizer;
pub use total::TotalValueRecognizer;

/// A match produced by a recognizer, before it is tied to a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFact {
    pub subject: String,
    pub value: f64,
    pub label: Option<String>,
    /// Byte offset of the match in the scanned text.
    pub offset: usize,
}

/// One pattern family for one fact kind.
pub trait FactRecognizer: Send + Sync {
    fn kind(&self) -> FactKind;

    /// All matches in `text`, ordered by position.
    fn recognize(&self, text: &str) -> Vec<RecognizedFact>;
}

pub struct ConversationFactExtractor {
    recognizers: Vec<Box<dyn FactRecognizer>>,
}

impl Default for ConversationFactExtractor {
    fn default() -> Self {
        Self::with_recognizers(vec![
            Box::new(PriceRecognizer),
            Box::new(HoldingRecognizer),
            Box::new(TotalValueRecognizer),
        ])
    }
}

impl ConversationFactExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizers(recognizers: Vec<Box<dyn FactRecognizer>>) -> Self {
        Self { recognizers }
    }

    /// Extract first-mention facts from `turns`.
    ///
    /// Facts are observed at the turn's timestamp, or at `now` when the turn
    /// carries none. System turns are skipped.
    pub fn extract(&self, turns: &[ConversationTurn], now: DateTime<Utc>) -> Vec<Fact> {
        let mut seen: HashSet<FactKey> = HashSet::new();
        let mut facts = Vec::new();

        for (turn_index, turn) in turns.iter().enumerate() {
            if turn.role == TurnRole::System {
                continue;
            }
            let observed_at = turn.timestamp.unwrap_or(now);
            for recognizer in &self.recognizers {
                for found in recognizer.recognize(&turn.content) {
                    let mut fact = Fact::new(
                        &found.subject,
                        recognizer.kind(),
                        found.value,
                        observed_at,
                        Provenance::Conversation,
                    )
                    .with_turn(turn_index);
                    fact.label = found.label;

                    if seen.insert(fact.key()) {
                        facts.push(fact);
                    }
                }
            }
        }

        debug!(
            turns = turns.len(),
            facts = facts.len(),
            "extracted conversation facts"
        );
        facts
    }
}

/// Tickers mentioned anywhere in `text`, in order, without duplicates.
///
/// Used to find the subjects a new user message asks about.
pub fn mentioned_tickers(text: &str) -> Vec<String> {
    patterns::mentioned_tickers(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mention_wins() {
        let turns = vec![
            ConversationTurn::assistant("AAPL: $150"),
            ConversationTurn::assistant("AAPL: $160"),
        ];
        let facts = ConversationFactExtractor::new().extract(&turns, Utc::now());
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].subject_key, "AAPL");
        assert_eq!(facts[0].value, 150.0);
        assert_eq!(facts[0].turn_index, Some(0));
        assert_eq!(facts[0].provenance, Provenance::Conversation);
    }

    #[test]
    fn kinds_are_tracked_independently() {
        let turns = vec![
            ConversationTurn::user("I own 10 shares of Apple Inc. (AAPL)"),
            ConversationTurn::assistant(
                "AAPL: $150.25, so your total portfolio value is $1,502.50",
            ),
        ];
        let facts = ConversationFactExtractor::new().extract(&turns, Utc::now());
        let kinds: Vec<FactKind> = facts.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![FactKind::Holding, FactKind::Price, FactKind::TotalValue]
        );
        assert_eq!(facts[0].label.as_deref(), Some("Apple Inc."));
        assert_eq!(facts[1].value, 150.25);
        assert_eq!(facts[2].value, 1502.5);
        assert_eq!(facts[2].turn_index, Some(1));
    }

    #[test]
    fn turn_timestamps_become_observation_times() {
        let stated = Utc::now() - chrono::TimeDelta::minutes(30);
        let turns = vec![ConversationTurn::assistant("MSFT: $410").at(stated)];
        let facts = ConversationFactExtractor::new().extract(&turns, Utc::now());
        assert_eq!(facts[0].observed_at, stated);
    }

    #[test]
    fn system_turns_and_plain_text_yield_nothing() {
        let turns = vec![
            ConversationTurn {
                role: TurnRole::System,
                content: "AAPL: $1".into(),
                timestamp: None,
            },
            ConversationTurn::user("how is the market today?"),
        ];
        assert!(
            ConversationFactExtractor::new()
                .extract(&turns, Utc::now())
                .is_empty()
        );
    }

    #[test]
    fn mentioned_tickers_skips_common_words() {
        assert_eq!(
            mentioned_tickers("Should I buy NVDA or AMD? I think the CEO of NVDA is great"),
            vec!["NVDA", "AMD"]
        );
    }
}
