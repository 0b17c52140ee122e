use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::patterns::{NUM, TICKER, clean_label, is_ticker, parse_amount};
use super::{FactRecognizer, RecognizedFact};
use crate::fact::FactKind;

/// Share counts the user states for a position.
pub struct HoldingRecognizer;

/// `10 shares of Apple Inc. (AAPL)`
static NAMED_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b{NUM}[ \t]+shares?[ \t]+(?:of[ \t]+)?([A-Z][A-Za-z0-9&.,'\- ]{{0,60}}?)[ \t]*\({TICKER}\)"
    ))
    .expect("named holding regex should compile")
});

/// `10 shares of AAPL`
static BARE_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{NUM}[ \t]+shares?[ \t]+(?:of[ \t]+|in[ \t]+)?{TICKER}\b"))
        .expect("bare holding regex should compile")
});

/// `50 AAPL shares`
static TICKER_BEFORE_SHARES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{NUM}[ \t]+{TICKER}[ \t]+shares?\b"))
        .expect("ticker-first holding regex should compile")
});

/// `AAPL: 10 shares`, `Apple (AAPL) - 25 shares`
static LISTED_POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:([A-Z][A-Za-z0-9&.,' ]{{0,60}}?)\s*\({TICKER}\)|\b{TICKER})[ \t]*[:\-–]?[ \t]*{NUM}[ \t]+shares?\b"
    ))
    .expect("listed holding regex should compile")
});

impl FactRecognizer for HoldingRecognizer {
    fn kind(&self) -> FactKind {
        FactKind::Holding
    }

    fn recognize(&self, text: &str) -> Vec<RecognizedFact> {
        let mut found = Vec::new();

        for caps in NAMED_POSITION.captures_iter(text) {
            push(&mut found, &caps, &caps[3], &caps[1], caps.get(2).map(|m| m.as_str()));
        }
        for caps in BARE_POSITION.captures_iter(text) {
            push(&mut found, &caps, &caps[2], &caps[1], None);
        }
        for caps in TICKER_BEFORE_SHARES.captures_iter(text) {
            push(&mut found, &caps, &caps[2], &caps[1], None);
        }
        for caps in LISTED_POSITION.captures_iter(text) {
            let ticker = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            if let Some(ticker) = ticker {
                push(&mut found, &caps, ticker, &caps[4], caps.get(1).map(|m| m.as_str()));
            }
        }

        found.sort_by_key(|f| f.offset);
        found
    }
}

fn push(
    found: &mut Vec<RecognizedFact>,
    caps: &Captures<'_>,
    ticker: &str,
    amount: &str,
    label: Option<&str>,
) {
    if !is_ticker(ticker) {
        return;
    }
    let Some(value) = parse_amount(amount) else {
        return;
    };
    let offset = caps.get(0).map_or(0, |m| m.start());
    if found.iter().any(|f| f.offset == offset && f.subject == ticker) {
        return;
    }
    found.push(RecognizedFact {
        subject: ticker.to_string(),
        value,
        label: label.and_then(clean_label),
        offset,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holdings(text: &str) -> Vec<(String, f64, Option<String>)> {
        HoldingRecognizer
            .recognize(text)
            .into_iter()
            .map(|f| (f.subject, f.value, f.label))
            .collect()
    }

    #[test]
    fn named_position_keeps_company_label() {
        assert_eq!(
            holdings("I own 10 shares of Apple Inc. (AAPL)"),
            vec![("AAPL".into(), 10.0, Some("Apple Inc.".into()))]
        );
    }

    #[test]
    fn bare_and_ticker_first_positions() {
        assert_eq!(
            holdings("I bought 2,500 shares of MSFT and hold 12.5 NVDA shares"),
            vec![
                ("MSFT".into(), 2500.0, None),
                ("NVDA".into(), 12.5, None)
            ]
        );
    }

    #[test]
    fn listed_positions() {
        let found = holdings("Positions:\nTSLA: 40 shares\nAlphabet (GOOG) - 8 shares");
        assert_eq!(
            found,
            vec![
                ("TSLA".into(), 40.0, None),
                ("GOOG".into(), 8.0, Some("Alphabet".into()))
            ]
        );
    }

    #[test]
    fn share_counts_without_a_ticker_are_ignored() {
        assert!(holdings("I sold 10 shares last week").is_empty());
        assert!(holdings("10 shares of IT stocks").is_empty());
    }
}
