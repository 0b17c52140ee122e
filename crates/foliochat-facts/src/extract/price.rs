use std::sync::LazyLock;

use regex::Regex;

use super::patterns::{NUM, TICKER, is_ticker, parse_amount};
use super::{FactRecognizer, RecognizedFact};
use crate::fact::FactKind;

/// Words between `(TICKER)` and a dollar amount that mean the amount is not a price.
const NON_PRICE_CONTEXT: &[&str] = &["share", "worth", "valued", "value", "total", "position"];

/// Per-share prices stated next to a ticker.
///
/// Recognizes `AAPL: $150`, `Apple (AAPL) closed at $150` and
/// `AAPL is trading at $150`.
pub struct PriceRecognizer;

static COLON_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b{TICKER}\s*:\s*\$\s?{NUM}"))
        .expect("price colon regex should compile")
});

static PAREN_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\({TICKER}\)([^$\n]{{0,80}}?)\$\s?{NUM}"))
        .expect("price paren regex should compile")
});

static VERB_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b{TICKER}\s+(?:is\s+)?(?:currently\s+)?(?:trading\s+at|trades\s+at|priced\s+at|closed\s+at|at|is)\s+\$\s?{NUM}"
    ))
    .expect("price verb regex should compile")
});

impl FactRecognizer for PriceRecognizer {
    fn kind(&self) -> FactKind {
        FactKind::Price
    }

    fn recognize(&self, text: &str) -> Vec<RecognizedFact> {
        let mut found = Vec::new();

        for caps in COLON_FORM.captures_iter(text) {
            push_match(&mut found, caps.get(0).map_or(0, |m| m.start()), &caps[1], &caps[2]);
        }

        for caps in PAREN_FORM.captures_iter(text) {
            let gap = caps[2].to_ascii_lowercase();
            if NON_PRICE_CONTEXT.iter().any(|word| gap.contains(word)) {
                continue;
            }
            push_match(&mut found, caps.get(0).map_or(0, |m| m.start()), &caps[1], &caps[3]);
        }

        for caps in VERB_FORM.captures_iter(text) {
            push_match(&mut found, caps.get(0).map_or(0, |m| m.start()), &caps[1], &caps[2]);
        }

        found.sort_by_key(|f| f.offset);
        found
    }
}

fn push_match(found: &mut Vec<RecognizedFact>, offset: usize, ticker: &str, amount: &str) {
    if !is_ticker(ticker) {
        return;
    }
    if let Some(value) = parse_amount(amount) {
        found.push(RecognizedFact {
            subject: ticker.to_string(),
            value,
            label: None,
            offset,
        });
    }
}
