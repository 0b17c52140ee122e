use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::patterns::{NUM, parse_amount};
use super::{FactRecognizer, RecognizedFact};
use crate::fact::{FactKind, PORTFOLIO_SUBJECT};

/// Whole-portfolio values such as "your total portfolio value is $45,000".
pub struct TotalValueRecognizer;

const SUFFIX: &str = r"(?:[ \t]?(thousand|million|billion|k|m|b))?\b";

static TOTAL_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\btotal[ \t]+(?:portfolio[ \t]+)?(?:value|worth|balance)\b[^$\n]{{0,40}}?\$[ \t]?{NUM}{SUFFIX}"
    ))
    .expect("total value regex should compile")
});

static WORTH_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bportfolio[ \t]+(?:is[ \t]+)?(?:currently[ \t]+|now[ \t]+)?(?:worth|valued[ \t]+at|value[ \t]+is|value:)[ \t]+(?:about[ \t]+|approximately[ \t]+|roughly[ \t]+|around[ \t]+)?\$[ \t]?{NUM}{SUFFIX}"
    ))
    .expect("portfolio worth regex should compile")
});

impl FactRecognizer for TotalValueRecognizer {
    fn kind(&self) -> FactKind {
        FactKind::TotalValue
    }

    fn recognize(&self, text: &str) -> Vec<RecognizedFact> {
        let mut found: Vec<RecognizedFact> = TOTAL_FORM
            .captures_iter(text)
            .chain(WORTH_FORM.captures_iter(text))
            .filter_map(|caps| to_fact(&caps))
            .collect();
        found.sort_by_key(|f| f.offset);
        found
    }
}

fn to_fact(caps: &Captures<'_>) -> Option<RecognizedFact> {
    let base = parse_amount(caps.get(1)?.as_str())?;
    let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).as_deref() {
        Some("k" | "thousand") => 1_000.0,
        Some("m" | "million") => 1_000_000.0,
        Some("b" | "billion") => 1_000_000_000.0,
        _ => 1.0,
    };
    Some(RecognizedFact {
        subject: PORTFOLIO_SUBJECT.to_string(),
        value: base * multiplier,
        label: None,
        offset: caps.get(0)?.start(),
    })
}
