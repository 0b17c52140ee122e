//! System prompt assembly from the reconciled fact set.

use std::fmt::Write;

use foliochat_facts::{FactKind, MergedFact, ReconciliationResult};

use crate::portfolio::PortfolioCandidate;

const BASE_INSTRUCTIONS: &str = "You are a portfolio assistant. Answer questions about the \
user's holdings and market data using only the figures listed under 'Current data'. \
When a figure is marked as changed, say so and mention the previous value. When a \
figure is marked as possibly out of date, tell the user it could not be refreshed. \
Do not invent prices or share counts that are not listed.";

/// Render the instructions plus every merged fact, grouped by kind.
pub fn build_system_prompt(
    facts: &ReconciliationResult,
    portfolio: Option<&PortfolioCandidate>,
) -> String {
    let mut prompt = String::from(BASE_INSTRUCTIONS);

    if let Some(portfolio) = portfolio {
        let _ = write!(prompt, "\n\nPortfolio: {} ({})", portfolio.name, portfolio.id);
    }

    if facts.is_empty() {
        prompt.push_str("\n\nCurrent data: none available for this conversation.");
        return prompt;
    }

    prompt.push_str("\n\nCurrent data:");
    for kind in FactKind::ALL {
        let mut lines: Vec<String> = facts
            .facts()
            .filter(|m| m.fact.kind == kind)
            .map(describe)
            .collect();
        if lines.is_empty() {
            continue;
        }
        lines.sort();
        let _ = write!(prompt, "\n{}:", section_title(kind));
        for line in lines {
            let _ = write!(prompt, "\n- {line}");
        }
    }
    prompt
}

fn section_title(kind: FactKind) -> &'static str {
    match kind {
        FactKind::Price => "Prices",
        FactKind::Holding => "Holdings",
        FactKind::TotalValue => "Portfolio value",
        FactKind::Metric => "Metrics",
    }
}

fn describe(merged: &MergedFact) -> String {
    let fact = &merged.fact;
    let mut line = match fact.kind {
        FactKind::Price => format!("{}: {}", fact.subject_key, format_currency(fact.value)),
        FactKind::Holding => match &fact.label {
            Some(label) => format!(
                "{} ({label}): {} shares",
                fact.subject_key,
                format_quantity(fact.value)
            ),
            None => format!("{}: {} shares", fact.subject_key, format_quantity(fact.value)),
        },
        FactKind::TotalValue => format!("Total: {}", format_currency(fact.value)),
        FactKind::Metric => format!(
            "{} {}: {}",
            fact.subject_key,
            fact.label.as_deref().unwrap_or("value"),
            format_quantity(fact.value)
        ),
    };

    if let Some(previous) = merged.previous_value {
        let previous = match fact.kind {
            FactKind::Price | FactKind::TotalValue => format_currency(previous),
            FactKind::Holding | FactKind::Metric => format_quantity(previous),
        };
        match merged.change_percent {
            Some(pct) => {
                let _ = write!(line, " (changed from {previous}, {})", format_percent(pct));
            }
            None => {
                let _ = write!(line, " (changed from {previous})");
            }
        }
    }
    if merged.stale {
        line.push_str(" (may be out of date)");
    }
    line
}

/// `$1,502.50`, `-$12.00`
pub fn format_currency(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let cents = (value.abs() * 100.0).round() as u64;
    format!("{sign}${}.{:02}", group_thousands(cents / 100), cents % 100)
}

/// Share counts and metric values: grouped, at most four decimals, no trailing zeros.
pub fn format_quantity(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let scaled = (value.abs() * 10_000.0).round() as u64;
    let whole = group_thousands(scaled / 10_000);
    let frac = format!("{:04}", scaled % 10_000);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{sign}{whole}")
    } else {
        format!("{sign}{whole}.{frac}")
    }
}

/// `+3.33%`, `-0.50%`
pub fn format_percent(value: f64) -> String {
    format!("{value:+.2}%")
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use foliochat_facts::{Fact, Provenance, Reconciler};

    #[test]
    fn number_formatting() {
        assert_eq!(format_currency(1502.5), "$1,502.50");
        assert_eq!(format_currency(0.004), "$0.00");
        assert_eq!(format_currency(-12.0), "-$12.00");
        assert_eq!(format_quantity(2500.0), "2,500");
        assert_eq!(format_quantity(12.5), "12.5");
        assert_eq!(format_percent(3.3333), "+3.33%");
        assert_eq!(format_percent(-0.5), "-0.50%");
    }

    #[test]
    fn prompt_lists_changed_and_stale_facts() {
        let now = Utc::now();
        let cache = vec![
            Fact::price("AAPL", 150.0, now - TimeDelta::minutes(2), Provenance::Cache),
            Fact::price("MSFT", 400.0, now - TimeDelta::minutes(10), Provenance::Cache),
        ];
        let conversation = vec![
            Fact::holding("AAPL", 10.0, now, Provenance::Conversation)
                .with_label("Apple Inc.")
                .with_turn(0),
        ];
        let fresh = vec![Fact::price("AAPL", 155.0, now, Provenance::Api)];
        let result = Reconciler::new().reconcile(&conversation, &cache, &fresh, now);

        let prompt = build_system_prompt(&result, None);
        assert!(prompt.contains("Prices:\n- AAPL: $155.00 (changed from $150.00, +3.33%)"));
        assert!(prompt.contains("- MSFT: $400.00 (may be out of date)"));
        assert!(prompt.contains("Holdings:\n- AAPL (Apple Inc.): 10 shares"));
    }

    #[test]
    fn empty_fact_set_says_so() {
        let portfolio = PortfolioCandidate {
            id: "ira".into(),
            name: "Retirement".into(),
            total_value: None,
            updated_at: None,
        };
        let prompt = build_system_prompt(&ReconciliationResult::default(), Some(&portfolio));
        assert!(prompt.contains("Portfolio: Retirement (ira)"));
        assert!(prompt.ends_with("none available for this conversation."));
    }
}
