use std::sync::LazyLock;

use regex::Regex;

/// `1,234.56` or `1234.56`.
pub(super) const NUM: &str = r"([0-9]{1,3}(?:,[0-9]{3})+(?:\.[0-9]+)?|[0-9]+(?:\.[0-9]+)?)";

/// `AAPL`, `BRK.B`, `RDS-A`.
pub(super) const TICKER: &str = r"([A-Z]{1,5}(?:[.\-][A-Z]{1,2})?)";

/// Uppercase words that show up in financial prose but are not tickers.
const NOT_TICKERS: &[&str] = &[
    "A", "I", "AI", "AM", "AN", "AND", "ARE", "AS", "AT", "BE", "BUT", "BUY", "BY", "CEO", "CFO",
    "DO", "EPS", "ETF", "ETFS", "EUR", "FAQ", "FOR", "GBP", "GDP", "HOLD", "IF", "IN", "IPO",
    "IRA", "IS", "IT", "MY", "NO", "NOT", "NOTE", "OF", "OK", "ON", "OR", "PE", "Q1", "Q2", "Q3",
    "Q4", "ROI", "SEC", "SELL", "SO", "THE", "TO", "TOTAL", "UK", "US", "USA", "USD", "VS", "WE",
    "YOY", "YTD",
];

pub(super) fn is_ticker(candidate: &str) -> bool {
    !candidate.is_empty() && !NOT_TICKERS.contains(&candidate)
}

/// Parse a matched amount, dropping thousands separators.
pub(super) fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(super) fn clean_label(raw: &str) -> Option<String> {
    let label = raw
        .trim()
        .trim_end_matches([',', '-', ':'])
        .trim();
    (!label.is_empty()).then(|| label.to_string())
}

pub(super) fn mentioned_tickers(text: &str) -> Vec<String> {
    static MENTION: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9$])\$?([A-Z]{2,5}(?:\.[A-Z])?)\b")
            .expect("mention regex should compile")
    });

    let mut tickers: Vec<String> = Vec::new();
    for captures in MENTION.captures_iter(text) {
        let Some(ticker) = captures.get(1) else {
            continue;
        };
        let ticker = ticker.as_str();
        if is_ticker(ticker) && !tickers.iter().any(|t| t == ticker) {
            tickers.push(ticker.to_string());
        }
    }
    tickers
}
