use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Subject key used for aggregate portfolio totals.
pub const PORTFOLIO_SUBJECT: &str = "PORTFOLIO";

/// Subject for the total of one portfolio, `PORTFOLIO/<ID>`. Without an id this
/// is the unscoped [`PORTFOLIO_SUBJECT`].
pub fn portfolio_subject(portfolio_id: Option<&str>) -> String {
    match portfolio_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => normalize_subject(&format!("{PORTFOLIO_SUBJECT}/{id}")),
        None => PORTFOLIO_SUBJECT.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Price,
    Holding,
    TotalValue,
    Metric,
}

impl FactKind {
    pub const ALL: [FactKind; 4] = [
        FactKind::Price,
        FactKind::Holding,
        FactKind::TotalValue,
        FactKind::Metric,
    ];

    /// Largest difference at which two values of this kind are considered equal.
    ///
    /// Currency kinds compare to the cent; share counts and metrics are compared
    /// more tightly because fractional shares are common.
    pub fn epsilon(&self) -> f64 {
        match self {
            Self::Price | Self::TotalValue => 0.01,
            Self::Holding | Self::Metric => 0.0001,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Holding => "holding",
            Self::TotalValue => "total_value",
            Self::Metric => "metric",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price" => Ok(Self::Price),
            "holding" => Ok(Self::Holding),
            "total_value" => Ok(Self::TotalValue),
            "metric" => Ok(Self::Metric),
            other => Err(format!("unknown fact kind '{other}'")),
        }
    }
}

/// Where a fact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Conversation,
    Cache,
    Api,
}

/// Identity of a fact: two facts with the same key are comparable.
///
/// Serialized as `"<kind>:<subject>"` so it can be used as a JSON map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FactKey {
    pub subject: String,
    pub kind: FactKind,
}

impl FactKey {
    pub fn new(subject: &str, kind: FactKind) -> Self {
        Self {
            subject: normalize_subject(subject),
            kind,
        }
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.subject)
    }
}

impl From<FactKey> for String {
    fn from(key: FactKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for FactKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (kind, subject) = value
            .split_once(':')
            .ok_or_else(|| format!("fact key '{value}' is missing a kind prefix"))?;
        Ok(FactKey::new(subject, kind.parse()?))
    }
}

/// A single timestamped, sourced piece of financial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub subject_key: String,
    pub kind: FactKind,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<usize>,
    /// Company name for holdings, metric name for metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Fact {
    pub fn new(
        subject: &str,
        kind: FactKind,
        value: f64,
        observed_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self {
            subject_key: normalize_subject(subject),
            kind,
            value,
            observed_at,
            provenance,
            turn_index: None,
            label: None,
        }
    }

    pub fn price(
        ticker: &str,
        value: f64,
        observed_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self::new(ticker, FactKind::Price, value, observed_at, provenance)
    }

    pub fn holding(
        ticker: &str,
        shares: f64,
        observed_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self::new(ticker, FactKind::Holding, shares, observed_at, provenance)
    }

    pub fn total_value(value: f64, observed_at: DateTime<Utc>, provenance: Provenance) -> Self {
        Self::new(
            PORTFOLIO_SUBJECT,
            FactKind::TotalValue,
            value,
            observed_at,
            provenance,
        )
    }

    /// Total of a specific portfolio, keyed by [`portfolio_subject`].
    pub fn portfolio_total(
        portfolio_id: &str,
        value: f64,
        observed_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        Self::new(
            &portfolio_subject(Some(portfolio_id)),
            FactKind::TotalValue,
            value,
            observed_at,
            provenance,
        )
    }

    /// Fundamentals such as P/E are keyed `TICKER/NAME`.
    pub fn metric(
        ticker: &str,
        name: &str,
        value: f64,
        observed_at: DateTime<Utc>,
        provenance: Provenance,
    ) -> Self {
        let subject = format!("{}/{}", ticker.trim(), name.trim());
        Self::new(&subject, FactKind::Metric, value, observed_at, provenance)
            .with_label(name.trim())
    }

    pub fn with_turn(mut self, turn_index: usize) -> Self {
        self.turn_index = Some(turn_index);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn key(&self) -> FactKey {
        FactKey {
            subject: self.subject_key.clone(),
            kind: self.kind,
        }
    }

    /// Numeric equality within the kind's epsilon.
    pub fn matches(&self, other: &Fact) -> bool {
        values_match(self.kind, self.value, other.value)
    }

    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.observed_at
    }
}

pub(crate) fn values_match(kind: FactKind, a: f64, b: f64) -> bool {
    (a - b).abs() < kind.epsilon()
}

pub(crate) fn normalize_subject(subject: &str) -> String {
    subject.trim().to_ascii_uppercase()
}
