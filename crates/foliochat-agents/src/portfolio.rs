//! Which portfolio a turn is about.
//!
//! A user with several portfolios who names none of them gets a clarifying
//! question rather than an answer about whichever portfolio changed last.

use chrono::{DateTime, Utc};
use foliochat_facts::{Fact, Provenance};
use serde::{Deserialize, Serialize};

/// A portfolio the HTTP layer knows the user owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioCandidate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub total_value: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PortfolioCandidate {
    /// The candidate's reported total as a freshly fetched fact, keyed to this
    /// portfolio.
    pub fn total_fact(&self, now: DateTime<Utc>) -> Option<Fact> {
        let value = self.total_value.filter(|v| v.is_finite())?;
        Some(Fact::portfolio_total(
            &self.id,
            value,
            self.updated_at.unwrap_or(now),
            Provenance::Api,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioOption {
    pub id: String,
    pub name: String,
}

/// Returned to the caller instead of guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub options: Vec<PortfolioOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioResolution {
    Selected(PortfolioCandidate),
    NeedsClarification(Clarification),
    Unspecified,
}

impl PortfolioResolution {
    pub fn selected_id(&self) -> Option<&str> {
        match self {
            Self::Selected(candidate) => Some(&candidate.id),
            _ => None,
        }
    }
}

/// Resolve the portfolio for this turn.
///
/// An explicit id wins. Without one, a sole candidate is selected and the
/// portfolio remembered from an earlier turn of this session is reused.
/// Anything else with more than one candidate needs clarification.
pub fn resolve_portfolio(
    explicit: Option<&str>,
    candidates: &[PortfolioCandidate],
    remembered: Option<&str>,
) -> PortfolioResolution {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        if let Some(found) = candidates.iter().find(|c| c.id == id) {
            return PortfolioResolution::Selected(found.clone());
        }
        if candidates.is_empty() {
            return PortfolioResolution::Selected(PortfolioCandidate {
                id: id.to_string(),
                name: id.to_string(),
                total_value: None,
                updated_at: None,
            });
        }
        return clarify(
            format!("I couldn't find a portfolio with id '{id}'. Which portfolio do you mean?"),
            candidates,
        );
    }

    match candidates {
        [] => PortfolioResolution::Unspecified,
        [only] => PortfolioResolution::Selected(only.clone()),
        _ => {
            if let Some(found) = remembered.and_then(|id| candidates.iter().find(|c| c.id == id)) {
                return PortfolioResolution::Selected(found.clone());
            }
            clarify(
                format!(
                    "You have {} portfolios. Which one would you like me to look at?",
                    candidates.len()
                ),
                candidates,
            )
        }
    }
}

fn clarify(question: String, candidates: &[PortfolioCandidate]) -> PortfolioResolution {
    PortfolioResolution::NeedsClarification(Clarification {
        question,
        options: candidates
            .iter()
            .map(|c| PortfolioOption {
                id: c.id.clone(),
                name: c.name.clone(),
            })
            .collect(),
    })
}
