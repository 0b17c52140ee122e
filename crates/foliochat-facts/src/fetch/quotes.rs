use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foliochat_common::{Error, Result, redact_secrets};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{FactFetcher, PartialFactSet};
use crate::fact::{Fact, FactKind, Provenance};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    quotes: Vec<QuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    symbol: String,
    price: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Latest prices from a JSON quote endpoint.
///
/// Issues `GET {base_url}/quote?symbols=AAPL,MSFT` with the key in an
/// `x-api-key` header and expects `{"quotes":[{"symbol","price","timestamp"}]}`.
/// Quotes without a timestamp are observed at fetch time.
pub struct HttpQuoteFetcher {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpQuoteFetcher {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_timeout(name, base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl FactFetcher for HttpQuoteFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> &[FactKind] {
        &[FactKind::Price]
    }

    async fn fetch(&self, subjects: &[String], kind: FactKind) -> Result<Option<PartialFactSet>> {
        if kind != FactKind::Price || subjects.is_empty() {
            return Ok(None);
        }

        let symbols = subjects.join(",");
        let mut request = self
            .client
            .get(format!("{}/quote", self.base_url))
            .query(&[("symbols", symbols.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{}: request failed: {e}", self.name)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "{} returned {}: {}",
                self.name,
                status.as_u16(),
                redact_secrets(&body)
            )));
        }

        let parsed: QuoteResponse = response
            .json()
            .await
            .map_err(|e| Error::Fetch(format!("{}: unreadable quote response: {e}", self.name)))?;

        let now = Utc::now();
        let facts: Vec<Fact> = parsed
            .quotes
            .into_iter()
            .filter(|q| subjects.iter().any(|s| s.eq_ignore_ascii_case(&q.symbol)))
            .filter_map(|q| {
                let price = q.price.filter(|p| p.is_finite())?;
                Some(Fact::price(
                    &q.symbol,
                    price,
                    q.timestamp.unwrap_or(now),
                    Provenance::Api,
                ))
            })
            .collect();

        debug!(fetcher = %self.name, requested = subjects.len(), returned = facts.len(), "quotes fetched");
        if facts.is_empty() {
            return Ok(None);
        }
        Ok(Some(facts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn subjects(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn fetches_requested_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbols", "AAPL,MSFT"))
            .and(header("x-api-key", "quote-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quotes": [
                    {"symbol": "AAPL", "price": 155.0, "timestamp": "2026-01-05T15:30:00Z"},
                    {"symbol": "MSFT", "price": 410.5},
                    {"symbol": "ZZZZ", "price": 1.0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpQuoteFetcher::new("quotes", server.uri(), Some("quote-key".into()));
        let facts = fetcher
            .fetch(&subjects(&["AAPL", "MSFT"]), FactKind::Price)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].subject_key, "AAPL");
        assert_eq!(facts[0].value, 155.0);
        assert_eq!(facts[0].observed_at.to_rfc3339(), "2026-01-05T15:30:00+00:00");
        assert_eq!(facts[1].provenance, Provenance::Api);
    }

    #[tokio::test]
    async fn error_status_becomes_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let fetcher = HttpQuoteFetcher::new("quotes", server.uri(), None);
        let err = fetcher
            .fetch(&subjects(&["AAPL"]), FactKind::Price)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn other_kinds_and_empty_results_yield_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"quotes": []})))
            .mount(&server)
            .await;

        let fetcher = HttpQuoteFetcher::new("quotes", server.uri(), None);
        assert!(
            fetcher
                .fetch(&subjects(&["AAPL"]), FactKind::Holding)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            fetcher
                .fetch(&subjects(&["AAPL"]), FactKind::Price)
                .await
                .unwrap()
                .is_none()
        );
    }
}
