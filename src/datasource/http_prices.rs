//! HTTP price API client.

use super::{DataSourceError, PriceSource};
use crate::domain::{Address, Decimal, Network};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Price source querying `GET {base}/prices/{network}/{token}?block={block}`.
///
/// The response body is `{"price": "<decimal>"}`. A 404 or a null price means
/// the price is unknown.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpPriceSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Cap the total time spent retrying one request.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    fn price_url(&self, network: Network, token: &Address, block: i64) -> String {
        format!(
            "{}/prices/{}/{}?block={}",
            self.base_url, network, token, block
        )
    }

    async fn get_json(&self, url: &str) -> Result<Option<serde_json::Value>, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self.client.get(url).send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn price(
        &self,
        network: Network,
        token: &Address,
        block: i64,
    ) -> Result<Option<Decimal>, DataSourceError> {
        let url = self.price_url(network, token, block);
        debug!(%url, "fetching usd price");

        match self.get_json(&url).await? {
            Some(body) => parse_price(&body),
            None => Ok(None),
        }
    }
}

fn parse_price(body: &serde_json::Value) -> Result<Option<Decimal>, DataSourceError> {
    let Some(value) = body.get("price") else {
        return Err(DataSourceError::ParseError("Missing price field".to_string()));
    };
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Decimal::from_str_canonical(s)
            .map(Some)
            .map_err(|e| DataSourceError::ParseError(format!("Invalid price: {}", e))),
        serde_json::Value::Number(n) => Decimal::from_str_canonical(&n.to_string())
            .map(Some)
            .map_err(|e| DataSourceError::ParseError(format!("Invalid price: {}", e))),
        other => Err(DataSourceError::ParseError(format!(
            "Unexpected price value: {}",
            other
        ))),
    }
}
