//! HTTP access to upstream JSON APIs.
//!
//! Everything that talks to Wikipedia, Wikidata or CXServer goes through the
//! [`JsonFetcher`] trait so that the recommendation and refresh code can be
//! exercised without a network.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{FetchError, FetchResult};

/// Query parameters or headers, in request order
pub type Pairs = Vec<(String, String)>;

/// A client able to GET JSON documents and POST JSON events
#[async_trait]
pub trait JsonFetcher: Send + Sync {
    async fn get_json(&self, url: &str, params: &[(String, String)], headers: &[(String, String)])
        -> FetchResult<Value>;

    async fn post_json(&self, url: &str, body: &Value, headers: &[(String, String)]) -> FetchResult<()>;
}

/// reqwest-backed fetcher shared by the whole process
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> FetchResult<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .pool_max_idle_per_host(settings.http_max_connections)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl JsonFetcher for HttpFetcher {
    async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> FetchResult<Value> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url).query(params);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::error!("Error response {} while requesting {}", status.as_u16(), response.url());
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn post_json(&self, url: &str, body: &Value, headers: &[(String, String)]) -> FetchResult<()> {
        tracing::debug!("POST {}", url);

        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(())
    }
}
