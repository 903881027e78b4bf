//! Endpoint resolution and common calls against the Wikimedia APIs.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use url::Url;

use crate::config::Settings;
use crate::error::{FetchError, FetchResult};
use crate::services::fetcher::{JsonFetcher, Pairs};

/// Maximum number of follow-up requests in "fetch all" mode
const MAX_CONTINUATIONS: usize = 50;

/// Maximum number of titles or ids per Action API request
pub const TITLES_PER_REQUEST: usize = 50;

/// Build an owned parameter list from borrowed pairs
pub fn params(items: &[(&str, &str)]) -> Pairs {
    items
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Basic page information (`prop=info`)
#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    pub title: String,
    #[serde(default)]
    pub pageid: Option<u64>,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub missing: bool,
}

/// Client for Wikipedia, Meta, Wikidata and CXServer
pub struct WikiApi {
    fetcher: Arc<dyn JsonFetcher>,
    wikipedia_api: String,
    wikipedia_api_header: Option<String>,
    wikidata_api: String,
    meta_api: String,
    cxserver_url: String,
    cxserver_header: Option<String>,
    concurrency: usize,
}

impl WikiApi {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, settings: &Settings) -> Self {
        Self {
            fetcher,
            wikipedia_api: settings.wikipedia_api.clone(),
            wikipedia_api_header: settings.wikipedia_api_header.clone(),
            wikidata_api: settings.wikidata_api.clone(),
            meta_api: settings.meta_api.clone(),
            cxserver_url: settings.cxserver_url.clone(),
            cxserver_header: settings.cxserver_header.clone(),
            concurrency: settings.api_concurrency_limit.max(1),
        }
    }

    /// Endpoint URL and extra headers for `meta`, `wikidata` or a Wikipedia language
    pub fn endpoint(&self, wiki: &str) -> (String, Pairs) {
        match wiki {
            "meta" => (self.meta_api.clone(), Vec::new()),
            "wikidata" => (self.wikidata_api.clone(), Vec::new()),
            language => (
                self.wikipedia_api.replace("{source}", language),
                host_header(self.wikipedia_api_header.as_deref(), language),
            ),
        }
    }

    /// Single Action API request; an `error` object in the payload is an error
    pub async fn query(&self, wiki: &str, params: Pairs) -> FetchResult<Value> {
        let (url, headers) = self.endpoint(wiki);
        let value = self.fetcher.get_json(&url, &params, &headers).await?;

        if let Some(error) = value.get("error") {
            return Err(FetchError::Api(error.to_string()));
        }

        Ok(value)
    }

    /// Action API request that follows `continue` tokens until exhausted
    pub async fn query_all(&self, wiki: &str, mut params: Pairs) -> FetchResult<Vec<Value>> {
        let mut responses = Vec::new();

        for _ in 0..=MAX_CONTINUATIONS {
            let response = self.query(wiki, params.clone()).await?;
            let continuation = response.get("continue").and_then(Value::as_object).cloned();
            responses.push(response);

            let Some(continuation) = continuation else {
                return Ok(responses);
            };

            for (name, value) in continuation {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                match params.iter_mut().find(|(existing, _)| *existing == name) {
                    Some(entry) => entry.1 = value,
                    None => params.push((name, value)),
                }
            }
        }

        tracing::warn!(
            "Stopped following continuation for {} after {} requests",
            wiki,
            responses.len()
        );
        Ok(responses)
    }

    /// GET on CXServer; path segments are percent-encoded individually
    pub async fn cxserver(&self, segments: &[&str], query: Pairs, source: &str) -> FetchResult<Value> {
        let mut url = Url::parse(&self.cxserver_url)?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Malformed(format!("{} cannot be a base URL", self.cxserver_url)))?
            .pop_if_empty()
            .extend(segments);

        let headers = host_header(self.cxserver_header.as_deref(), source);
        self.fetcher.get_json(url.as_str(), &query, &headers).await
    }

    /// Page ids and byte sizes for titles, keyed by the requested title.
    ///
    /// Batches of titles are fetched concurrently; a failed batch is logged
    /// and its titles are left out.
    pub async fn page_info(&self, language: &str, titles: &[String]) -> HashMap<String, PageInfo> {
        let batches: Vec<_> = titles
            .chunks(TITLES_PER_REQUEST)
            .map(|chunk| self.page_info_batch(language, chunk))
            .collect();
        let results: Vec<_> = stream::iter(batches)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut infos = HashMap::new();
        for result in results {
            match result {
                Ok(batch) => infos.extend(batch),
                Err(e) => tracing::error!("Error fetching page info from {}: {}", language, e),
            }
        }
        infos
    }

    async fn page_info_batch(&self, language: &str, titles: &[String]) -> FetchResult<Vec<(String, PageInfo)>> {
        let joined = titles.join("|");
        let response = self
            .query(
                language,
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("prop", "info"),
                    ("titles", joined.as_str()),
                ]),
            )
            .await?;

        let normalized = normalization_map(&response);
        let pages = response
            .pointer("/query/pages")
            .cloned()
            .map(serde_json::from_value::<Vec<PageInfo>>)
            .transpose()?
            .unwrap_or_default();

        Ok(pages
            .into_iter()
            .filter(|page| !page.missing)
            .map(|page| {
                let requested = normalized.get(&page.title).cloned().unwrap_or_else(|| page.title.clone());
                (requested, page)
            })
            .collect())
    }

    /// Page ids by title; titles that do not exist or could not be fetched are left out
    pub async fn page_ids(&self, language: &str, titles: &[String]) -> BTreeMap<String, u64> {
        self.page_info(language, titles)
            .await
            .into_iter()
            .filter_map(|(title, info)| info.pageid.map(|id| (title, id)))
            .collect()
    }
}

/// Map of normalized title -> requested title from a `query` response
pub fn normalization_map(response: &Value) -> HashMap<String, String> {
    response
        .pointer("/query/normalized")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some((
                        item.get("to")?.as_str()?.to_string(),
                        item.get("from")?.as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn host_header(template: Option<&str>, source: &str) -> Pairs {
    template
        .map(|template| vec![("Host".to_string(), template.replace("{source}", source))])
        .unwrap_or_default()
}
