//! Site matrix and interwiki map: which wikis exist and how their
//! interwiki prefixes map to database names.

use serde_json::Value;
use std::sync::Arc;

use crate::error::{FetchError, FetchResult};
use crate::models::wiki::{InterwikiEntry, SiteMatrixLanguage};
use crate::services::cache::RecommendationCache;
use crate::services::language::is_mapped_code;
use crate::services::wiki::{params, WikiApi};

pub struct SiteDirectory {
    wiki: Arc<WikiApi>,
    cache: Arc<RecommendationCache>,
}

impl SiteDirectory {
    pub fn new(wiki: Arc<WikiApi>, cache: Arc<RecommendationCache>) -> Self {
        Self { wiki, cache }
    }

    /// Refresh both snapshots; each failure is logged and leaves the old snapshot in place
    pub async fn bootstrap(&self) {
        match self.fetch_site_matrix().await {
            Ok(languages) => {
                tracing::info!("Fetched site matrix with {} languages", languages.len());
                if let Err(e) = self.cache.set_site_matrix(languages).await {
                    tracing::error!("Failed to store site matrix: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to fetch site matrix: {}", e),
        }

        match self.fetch_interwiki_map().await {
            Ok(entries) => {
                tracing::info!("Fetched interwiki map with {} prefixes", entries.len());
                if let Err(e) = self.cache.set_interwiki_map(entries).await {
                    tracing::error!("Failed to store interwiki map: {}", e);
                }
            }
            Err(e) => tracing::error!("Failed to fetch interwiki map: {}", e),
        }
    }

    async fn fetch_site_matrix(&self) -> FetchResult<Vec<SiteMatrixLanguage>> {
        let response = self
            .wiki
            .query(
                "meta",
                params(&[("action", "sitematrix"), ("format", "json"), ("smtype", "language")]),
            )
            .await?;

        let matrix = response
            .get("sitematrix")
            .and_then(Value::as_object)
            .ok_or_else(|| FetchError::Malformed("sitematrix missing".to_string()))?;

        // Besides one object per language the matrix carries a `count` entry
        Ok(matrix
            .values()
            .filter(|entry| entry.get("code").is_some())
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect())
    }

    async fn fetch_interwiki_map(&self) -> FetchResult<Vec<InterwikiEntry>> {
        let response = self
            .wiki
            .query(
                "meta",
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("meta", "siteinfo"),
                    ("siprop", "interwikimap"),
                ]),
            )
            .await?;

        let entries = response
            .pointer("/query/interwikimap")
            .cloned()
            .ok_or_else(|| FetchError::Malformed("interwikimap missing".to_string()))?;
        Ok(serde_json::from_value(entries)?)
    }

    /// Unknown codes are only rejected once the site matrix is available
    pub fn is_valid_language(&self, code: &str) -> bool {
        match self.cache.site_matrix() {
            None => true,
            Some(languages) => languages.iter().any(|language| language.code == code) || is_mapped_code(code),
        }
    }

    /// Database name (`enwiki`, `zh_min_nanwiki`, ...) for an interwiki prefix
    pub fn dbname_for_prefix(&self, prefix: &str) -> String {
        let interwiki = self.cache.interwiki_map();
        let site_matrix = self.cache.site_matrix();

        let url = interwiki
            .as_ref()
            .and_then(|entries| entries.iter().find(|entry| entry.prefix == prefix))
            .map(|entry| entry.url.as_str());

        if let (Some(url), Some(languages)) = (url, site_matrix.as_ref()) {
            let dbname = languages
                .iter()
                .flat_map(|language| language.sites.iter())
                .find(|site| url.starts_with(&site.url))
                .map(|site| site.dbname.clone());
            if let Some(dbname) = dbname {
                return dbname;
            }
        }

        format!("{}wiki", prefix.replace('-', "_"))
    }
}
