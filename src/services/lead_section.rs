//! Lead-section sizes, taken from the byte offset of an article's first section.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;

use crate::models::schemas::TranslationRecommendation;
use crate::services::bounded::collect_until;
use crate::services::filters::matches_article_size_filter;
use crate::services::wiki::{params, WikiApi};

pub struct LeadSectionSizer {
    wiki: Arc<WikiApi>,
    concurrency: usize,
}

impl LeadSectionSizer {
    pub fn new(wiki: Arc<WikiApi>, concurrency: usize) -> Self {
        Self {
            wiki,
            concurrency: concurrency.max(1),
        }
    }

    /// Attach lead-section sizes, keeping order; failures leave the field empty
    pub async fn add_sizes(
        &self,
        recommendations: Vec<TranslationRecommendation>,
        language: &str,
    ) -> Vec<TranslationRecommendation> {
        stream::iter(recommendations)
            .map(|mut recommendation| {
                let wiki = self.wiki.clone();
                let language = language.to_string();
                async move {
                    recommendation.lead_section_size =
                        fetch_lead_section_size(wiki, recommendation.title.clone(), language).await;
                    recommendation
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// First `count` candidates whose lead section lies within the bounds.
    ///
    /// Stops fetching once enough candidates qualify; the result follows
    /// candidate order.
    pub async fn filter_by_size(
        &self,
        candidates: Vec<TranslationRecommendation>,
        language: &str,
        count: usize,
        min_size: Option<u64>,
        max_size: Option<u64>,
    ) -> Vec<TranslationRecommendation> {
        let wiki = self.wiki.clone();
        let language = language.to_string();

        let mut accepted = collect_until(
            candidates,
            self.concurrency,
            count,
            move |mut recommendation: TranslationRecommendation| {
                let wiki = wiki.clone();
                let language = language.clone();
                async move {
                    recommendation.lead_section_size =
                        fetch_lead_section_size(wiki, recommendation.title.clone(), language).await;
                    recommendation
                }
            },
            |recommendation| {
                matches_article_size_filter(recommendation.lead_section_size, min_size, max_size)
                    .then_some(recommendation)
            },
        )
        .await;

        accepted.sort_by_key(|(position, _)| *position);
        accepted.into_iter().map(|(_, recommendation)| recommendation).collect()
    }
}

async fn fetch_lead_section_size(wiki: Arc<WikiApi>, title: String, language: String) -> Option<u64> {
    let response = wiki
        .query(
            &language,
            params(&[
                ("action", "parse"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "sections"),
                ("redirects", "1"),
                ("page", title.as_str()),
            ]),
        )
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Could not fetch section sizes for page {} and language {}: {}", title, language, e);
            return None;
        }
    };

    let size = response
        .pointer("/parse/sections/0/byteoffset")
        .and_then(Value::as_u64);
    if size.is_none() {
        tracing::debug!("No lead section size for page {} and language {}", title, language);
    }
    size
}
