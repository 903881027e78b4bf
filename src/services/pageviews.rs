//! Last-day pageview counts for recommendations.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::schemas::TranslationRecommendation;
use crate::services::wiki::{normalization_map, params, WikiApi, TITLES_PER_REQUEST};

/// Set `pageviews` on every recommendation; counts that cannot be fetched are 0
pub async fn add_pageviews(
    wiki: &Arc<WikiApi>,
    mut recommendations: Vec<TranslationRecommendation>,
    language: &str,
) -> Vec<TranslationRecommendation> {
    let titles: Vec<String> = recommendations.iter().map(|r| r.title.clone()).collect();
    let mut counts = HashMap::new();

    for chunk in titles.chunks(TITLES_PER_REQUEST) {
        let joined = chunk.join("|");
        let response = wiki
            .query(
                language,
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("prop", "pageviews"),
                    ("pvipdays", "1"),
                    ("titles", joined.as_str()),
                ]),
            )
            .await;

        match response {
            Ok(response) => counts.extend(pageview_counts(&response)),
            Err(e) => tracing::warn!("Could not fetch pageviews for {} titles: {}", chunk.len(), e),
        }
    }

    for recommendation in recommendations.iter_mut() {
        recommendation.pageviews = Some(counts.get(&recommendation.title).copied().unwrap_or(0));
    }
    recommendations
}

/// Summed daily views keyed by the requested title; days without data count as 0
fn pageview_counts(response: &Value) -> HashMap<String, u64> {
    let normalized = normalization_map(response);

    response
        .pointer("/query/pages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|page| {
            let title = page.get("title")?.as_str()?;
            let views = page
                .get("pageviews")
                .and_then(Value::as_object)
                .map(|days| days.values().filter_map(Value::as_u64).sum())
                .unwrap_or(0);
            let requested = normalized.get(title).cloned().unwrap_or_else(|| title.to_string());
            Some((requested, views))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::FetchError;
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_pageviews_are_summed_and_defaulted() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| {
            Ok(json!({"query": {
                "normalized": [{"from": "ada_Lovelace", "to": "Ada Lovelace"}],
                "pages": [
                    {"title": "Ada Lovelace", "pageviews": {"2026-10-17": 1200, "2026-10-18": null}},
                    {"title": "Charles Babbage", "pageviews": {"2026-10-18": 300}}
                ]
            }}))
        }));
        let wiki = Arc::new(WikiApi::new(fetcher, &Settings::default()));

        let recommendations = vec![
            TranslationRecommendation::new("ada_Lovelace"),
            TranslationRecommendation::new("Charles Babbage"),
            TranslationRecommendation::new("Analytical Engine"),
        ];
        let enriched = add_pageviews(&wiki, recommendations, "en").await;

        let views: Vec<_> = enriched.iter().map(|r| r.pageviews).collect();
        assert_eq!(views, vec![Some(1200), Some(300), Some(0)]);
    }

    #[tokio::test]
    async fn test_failures_yield_zero() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Err(FetchError::Api("ratelimited".to_string()))));
        let wiki = Arc::new(WikiApi::new(fetcher, &Settings::default()));

        let enriched = add_pageviews(&wiki, vec![TranslationRecommendation::new("Moon")], "en").await;
        assert_eq!(enriched[0].pageviews, Some(0));
    }
}
