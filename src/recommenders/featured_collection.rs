//! Search recommendations mixed with hits restricted to a featured collection.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::schemas::{
    RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::PageCollection;
use crate::recommenders::search::SearchRecommender;
use crate::recommenders::{article_title, section_filter, RecommenderContext};
use crate::services::interleave::{alternate_by, interleave_by_ratio};
use crate::services::ranking::sort_recommendations;

/// Upper bound on the length of one search expression
pub const MAX_QUERY_LENGTH: usize = 4096;

/// Split `ids` over as few `{base}{id}|{id}|...` queries as fit in `max_length`.
///
/// A single id longer than the budget still gets its own query.
pub fn build_batched_queries(base: &str, ids: &[u64], max_length: usize) -> Vec<String> {
    let mut queries = Vec::new();
    let mut current = String::new();

    for id in ids {
        let id = id.to_string();
        if !current.is_empty() && current.len() + 1 + id.len() > max_length {
            queries.push(std::mem::take(&mut current));
        }

        if current.is_empty() {
            current = format!("{}{}", base, id);
        } else {
            current.push('|');
            current.push_str(&id);
        }
    }

    if !current.is_empty() {
        queries.push(current);
    }
    queries
}

pub struct FeaturedCollectionSearchRecommender {
    request: RecommendationRequest,
    ctx: Arc<RecommenderContext>,
    search: SearchRecommender,
    featured: Option<PageCollection>,
}

impl FeaturedCollectionSearchRecommender {
    pub fn new(request: RecommendationRequest, ctx: Arc<RecommenderContext>) -> Self {
        let featured = featured_name(&request).and_then(|name| {
            ctx.page_collections()
                .iter()
                .find(|collection| collection.is_named(name))
                .cloned()
        });
        Self {
            search: SearchRecommender::new(request.clone(), ctx.clone()),
            request,
            ctx,
            featured,
        }
    }

    pub fn matches(&self) -> bool {
        self.search.matches() && featured_name(&self.request).is_some()
    }

    /// Source-wiki page ids of the featured collection's articles
    async fn featured_page_ids(&self, collection: &PageCollection) -> Vec<u64> {
        let source = &self.request.source;
        let mut ids = Vec::new();
        let mut unresolved = Vec::new();

        for article in &collection.articles {
            let Some(title) = article_title(article, source) else {
                continue;
            };
            match article.page_ids.get(source) {
                Some(id) => ids.push(*id),
                None => unresolved.push(title.to_string()),
            }
        }

        if !unresolved.is_empty() {
            let resolved = self.ctx.wiki.page_ids(source, &unresolved).await;
            if resolved.len() < unresolved.len() {
                tracing::debug!(
                    "Resolved {} of {} page ids for {}",
                    resolved.len(),
                    unresolved.len(),
                    collection.name()
                );
            }
            ids.extend(resolved.into_values());
        }

        ids
    }

    /// Search hits that belong to the featured collection, tagged with it
    async fn featured_candidates(&self, missing: bool) -> Vec<TranslationRecommendation> {
        let Some(collection) = &self.featured else {
            return Vec::new();
        };

        let page_ids = self.featured_page_ids(collection).await;
        if page_ids.is_empty() {
            return Vec::new();
        }

        let query = self.search.search_query();
        let base = if query.is_empty() {
            "pageid:".to_string()
        } else {
            format!("{} pageid:", query)
        };
        let queries = build_batched_queries(&base, &page_ids, MAX_QUERY_LENGTH);
        tracing::debug!(
            "Searching {} featured pages of {} in {} batches",
            page_ids.len(),
            collection.name(),
            queries.len()
        );

        let difficulty = if missing { self.request.difficulty } else { None };
        let metadata = collection.metadata();
        let batches = join_all(queries.iter().map(|query| self.search.fetch_search_results(query))).await;

        let mut seen = HashSet::new();
        let recommendations = batches
            .into_iter()
            .flat_map(|pages| self.search.recommendations_from_pages(pages, missing, difficulty))
            .filter(|recommendation| seen.insert(recommendation.identity().to_string()))
            .map(|recommendation| TranslationRecommendation {
                collection: Some(metadata.clone()),
                ..recommendation
            })
            .collect();

        sort_recommendations(recommendations, self.request.rank_method)
    }

    pub async fn recommend(&self) -> TranslationRecommendationResponse {
        // Neither search reads the other's results, so they run side by side
        let (base, featured) = tokio::join!(self.search.candidates(true), self.featured_candidates(true));
        let mixed = interleave_by_ratio(base, featured);
        TranslationRecommendationResponse::new(self.ctx.finish(&self.request, mixed).await)
    }

    pub async fn recommend_sections(&self) -> SectionTranslationRecommendationResponse {
        let (base, featured) = tokio::join!(self.search.candidates(false), self.featured_candidates(false));
        let mixed = interleave_by_ratio(base, featured);

        let recommendations = self
            .ctx
            .sections
            .suggest(
                mixed,
                &self.request.source,
                &self.request.target,
                self.request.count,
                section_filter(&self.request),
            )
            .await;
        SectionTranslationRecommendationResponse::new(alternate_by(recommendations, |r| r.collection.is_some()))
    }
}

fn featured_name(request: &RecommendationRequest) -> Option<&str> {
    request.featured_collection.as_deref().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommenders::testing::{article, collection, context};
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;

    #[test]
    fn test_batched_queries_respect_length_limit() {
        let base = "articletopic:space pageid:";
        let ids: Vec<u64> = (1_000_000..1_002_000).collect();

        let queries = build_batched_queries(base, &ids, MAX_QUERY_LENGTH);

        assert!(queries.len() > 1);
        assert!(queries.iter().all(|q| q.len() <= MAX_QUERY_LENGTH && q.starts_with(base)));

        let recovered: Vec<u64> = queries
            .iter()
            .flat_map(|q| q.trim_start_matches(base).split('|').map(|id| id.parse::<u64>().unwrap()))
            .collect();
        assert_eq!(recovered, ids);
    }

    #[test]
    fn test_batched_queries_without_ids() {
        assert!(build_batched_queries("pageid:", &[], MAX_QUERY_LENGTH).is_empty());
        assert_eq!(build_batched_queries("pageid:", &[7, 8], MAX_QUERY_LENGTH), vec!["pageid:7|8"]);
    }

    fn page(title: &str, qid: &str, index: u64) -> serde_json::Value {
        json!({"title": title, "ns": 0, "index": index, "size": 5000, "langlinkscount": 10,
               "pageprops": {"wikibase_item": qid}})
    }

    fn fetcher() -> Arc<ScriptedFetcher> {
        Arc::new(ScriptedFetcher::new(|call| {
            if call.param("prop") == Some("info") {
                return Ok(json!({"query": {"pages": [
                    {"title": "Venus", "pageid": 32745}
                ]}}));
            }

            let query = call.param("gsrsearch").unwrap_or_default();
            Ok(if query.contains("pageid:") {
                json!({"query": {"pages": [page("Mars", "Q111", 1), page("Venus", "Q313", 2)]}})
            } else {
                json!({"query": {"pages": [
                    page("Comet", "Q3559", 1), page("Mars", "Q111", 2), page("Asteroid", "Q3863", 3),
                    page("Meteor", "Q15040", 4)
                ]}})
            })
        }))
    }

    fn planets() -> PageCollection {
        let mut mars = article("Q111", &[("en", "Mars")], None);
        mars.page_ids.insert("en".to_string(), 14640471);
        collection("Planets", vec![mars, article("Q313", &[("en", "Venus")], None)])
    }

    #[tokio::test]
    async fn test_featured_hits_are_mixed_in() {
        let fetcher = fetcher();
        let ctx = context(fetcher.clone(), vec![planets()]).await;
        let mut request = RecommendationRequest::new("en", "es");
        request.topic = Some("space".to_string());
        request.featured_collection = Some("planets".to_string());

        let recommender = FeaturedCollectionSearchRecommender::new(request, ctx);
        assert!(recommender.matches());
        let response = recommender.recommend().await;

        let featured: Vec<_> = response
            .recommendations
            .iter()
            .filter(|r| r.collection.is_some())
            .map(|r| r.title.as_str())
            .collect();
        assert_eq!(featured, vec!["Venus"]);
        assert_eq!(response.recommendations.len(), 5);
        assert_eq!(
            response
                .recommendations
                .iter()
                .filter(|r| r.wikidata_id.as_deref() == Some("Q111"))
                .count(),
            1
        );

        let featured_query = fetcher
            .calls()
            .into_iter()
            .find_map(|call| call.param("gsrsearch").filter(|q| q.contains("pageid:")).map(str::to_string))
            .unwrap();
        assert_eq!(featured_query, "articletopic:space pageid:14640471|32745");
    }

    #[tokio::test]
    async fn test_unknown_featured_collection_falls_back_to_search() {
        let ctx = context(fetcher(), vec![planets()]).await;
        let mut request = RecommendationRequest::new("en", "es");
        request.topic = Some("space".to_string());
        request.featured_collection = Some("Moons".to_string());

        let response = FeaturedCollectionSearchRecommender::new(request, ctx).recommend().await;
        assert_eq!(response.recommendations.len(), 4);
        assert!(response.recommendations.iter().all(|r| r.collection.is_none()));
    }
}
