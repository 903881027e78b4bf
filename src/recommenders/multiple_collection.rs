//! Recommendations spread across several page collections.
//!
//! Collections and their articles are shuffled, then articles are taken
//! round-robin, one valid article per collection per round, so every
//! collection is represented before any contributes a second article.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::schemas::{
    RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::{PageCollection, PageCollectionMetadata, WikiDataArticle};
use crate::recommenders::{article_title, section_filter, RecommenderContext};
use crate::services::filters::{article_difficulty, matches_article_size_filter};
use crate::services::interleave::round_robin_by;
use crate::services::language::is_missing_in_target_language;

pub struct MultipleCollectionRecommender {
    request: RecommendationRequest,
    ctx: Arc<RecommenderContext>,
    collections: Vec<PageCollection>,
}

impl MultipleCollectionRecommender {
    pub fn new(request: RecommendationRequest, ctx: Arc<RecommenderContext>) -> Self {
        let all = ctx.page_collections();
        let collections = match request.collection_name() {
            Some(name) => all
                .iter()
                .filter(|collection| collection.matches_name(name))
                .cloned()
                .collect(),
            None => all.as_ref().clone(),
        };
        Self {
            request,
            ctx,
            collections,
        }
    }

    /// Collections requested without a name, or with a name that does not
    /// single out one collection
    pub fn matches(&self) -> bool {
        self.request.collections && (self.request.collection_name().is_none() || self.collections.len() != 1)
    }

    fn candidate(
        &self,
        article: &WikiDataArticle,
        metadata: &PageCollectionMetadata,
        missing: bool,
        seen: &mut HashSet<String>,
    ) -> Option<TranslationRecommendation> {
        let request = &self.request;
        let title = article_title(article, &request.source)?;

        let languages: Vec<&str> = article.langlinks.keys().map(String::as_str).collect();
        if is_missing_in_target_language(&request.target, &languages) != missing {
            return None;
        }

        // Unknown sizes pass; only known sizes are checked against the bounds
        let size = article.sizes.get(&request.source).copied();
        if missing
            && !request.lead_section
            && size.is_some()
            && !matches_article_size_filter(size, request.min_size, request.max_size)
        {
            return None;
        }

        if !seen.insert(article.wikidata_id.clone()) {
            return None;
        }

        Some(TranslationRecommendation {
            wikidata_id: Some(article.wikidata_id.clone()),
            langlinks_count: article.langlinks.len() as u64,
            size,
            difficulty: article_difficulty(size, &self.ctx.thresholds),
            collection: Some(metadata.clone()),
            ..TranslationRecommendation::new(title)
        })
    }

    /// Round-robin walk over the shuffled collections, stopping at `limit`
    fn round_robin_candidates(&self, missing: bool, limit: Option<usize>) -> Vec<TranslationRecommendation> {
        let mut rng = rand::rng();
        let mut queues: Vec<(PageCollectionMetadata, std::vec::IntoIter<WikiDataArticle>)> = self
            .collections
            .iter()
            .filter(|collection| !collection.articles.is_empty())
            .map(|collection| {
                let mut articles = collection.articles.clone();
                articles.shuffle(&mut rng);
                (collection.metadata(), articles.into_iter())
            })
            .collect();
        queues.shuffle(&mut rng);

        let mut seen = HashSet::new();
        let mut recommendations = Vec::new();

        'rounds: while !queues.is_empty() {
            let mut index = 0;
            while index < queues.len() {
                if limit.is_some_and(|limit| recommendations.len() >= limit) {
                    break 'rounds;
                }

                let (metadata, articles) = &mut queues[index];
                let next = articles.find_map(|article| self.candidate(&article, metadata, missing, &mut seen));
                match next {
                    Some(recommendation) => {
                        recommendations.push(recommendation);
                        index += 1;
                    }
                    None => {
                        queues.remove(index);
                    }
                }
            }
        }

        recommendations
    }

    pub async fn recommend(&self) -> TranslationRecommendationResponse {
        let lead_filtered = self.request.lead_section && self.request.has_size_bounds();
        let limit = (!lead_filtered).then_some(self.request.count);
        let candidates = self.round_robin_candidates(true, limit);
        TranslationRecommendationResponse::new(self.ctx.finish(&self.request, candidates).await)
    }

    pub async fn recommend_sections(&self) -> SectionTranslationRecommendationResponse {
        let candidates = self.round_robin_candidates(false, None);
        let recommendations = self
            .ctx
            .sections
            .suggest(
                candidates,
                &self.request.source,
                &self.request.target,
                self.request.count,
                section_filter(&self.request),
            )
            .await;

        let interleaved = round_robin_by(recommendations, |r| {
            r.collection.as_ref().map(|collection| collection.name.clone())
        });
        SectionTranslationRecommendationResponse::new(interleaved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommenders::testing::{article, collection, context};
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;
    use std::collections::HashMap;

    fn collections() -> Vec<PageCollection> {
        let articles = |prefix: &str, count: usize| -> Vec<WikiDataArticle> {
            (0..count)
                .map(|n| article(&format!("Q{}{}", prefix.len(), n), &[("en", &format!("{} {}", prefix, n))], None))
                .collect()
        };
        vec![
            collection("Africa/Music", articles("Music", 5)),
            collection("Africa/Food", articles("Food", 2)),
            collection("Africa/Film", articles("Filmmaking", 5)),
            collection("Empty", Vec::new()),
        ]
    }

    fn request(name: Option<&str>, count: usize) -> RecommendationRequest {
        let mut request = RecommendationRequest::new("en", "es");
        request.collections = true;
        request.seed = name.map(str::to_string);
        request.count = count;
        request
    }

    async fn recommender(request: RecommendationRequest, collections: Vec<PageCollection>) -> MultipleCollectionRecommender {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        MultipleCollectionRecommender::new(request, context(fetcher, collections).await)
    }

    fn per_collection(recommendations: &[TranslationRecommendation]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for recommendation in recommendations {
            let name = recommendation.collection.as_ref().unwrap().name.clone();
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn test_every_collection_is_represented_first() {
        let response = recommender(request(Some("africa"), 3), collections()).await.recommend().await;

        let counts = per_collection(&response.recommendations);
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|count| *count == 1));
    }

    #[tokio::test]
    async fn test_exhausted_collections_drop_out() {
        let response = recommender(request(None, 10), collections()).await.recommend().await;

        let counts = per_collection(&response.recommendations);
        assert_eq!(response.recommendations.len(), 10);
        assert_eq!(counts["Africa/Food"], 2);
        assert_eq!(counts["Africa/Music"], 4);
        assert_eq!(counts["Africa/Film"], 4);
    }

    #[tokio::test]
    async fn test_shared_articles_are_deduplicated() {
        let shared = || article("Q42", &[("en", "Douglas Adams")], None);
        let collections = vec![
            collection("Books", vec![shared(), article("Q1", &[("en", "Novel")], None)]),
            collection("Radio", vec![shared()]),
        ];

        let response = recommender(request(None, 10), collections).await.recommend().await;

        let mut ids: Vec<_> = response
            .recommendations
            .iter()
            .map(|r| r.wikidata_id.clone().unwrap())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["Q1", "Q42"]);
    }

    #[tokio::test]
    async fn test_unknown_sizes_pass_size_filter() {
        let collections = vec![collection(
            "Science",
            vec![
                article("Q1", &[("en", "Small")], Some(500)),
                article("Q2", &[("en", "Large")], Some(50000)),
                article("Q3", &[("en", "Unknown")], None),
            ],
        )];
        let mut sized = request(None, 10);
        sized.min_size = Some(1000);

        let response = recommender(sized, collections).await.recommend().await;

        let mut titles: Vec<_> = response.recommendations.iter().map(|r| r.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Large", "Unknown"]);
    }

    #[tokio::test]
    async fn test_unmatched_name_yields_nothing() {
        let response = recommender(request(Some("Oceania"), 5), collections()).await.recommend().await;
        assert!(response.recommendations.is_empty());
    }
}
