//! Recommendation strategies and the factory that picks one per request.
//!
//! The set of strategies is closed; the factory probes them in a fixed
//! order and the first one whose `matches` holds handles the request.
//! Popular always matches, so a request always finds a strategy.

pub mod continuation;
pub mod featured_collection;
pub mod multiple_collection;
pub mod popular;
pub mod search;
pub mod single_collection;

use serde_json::Value;
use std::sync::Arc;

use crate::config::SizeThresholds;
use crate::error::{AppError, AppResult};
use crate::models::schemas::{
    RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::{ApiPage, PageCollection, WikiDataArticle};
use crate::services::cache::RecommendationCache;
use crate::services::language::domain_code;
use crate::services::lead_section::LeadSectionSizer;
use crate::services::filters::article_difficulty;
use crate::services::sections::{SectionFilter, SectionSuggester};
use crate::services::wiki::WikiApi;

use featured_collection::FeaturedCollectionSearchRecommender;
use multiple_collection::MultipleCollectionRecommender;
use popular::PopularRecommender;
use search::SearchRecommender;
use single_collection::SingleCollectionRecommender;

/// Services shared by all strategies
pub struct RecommenderContext {
    pub wiki: Arc<WikiApi>,
    pub cache: Arc<RecommendationCache>,
    pub sections: Arc<SectionSuggester>,
    pub lead_sections: Arc<LeadSectionSizer>,
    pub thresholds: SizeThresholds,
}

impl RecommenderContext {
    /// Current collection snapshot, empty before the first refresh
    pub fn page_collections(&self) -> Arc<Vec<PageCollection>> {
        self.cache.page_collections().unwrap_or_default()
    }

    /// Cut article candidates down to `count`, handling lead-section mode.
    ///
    /// With size bounds in lead-section mode the bounds apply to the lead
    /// section; otherwise lead-section sizes are only attached.
    pub async fn finish(
        &self,
        request: &RecommendationRequest,
        mut candidates: Vec<TranslationRecommendation>,
    ) -> Vec<TranslationRecommendation> {
        if request.lead_section && request.has_size_bounds() {
            return self
                .lead_sections
                .filter_by_size(candidates, &request.source, request.count, request.min_size, request.max_size)
                .await;
        }

        candidates.truncate(request.count);
        if request.lead_section {
            self.lead_sections.add_sizes(candidates, &request.source).await
        } else {
            candidates
        }
    }
}

pub enum Recommender {
    SingleCollection(SingleCollectionRecommender),
    MultipleCollection(MultipleCollectionRecommender),
    FeaturedCollectionSearch(FeaturedCollectionSearchRecommender),
    Search(SearchRecommender),
    Popular(PopularRecommender),
}

impl Recommender {
    pub fn name(&self) -> &'static str {
        match self {
            Recommender::SingleCollection(_) => "single-collection",
            Recommender::MultipleCollection(_) => "multiple-collection",
            Recommender::FeaturedCollectionSearch(_) => "featured-collection-search",
            Recommender::Search(_) => "search",
            Recommender::Popular(_) => "popular",
        }
    }

    pub fn matches(&self) -> bool {
        match self {
            Recommender::SingleCollection(r) => r.matches(),
            Recommender::MultipleCollection(r) => r.matches(),
            Recommender::FeaturedCollectionSearch(r) => r.matches(),
            Recommender::Search(r) => r.matches(),
            Recommender::Popular(r) => r.matches(),
        }
    }

    pub async fn recommend(&self) -> TranslationRecommendationResponse {
        match self {
            Recommender::SingleCollection(r) => r.recommend().await,
            Recommender::MultipleCollection(r) => r.recommend().await,
            Recommender::FeaturedCollectionSearch(r) => r.recommend().await,
            Recommender::Search(r) => r.recommend().await,
            Recommender::Popular(r) => r.recommend().await,
        }
    }

    pub async fn recommend_sections(&self) -> SectionTranslationRecommendationResponse {
        match self {
            Recommender::SingleCollection(r) => r.recommend_sections().await,
            Recommender::MultipleCollection(r) => r.recommend_sections().await,
            Recommender::FeaturedCollectionSearch(r) => r.recommend_sections().await,
            Recommender::Search(r) => r.recommend_sections().await,
            Recommender::Popular(r) => r.recommend_sections().await,
        }
    }
}

/// First strategy, in priority order, that matches the request
pub fn create_recommender(request: &RecommendationRequest, ctx: &Arc<RecommenderContext>) -> AppResult<Recommender> {
    let candidates = [
        Recommender::SingleCollection(SingleCollectionRecommender::new(request.clone(), ctx.clone())),
        Recommender::MultipleCollection(MultipleCollectionRecommender::new(request.clone(), ctx.clone())),
        Recommender::FeaturedCollectionSearch(FeaturedCollectionSearchRecommender::new(request.clone(), ctx.clone())),
        Recommender::Search(SearchRecommender::new(request.clone(), ctx.clone())),
        Recommender::Popular(PopularRecommender::new(request.clone(), ctx.clone())),
    ];

    let recommender = candidates
        .into_iter()
        .find(Recommender::matches)
        .ok_or(AppError::NoMatchingRecommender)?;

    tracing::debug!("Using {} recommender", recommender.name());
    Ok(recommender)
}

/// Constraints the section helper applies to missing sections
pub fn section_filter(request: &RecommendationRequest) -> SectionFilter {
    SectionFilter {
        min_size: request.min_size,
        max_size: request.max_size,
        difficulty: request.difficulty,
    }
}

/// Title of a Wikidata article in `language`, trying the domain code too
pub fn article_title<'a>(article: &'a WikiDataArticle, language: &str) -> Option<&'a str> {
    article.title(language).or_else(|| article.title(domain_code(language)))
}

/// Pages of an `action=query` generator response; malformed pages are skipped
pub fn query_pages(response: &Value) -> Vec<ApiPage> {
    response
        .pointer("/query/pages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|page| serde_json::from_value(page.clone()).ok())
        .collect()
}

pub fn recommendation_from_page(page: &ApiPage, rank: u64, thresholds: &SizeThresholds) -> TranslationRecommendation {
    let size = page.byte_size();
    TranslationRecommendation {
        wikidata_id: page.pageprops.wikibase_item.clone(),
        rank,
        langlinks_count: page.langlinkscount.unwrap_or(page.langlinks.len() as u64),
        size,
        difficulty: article_difficulty(size, thresholds),
        ..TranslationRecommendation::new(page.title.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{article, collection, context};
    use super::*;
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;

    async fn pick(request: &RecommendationRequest, collections: Vec<PageCollection>) -> &'static str {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let ctx = context(fetcher, collections).await;
        create_recommender(request, &ctx).unwrap().name()
    }

    fn collections() -> Vec<PageCollection> {
        vec![
            collection("Africa/Music", vec![article("Q1", &[("en", "Afrobeat")], None)]),
            collection("Africa/Food", vec![article("Q2", &[("en", "Jollof rice")], None)]),
            collection("Space", vec![article("Q3", &[("en", "Mars")], None)]),
        ]
    }

    #[tokio::test]
    async fn test_factory_probes_in_priority_order() {
        let mut request = RecommendationRequest::new("en", "es");
        assert_eq!(pick(&request, collections()).await, "popular");

        request.topic = Some("music".to_string());
        assert_eq!(pick(&request, collections()).await, "search");

        request.featured_collection = Some("Space".to_string());
        assert_eq!(pick(&request, collections()).await, "featured-collection-search");

        request.collections = true;
        assert_eq!(pick(&request, collections()).await, "multiple-collection");

        request.seed = Some("space".to_string());
        assert_eq!(pick(&request, collections()).await, "single-collection");

        request.seed = Some("Africa".to_string());
        assert_eq!(pick(&request, collections()).await, "multiple-collection");
    }

    #[tokio::test]
    async fn test_featured_collection_requires_search_criteria() {
        let mut request = RecommendationRequest::new("en", "es");
        request.featured_collection = Some("Space".to_string());
        assert_eq!(pick(&request, collections()).await, "popular");
    }

    #[test]
    fn test_recommendation_from_page() {
        let page: ApiPage = serde_json::from_value(json!({
            "title": "Mars",
            "ns": 0,
            "index": 4,
            "langlinkscount": 200,
            "pageprops": {"wikibase_item": "Q111"},
            "size": 12000
        }))
        .unwrap();

        let rec = recommendation_from_page(&page, 4, &SizeThresholds::default());
        assert_eq!(rec.rank, 4);
        assert_eq!(rec.langlinks_count, 200);
        assert_eq!(rec.wikidata_id.as_deref(), Some("Q111"));
        assert_eq!(rec.difficulty, Some(crate::models::schemas::Difficulty::Medium));
    }
}
