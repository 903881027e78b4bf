//! Recommendations from the source wiki's most viewed articles.

use std::sync::Arc;

use crate::models::schemas::{
    RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::ApiPage;
use crate::recommenders::{query_pages, recommendation_from_page, section_filter, RecommenderContext};
use crate::services::filters::{matches_article_difficulty_filter, matches_article_size_filter};
use crate::services::language::{domain_code, is_missing_in_target_language};
use crate::services::ranking::sort_recommendations;
use crate::services::wiki::params;

pub struct PopularRecommender {
    request: RecommendationRequest,
    ctx: Arc<RecommenderContext>,
}

impl PopularRecommender {
    pub fn new(request: RecommendationRequest, ctx: Arc<RecommenderContext>) -> Self {
        Self { request, ctx }
    }

    /// Fallback strategy
    pub fn matches(&self) -> bool {
        true
    }

    /// Most viewed main-namespace articles, in popularity order
    async fn fetch_most_popular(&self) -> Vec<ApiPage> {
        let target = domain_code(&self.request.target);
        let response = self
            .ctx
            .wiki
            .query(
                &self.request.source,
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("generator", "mostviewed"),
                    ("gpvimlimit", "max"),
                    ("prop", "langlinks|langlinkscount|pageprops|info"),
                    ("lllimit", "max"),
                    ("lllang", target),
                    ("ppprop", "wikibase_item|disambiguation"),
                ]),
            )
            .await;

        match response {
            Ok(response) => query_pages(&response).into_iter().filter(|page| page.ns == 0).collect(),
            Err(e) => {
                tracing::error!("Could not fetch most viewed articles for {}: {}", self.request.source, e);
                Vec::new()
            }
        }
    }

    /// Rank is the 1-based popularity position, taken before filtering
    async fn candidates(&self, missing: bool) -> Vec<TranslationRecommendation> {
        let request = &self.request;
        let thresholds = &self.ctx.thresholds;
        let size_filtered = missing && !request.lead_section && request.has_size_bounds();
        let difficulty = if missing { request.difficulty } else { None };

        let recommendations = self
            .fetch_most_popular()
            .await
            .into_iter()
            .enumerate()
            .filter(|(_, page)| !page.is_disambiguation())
            .filter(|(_, page)| is_missing_in_target_language(&request.target, &page.languages()) == missing)
            .filter(|(_, page)| {
                !size_filtered || matches_article_size_filter(page.byte_size(), request.min_size, request.max_size)
            })
            .filter(|(_, page)| matches_article_difficulty_filter(page.byte_size(), difficulty, thresholds))
            .map(|(position, page)| recommendation_from_page(&page, position as u64 + 1, thresholds))
            .collect();

        sort_recommendations(recommendations, request.rank_method)
    }

    pub async fn recommend(&self) -> TranslationRecommendationResponse {
        let candidates = self.candidates(true).await;
        TranslationRecommendationResponse::new(self.ctx.finish(&self.request, candidates).await)
    }

    pub async fn recommend_sections(&self) -> SectionTranslationRecommendationResponse {
        let candidates = self.candidates(false).await;
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
        SectionTranslationRecommendationResponse::new(recommendations)
    }
}
