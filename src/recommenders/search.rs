//! Full-text search recommendations driven by topic, seed article and country.

use std::sync::Arc;

use crate::models::schemas::{
    Difficulty, RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::ApiPage;
use crate::recommenders::{query_pages, recommendation_from_page, section_filter, RecommenderContext};
use crate::services::filters::matches_article_difficulty_filter;
use crate::services::language::{domain_code, is_missing_in_target_language};
use crate::services::ranking::sort_recommendations;
use crate::services::fetcher::Pairs;
use crate::services::wiki::params;

/// `prefix:a prefix:b` for a `+`-separated value; empty when there is nothing to search
pub fn build_search_query(prefix: &str, value: &str) -> String {
    if !matches!(prefix, "articletopic" | "morelike" | "morelikethis" | "articlecountry") {
        return String::new();
    }

    value
        .split('+')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| format!("{}:{}", prefix, part))
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct SearchRecommender {
    request: RecommendationRequest,
    ctx: Arc<RecommenderContext>,
}

impl SearchRecommender {
    pub fn new(request: RecommendationRequest, ctx: Arc<RecommenderContext>) -> Self {
        Self { request, ctx }
    }

    pub fn matches(&self) -> bool {
        [&self.request.topic, &self.request.seed, &self.request.country]
            .iter()
            .any(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }

    fn topic(&self) -> Option<&str> {
        self.request.topic.as_deref().filter(|v| !v.is_empty())
    }

    fn seed(&self) -> Option<&str> {
        self.request.seed.as_deref().filter(|v| !v.is_empty())
    }

    fn country(&self) -> Option<&str> {
        self.request.country.as_deref().filter(|v| !v.is_empty())
    }

    /// CirrusSearch expression combining every given criterion
    pub fn search_query(&self) -> String {
        let mut clauses = Vec::new();

        if let Some(topic) = self.topic() {
            let topic = topic.replace(' ', "-").to_lowercase();
            clauses.push(build_search_query("articletopic", &topic));
        }

        if let Some(seed) = self.seed() {
            // morelike must stand alone; combined with other keywords use morelikethis
            let keyword = if self.topic().is_some() || self.country().is_some() {
                "morelikethis"
            } else {
                "morelike"
            };
            clauses.push(build_search_query(keyword, seed));
        }

        if let Some(country) = self.country() {
            clauses.push(build_search_query("articlecountry", country));
        }

        clauses.retain(|clause| !clause.is_empty());
        clauses.join(" ")
    }

    fn search_params(&self, query: &str) -> Pairs {
        let target = domain_code(&self.request.target);
        let mut params = params(&[
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("generator", "search"),
            ("gsrsearch", query),
            ("gsrprop", "size"),
            ("gsrnamespace", "0"),
            ("gsrwhat", "text"),
            ("gsrlimit", "max"),
            ("gsrqiprofile", "classic_noboostlinks"),
            ("prop", "langlinks|langlinkscount|pageprops"),
            ("lllimit", "max"),
            ("lllang", target),
            ("ppprop", "wikibase_item|disambiguation"),
        ]);

        if self.topic().is_some() || self.country().is_some() {
            params.push(("gsrsort".to_string(), "random".to_string()));
        }
        params
    }

    /// Raw search hits in the source language; failures yield nothing
    pub async fn fetch_search_results(&self, query: &str) -> Vec<ApiPage> {
        match self.ctx.wiki.query(&self.request.source, self.search_params(query)).await {
            Ok(response) => query_pages(&response),
            Err(e) => {
                tracing::error!("Search for {:?} failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Non-disambiguation hits whose target-language status matches `missing`.
    ///
    /// Rank is the 1-based position in the search results.
    pub fn recommendations_from_pages(
        &self,
        pages: Vec<ApiPage>,
        missing: bool,
        difficulty: Option<Difficulty>,
    ) -> Vec<TranslationRecommendation> {
        let thresholds = &self.ctx.thresholds;

        pages
            .into_iter()
            .enumerate()
            .filter(|(_, page)| !page.is_disambiguation())
            .filter(|(_, page)| is_missing_in_target_language(&self.request.target, &page.languages()) == missing)
            .filter(|(_, page)| matches_article_difficulty_filter(page.byte_size(), difficulty, thresholds))
            .map(|(position, page)| {
                let rank = page.index.unwrap_or(position as u64 + 1);
                recommendation_from_page(&page, rank, thresholds)
            })
            .collect()
    }

    /// Ranked candidates for the general search query
    pub async fn candidates(&self, missing: bool) -> Vec<TranslationRecommendation> {
        let query = self.search_query();
        if query.is_empty() {
            return Vec::new();
        }

        let difficulty = if missing { self.request.difficulty } else { None };
        let pages = self.fetch_search_results(&query).await;
        sort_recommendations(
            self.recommendations_from_pages(pages, missing, difficulty),
            self.request.rank_method,
        )
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schemas::RankMethod;
    use crate::recommenders::testing::context;
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;

    #[test]
    fn test_build_search_query() {
        assert_eq!(
            build_search_query("articletopic", "arts|books+sports"),
            "articletopic:arts|books articletopic:sports"
        );
        assert_eq!(build_search_query("morelike", "Apollo 11"), "morelike:Apollo 11");
        assert_eq!(build_search_query("intitle", "moon"), "");
        assert_eq!(build_search_query("articlecountry", ""), "");
    }

    async fn recommender(request: RecommendationRequest, fetcher: Arc<ScriptedFetcher>) -> SearchRecommender {
        SearchRecommender::new(request, context(fetcher, vec![]).await)
    }

    #[tokio::test]
    async fn test_search_query_combines_criteria() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));

        let mut request = RecommendationRequest::new("en", "es");
        request.seed = Some("Apollo 11".to_string());
        let seed_only = recommender(request.clone(), fetcher.clone()).await;
        assert_eq!(seed_only.search_query(), "morelike:Apollo 11");

        request.topic = Some("Space Exploration".to_string());
        request.country = Some("Q30".to_string());
        let combined = recommender(request, fetcher).await;
        assert_eq!(
            combined.search_query(),
            "articletopic:space-exploration morelikethis:Apollo 11 articlecountry:Q30"
        );
    }

    fn search_results() -> serde_json::Value {
        json!({"query": {"pages": [
            {"title": "Mars", "ns": 0, "index": 1, "size": 12000, "langlinkscount": 200,
             "pageprops": {"wikibase_item": "Q111"}},
            {"title": "Mars (disambiguation)", "ns": 0, "index": 2, "size": 400,
             "pageprops": {"disambiguation": ""}},
            {"title": "Phobos", "ns": 0, "index": 3, "size": 4000, "langlinkscount": 60,
             "langlinks": [{"lang": "es", "title": "Fobos"}], "pageprops": {"wikibase_item": "Q7547"}},
            {"title": "Deimos", "ns": 0, "index": 4, "size": 30000, "langlinkscount": 50,
             "pageprops": {"wikibase_item": "Q7548"}}
        ]}})
    }

    #[tokio::test]
    async fn test_recommend_filters_and_ranks() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(search_results())));
        let mut request = RecommendationRequest::new("en", "es");
        request.topic = Some("astronomy".to_string());
        request.rank_method = RankMethod::Sitelinks;

        let response = recommender(request, fetcher.clone()).await.recommend().await;

        let titles: Vec<_> = response.recommendations.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Mars", "Deimos"]);
        assert_eq!(response.recommendations[1].rank, 4);
        assert!(response.continue_offset.is_none());

        let calls = fetcher.calls();
        let call = &calls[0];
        assert_eq!(call.param("gsrsearch"), Some("articletopic:astronomy"));
        assert_eq!(call.param("gsrsort"), Some("random"));
        assert_eq!(call.param("lllang"), Some("es"));
    }

    #[tokio::test]
    async fn test_recommend_applies_difficulty() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(search_results())));
        let mut request = RecommendationRequest::new("en", "es");
        request.seed = Some("Mars".to_string());
        request.difficulty = Some(Difficulty::Hard);

        let response = recommender(request, fetcher.clone()).await.recommend().await;

        let titles: Vec<_> = response.recommendations.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Deimos"]);
        assert!(fetcher.calls()[0].param("gsrsort").is_none());
    }

    #[tokio::test]
    async fn test_domain_code_is_used_for_target_lookup() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| {
            Ok(json!({"query": {"pages": [
                {"title": "Tea", "ns": 0, "index": 1, "size": 5000,
                 "langlinks": [{"lang": "no", "title": "Te"}], "pageprops": {"wikibase_item": "Q6097"}},
                {"title": "Coffee", "ns": 0, "index": 2, "size": 5000, "pageprops": {"wikibase_item": "Q8486"}}
            ]}}))
        }));
        let mut request = RecommendationRequest::new("en", "nb");
        request.topic = Some("food".to_string());

        let response = recommender(request, fetcher.clone()).await.recommend().await;

        let titles: Vec<_> = response.recommendations.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Coffee"]);
        assert_eq!(fetcher.calls()[0].param("lllang"), Some("no"));
    }
}
