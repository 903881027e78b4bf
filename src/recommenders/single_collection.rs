//! Recommendations from exactly one page collection, with stateless paging.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::schemas::{
    RecommendationRequest, SectionTranslationRecommendationResponse, TranslationRecommendation,
    TranslationRecommendationResponse,
};
use crate::models::wiki::{PageCollection, PageCollectionMetadata, WikiDataArticle};
use crate::recommenders::continuation::{next_offset, response_tokens, seeded_shuffle, PageStart, EXHAUSTED};
use crate::recommenders::{article_title, section_filter, RecommenderContext};
use crate::services::filters::{article_difficulty, matches_article_size_filter};
use crate::services::language::is_missing_in_target_language;

pub struct SingleCollectionRecommender {
    request: RecommendationRequest,
    ctx: Arc<RecommenderContext>,
    collections: Vec<PageCollection>,
}

impl SingleCollectionRecommender {
    pub fn new(request: RecommendationRequest, ctx: Arc<RecommenderContext>) -> Self {
        let collections = match request.collection_name() {
            Some(name) => ctx
                .page_collections()
                .iter()
                .filter(|collection| collection.matches_name(name))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Self {
            request,
            ctx,
            collections,
        }
    }

    pub fn matches(&self) -> bool {
        self.request.collections && self.collections.len() == 1
    }

    fn collection(&self) -> Option<&PageCollection> {
        self.collections.first()
    }

    /// Candidate for `article` if it exists in the source wiki and its
    /// target-language status matches `missing`
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

        let size = article.sizes.get(&request.source).copied();
        if missing && !request.lead_section && request.has_size_bounds()
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

    /// Valid candidates from the shuffled collection, starting at `offset`,
    /// each paired with its position relative to `offset`.
    ///
    /// Stops at `limit` candidates when given.
    fn walk(
        &self,
        collection: &PageCollection,
        seed: u64,
        offset: usize,
        missing: bool,
        limit: Option<usize>,
    ) -> (Vec<(usize, TranslationRecommendation)>, usize) {
        let metadata = collection.metadata();
        let shuffled = seeded_shuffle(collection.articles.clone(), seed);
        let total = shuffled.len();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (position, article) in shuffled.iter().enumerate().skip(offset) {
            if limit.is_some_and(|limit| candidates.len() >= limit) {
                break;
            }
            if let Some(candidate) = self.candidate(article, &metadata, missing, &mut seen) {
                candidates.push((position - offset, candidate));
            }
        }
        (candidates, total)
    }

    /// Items consumed by a page: up to the last accepted candidate when the
    /// page is full, everything otherwise
    fn consumed(&self, last_position: Option<usize>, accepted: usize, offset: usize, total: usize) -> usize {
        match last_position {
            Some(last) if accepted >= self.request.count => last + 1,
            _ => total.saturating_sub(offset),
        }
    }

    pub async fn recommend(&self) -> TranslationRecommendationResponse {
        let Some(collection) = self.collection() else {
            return TranslationRecommendationResponse::default();
        };

        let start = PageStart::from_request(&self.request);
        let (seed, offset) = match start {
            PageStart::Exhausted => {
                return TranslationRecommendationResponse {
                    continue_offset: Some(EXHAUSTED),
                    continue_seed: self.request.continue_seed,
                    ..Default::default()
                };
            }
            PageStart::At { seed, offset, .. } => (seed, offset),
        };

        let lead_filtered = self.request.lead_section && self.request.has_size_bounds();
        let limit = (!lead_filtered).then_some(self.request.count);
        let (candidates, total) = self.walk(collection, seed, offset, true, limit);

        let positions: HashMap<String, usize> = candidates
            .iter()
            .map(|(position, candidate)| (candidate.identity().to_string(), *position))
            .collect();
        let recommendations = self
            .ctx
            .finish(&self.request, candidates.into_iter().map(|(_, c)| c).collect())
            .await;

        let last_position = recommendations
            .last()
            .and_then(|recommendation| positions.get(recommendation.identity()).copied());
        let consumed = self.consumed(last_position, recommendations.len(), offset, total);
        let (continue_offset, continue_seed) = response_tokens(start, next_offset(offset, consumed, total));

        TranslationRecommendationResponse {
            recommendations,
            continue_offset,
            continue_seed,
        }
    }

    pub async fn recommend_sections(&self) -> SectionTranslationRecommendationResponse {
        let Some(collection) = self.collection() else {
            return SectionTranslationRecommendationResponse::default();
        };

        let start = PageStart::from_request(&self.request);
        let (seed, offset) = match start {
            PageStart::Exhausted => {
                return SectionTranslationRecommendationResponse {
                    continue_offset: Some(EXHAUSTED),
                    continue_seed: self.request.continue_seed,
                    ..Default::default()
                };
            }
            PageStart::At { seed, offset, .. } => (seed, offset),
        };

        let (candidates, total) = self.walk(collection, seed, offset, false, None);
        let positions: Vec<usize> = candidates.iter().map(|(position, _)| *position).collect();

        let mut suggestions = self
            .ctx
            .sections
            .suggest_indexed(
                candidates.into_iter().map(|(_, c)| c).collect(),
                &self.request.source,
                &self.request.target,
                self.request.count,
                section_filter(&self.request),
            )
            .await;
        suggestions.sort_by_key(|(index, _)| *index);

        let last_position = suggestions.iter().map(|(index, _)| positions[*index]).max();
        let consumed = self.consumed(last_position, suggestions.len(), offset, total);
        let (continue_offset, continue_seed) = response_tokens(start, next_offset(offset, consumed, total));

        SectionTranslationRecommendationResponse {
            recommendations: suggestions.into_iter().map(|(_, s)| s).collect(),
            continue_offset,
            continue_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommenders::testing::{article, collection, context};
    use crate::services::fetcher::testing::ScriptedFetcher;
    use serde_json::json;

    fn space_collection() -> PageCollection {
        let mut articles: Vec<_> = (1..=12)
            .map(|n| article(&format!("Q{}", n), &[("en", &format!("Missing {}", n))], Some(n * 1000)))
            .collect();
        articles.extend((13..=15).map(|n| {
            article(
                &format!("Q{}", n),
                &[("en", &format!("Present {}", n)), ("es", &format!("Presente {}", n))],
                None,
            )
        }));
        collection("Space", articles)
    }

    fn request(count: usize) -> RecommendationRequest {
        let mut request = RecommendationRequest::new("en", "es");
        request.collections = true;
        request.seed = Some("space".to_string());
        request.count = count;
        request
    }

    async fn recommender(request: RecommendationRequest) -> SingleCollectionRecommender {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        SingleCollectionRecommender::new(request, context(fetcher, vec![space_collection()]).await)
    }

    #[tokio::test]
    async fn test_pages_cover_every_missing_article_once() {
        let mut seen = HashSet::new();
        let mut offset = Some(0);
        let mut pages = 0;

        while let Some(current) = offset.filter(|offset| *offset >= 0) {
            let mut page_request = request(5);
            page_request.continue_offset = Some(current);
            page_request.continue_seed = Some(99);

            let response = recommender(page_request).await.recommend().await;
            assert_eq!(response.continue_seed, Some(99));
            assert!(response.recommendations.len() <= 5);
            for recommendation in response.recommendations {
                assert!(recommendation.title.starts_with("Missing"));
                assert_eq!(recommendation.collection.as_ref().unwrap().name, "Space");
                assert!(seen.insert(recommendation.title));
            }

            offset = response.continue_offset;
            pages += 1;
            assert!(pages <= 6, "paging must terminate");
        }

        assert_eq!(offset, Some(EXHAUSTED));
        assert_eq!(seen.len(), 12);
    }

    #[tokio::test]
    async fn test_same_seed_same_page() {
        let mut first = request(4);
        first.continue_offset = Some(0);
        first.continue_seed = Some(7);

        let a = recommender(first.clone()).await.recommend().await;
        let b = recommender(first).await.recommend().await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_no_tokens_without_continuation() {
        let response = recommender(request(3)).await.recommend().await;
        assert_eq!(response.recommendations.len(), 3);
        assert!(response.continue_offset.is_none());
        assert!(response.continue_seed.is_none());
    }

    #[tokio::test]
    async fn test_generated_seed_survives_json_numbers() {
        let mut first = request(4);
        first.continue_offset = Some(0);

        let response = recommender(first.clone()).await.recommend().await;
        let seed = response.continue_seed.unwrap();
        assert!(seed <= u64::from(u32::MAX));

        // A client that parses numbers as doubles sends back the same seed
        let echoed: f64 = serde_json::from_value(serde_json::to_value(&response).unwrap()["continue_seed"].clone()).unwrap();
        first.continue_seed = Some(echoed as u64);
        let replayed = recommender(first).await.recommend().await;
        assert_eq!(replayed, response);
    }

    #[tokio::test]
    async fn test_exhausted_offset_returns_nothing() {
        let mut exhausted = request(3);
        exhausted.continue_offset = Some(EXHAUSTED);
        exhausted.continue_seed = Some(5);

        let response = recommender(exhausted).await.recommend().await;
        assert!(response.recommendations.is_empty());
        assert_eq!(response.continue_offset, Some(EXHAUSTED));
        assert_eq!(response.continue_seed, Some(5));
    }

    #[tokio::test]
    async fn test_size_filter_uses_collection_sizes() {
        let mut sized = request(24);
        sized.min_size = Some(10000);

        let response = recommender(sized).await.recommend().await;
        let mut titles: Vec<_> = response.recommendations.iter().map(|r| r.title.clone()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Missing 10", "Missing 11", "Missing 12"]);
    }

    #[tokio::test]
    async fn test_sections_come_from_present_articles() {
        let fetcher = Arc::new(ScriptedFetcher::new(|call| {
            let title = call
                .url
                .trim_start_matches("https://cxserver.wikimedia.org/v2/suggest/sections/")
                .split('/')
                .next()
                .unwrap_or_default()
                .replace("%20", " ");
            Ok(json!({"sections": {
                "sourceTitle": title,
                "targetTitle": title,
                "sourceSections": ["History"],
                "targetSections": [],
                "present": {},
                "missing": {"History": "Historia"},
                "sourceSectionSizes": {"History": 1200}
            }}))
        }));
        let ctx = context(fetcher, vec![space_collection()]).await;
        ctx.cache.set_appendix_titles("es", Vec::new()).await.unwrap();

        let mut sections = request(2);
        sections.continue_offset = Some(0);
        sections.continue_seed = Some(1);
        let response = SingleCollectionRecommender::new(sections, ctx).recommend_sections().await;

        assert_eq!(response.recommendations.len(), 2);
        assert!(response
            .recommendations
            .iter()
            .all(|r| r.source_title.starts_with("Present") && r.collection.is_some()));
        assert_eq!(response.continue_seed, Some(1));
    }
}
