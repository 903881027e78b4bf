//! API routes for the translation recommendation service.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    Json,
};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::get_settings;
use crate::error::{AppError, AppResult};
use crate::models::schemas::{
    CacheStats, HealthResponse, MembershipQuery, MembershipResponse, RecommendationQuery, RecommendationRequest,
    RootResponse, SectionTranslationRecommendationResponse, TranslationRecommendationResponse, DEFAULT_COUNT,
};
use crate::models::wiki::PageCollectionMetadata;
use crate::recommenders::{create_recommender, RecommenderContext};
use crate::services::cache::RecommendationCache;
use crate::services::events::{EventLogger, RequestEvent};
use crate::services::pageviews::add_pageviews;
use crate::services::sitematrix::SiteDirectory;

/// Largest number of recommendations a request may ask for
const MAX_COUNT: usize = 500;

/// Group name for collections outside any multi-member group
const UNGROUPED: &str = "ungrouped";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<RecommendationCache>,
    pub recommenders: Arc<RecommenderContext>,
    pub sites: Arc<SiteDirectory>,
    pub events: Arc<EventLogger>,
}

/// Check query parameters and turn them into an immutable request
fn validate_request(query: RecommendationQuery, sites: &SiteDirectory) -> AppResult<RecommendationRequest> {
    let source = query.source.trim().to_string();
    let target = query.target.trim().to_string();

    if source.is_empty() || target.is_empty() {
        return Err(AppError::BadRequest("source and target are required".to_string()));
    }
    if source == target {
        return Err(AppError::BadRequest("source and target languages must differ".to_string()));
    }
    for language in [&source, &target] {
        if !sites.is_valid_language(language) {
            return Err(AppError::BadRequest(format!("Invalid language code: {}", language)));
        }
    }

    let count = query.count.unwrap_or(DEFAULT_COUNT);
    if !(1..=MAX_COUNT).contains(&count) {
        return Err(AppError::BadRequest(format!("count must be between 1 and {}", MAX_COUNT)));
    }

    if let (Some(min), Some(max)) = (query.min_size, query.max_size) {
        if min > max {
            return Err(AppError::BadRequest("min_size must not exceed max_size".to_string()));
        }
    }

    Ok(RecommendationRequest {
        source,
        target,
        count,
        seed: query.seed,
        topic: query.topic,
        country: query.country,
        featured_collection: query.featured_collection,
        collections: query.collections,
        lead_section: query.lead_section,
        include_pageviews: query.include_pageviews,
        rank_method: query.rank_method,
        difficulty: query.difficulty,
        min_size: query.min_size,
        max_size: query.max_size,
        continue_offset: query.continue_offset,
        continue_seed: query.continue_seed,
    })
}

/// Client address, taken from the proxy header when present
fn client_host(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn request_event(request: &RecommendationRequest, headers: &HeaderMap, algorithm: &str) -> RequestEvent {
    RequestEvent {
        source: request.source.clone(),
        target: request.target.clone(),
        seed: request.seed.clone(),
        search_algorithm: Some(algorithm.to_string()),
        host: client_host(headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

/// Root endpoint with service information
pub async fn root() -> Json<RootResponse> {
    let settings = get_settings();
    Json(RootResponse {
        service: "Translation Recommender".to_string(),
        version: settings.service_version.clone(),
        description: "Recommends Wikipedia articles and sections to translate".to_string(),
        endpoints: json!({
            "articles": "/api/v1/translation",
            "sections": "/api/v1/translation/sections",
            "page_collections": "/api/v1/translation/page-collections",
            "page_collection_groups": "/api/v1/translation/page-collection-groups",
            "membership": "/api/v1/translation/page-collections/membership",
            "health": "/api/health",
            "cache_stats": "/api/v1/cache/stats"
        }),
    })
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let settings = get_settings();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: settings.service_version.clone(),
        page_collections_loaded: state.cache.page_collections().is_some(),
    })
}

/// Article translation recommendations
#[axum::debug_handler]
pub async fn recommend_articles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<TranslationRecommendationResponse>, AppError> {
    let start_time = Instant::now();

    let request = validate_request(query, &state.sites)?;
    let recommender = create_recommender(&request, &state.recommenders)?;
    state
        .events
        .log_request(request_event(&request, &headers, recommender.name()));

    let mut response = recommender.recommend().await;

    if request.include_pageviews && !response.recommendations.is_empty() {
        tracing::debug!("Getting pageviews for {} recommendations", response.recommendations.len());
        let recommendations = std::mem::take(&mut response.recommendations);
        response.recommendations = add_pageviews(&state.recommenders.wiki, recommendations, &request.source).await;
    }

    tracing::info!(
        "{} {}>{} processed in {:.3} seconds",
        recommender.name(),
        request.source,
        request.target,
        start_time.elapsed().as_secs_f64()
    );
    Ok(Json(response))
}

/// Section translation recommendations
#[axum::debug_handler]
pub async fn recommend_sections(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<SectionTranslationRecommendationResponse>, AppError> {
    let start_time = Instant::now();

    let request = validate_request(query, &state.sites)?;
    let recommender = create_recommender(&request, &state.recommenders)?;
    state
        .events
        .log_request(request_event(&request, &headers, recommender.name()));

    let response = recommender.recommend_sections().await;

    tracing::info!(
        "{} {}>{} processed in {:.3} seconds",
        recommender.name(),
        request.source,
        request.target,
        start_time.elapsed().as_secs_f64()
    );
    Ok(Json(response))
}

/// Metadata of every cached collection
pub async fn page_collections(State(state): State<AppState>) -> Json<Vec<PageCollectionMetadata>> {
    let collections = state.recommenders.page_collections();
    Json(collections.iter().map(|collection| collection.metadata()).collect())
}

/// Collections grouped by the part of their name before the first `/`.
///
/// Groups need at least two members; everything else is `ungrouped`.
pub async fn page_collection_groups(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<PageCollectionMetadata>>> {
    let collections = state.recommenders.page_collections();
    Json(group_collections(collections.iter().map(|c| c.metadata()).collect()))
}

fn group_collections(collections: Vec<PageCollectionMetadata>) -> BTreeMap<String, Vec<PageCollectionMetadata>> {
    let mut grouped: BTreeMap<String, Vec<PageCollectionMetadata>> = BTreeMap::new();
    let mut ungrouped = Vec::new();

    for collection in collections {
        match collection.name.split_once('/') {
            Some((prefix, _)) => grouped.entry(prefix.to_string()).or_default().push(collection),
            None => ungrouped.push(collection),
        }
    }

    let (groups, singles): (BTreeMap<_, _>, BTreeMap<_, _>) =
        grouped.into_iter().partition(|(_, members)| members.len() > 1);
    ungrouped.extend(singles.into_values().flatten());

    let mut result = groups;
    result.insert(UNGROUPED.to_string(), ungrouped);
    result
}

/// Which of the given Wikidata ids or titles belong to a collection
#[axum::debug_handler]
pub async fn collection_membership(
    State(state): State<AppState>,
    Query(query): Query<MembershipQuery>,
) -> Result<Json<MembershipResponse>, AppError> {
    if query.collection.trim().is_empty() {
        return Err(AppError::BadRequest("collection is required".to_string()));
    }
    if query.qids.is_none() && query.titles.is_none() {
        return Err(AppError::BadRequest("qids or titles is required".to_string()));
    }
    if query.titles.is_some() && query.language.is_none() {
        return Err(AppError::BadRequest("language is required when checking titles".to_string()));
    }

    let collections = state.recommenders.page_collections();
    let collection = collections
        .iter()
        .find(|collection| collection.is_named(query.collection.trim()));

    let split = |value: &Option<String>| -> Vec<String> {
        value
            .as_deref()
            .map(|v| v.split('|').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    };

    let member_qids: HashSet<&str> = collection
        .map(|c| c.articles.iter().map(|a| a.wikidata_id.as_str()).collect())
        .unwrap_or_default();
    let language = query.language.as_deref().unwrap_or_default();
    let member_titles: HashSet<&str> = collection
        .map(|c| c.articles.iter().filter_map(|a| a.title(language)).collect())
        .unwrap_or_default();

    Ok(Json(MembershipResponse {
        collection: collection.map(|c| c.metadata()),
        qids: split(&query.qids)
            .into_iter()
            .map(|qid| {
                let member = member_qids.contains(qid.as_str());
                (qid, member)
            })
            .collect(),
        titles: split(&query.titles)
            .into_iter()
            .map(|title| {
                let member = member_titles.contains(title.as_str());
                (title, member)
            })
            .collect(),
    }))
}

/// Get cache statistics
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommenders::testing::{article, collection, context};
    use crate::routers::router;
    use crate::services::fetcher::testing::ScriptedFetcher;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn state(fetcher: Arc<ScriptedFetcher>) -> AppState {
        let ctx = context(
            fetcher.clone(),
            vec![
                collection(
                    "Africa/Music",
                    vec![
                        article("Q1", &[("en", "Afrobeat")], None),
                        article("Q2", &[("en", "Highlife"), ("es", "Highlife")], None),
                    ],
                ),
                collection("Africa/Food", vec![article("Q3", &[("en", "Jollof rice")], None)]),
                collection("Space/Planets", vec![article("Q111", &[("en", "Mars")], None)]),
                collection("Women in Science", vec![article("Q7259", &[("en", "Ada Lovelace")], None)]),
            ],
        )
        .await;
        let settings = crate::config::Settings::default();

        AppState {
            cache: ctx.cache.clone(),
            sites: Arc::new(SiteDirectory::new(ctx.wiki.clone(), ctx.cache.clone())),
            events: Arc::new(EventLogger::new(fetcher, &settings)),
            recommenders: ctx,
        }
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_collection_recommendations_over_http() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let (status, body) = get(
            state(fetcher).await,
            "/api/v1/translation?source=en&target=es&collections=true&seed=Africa/Music",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let recommendations = body["recommendations"].as_array().unwrap();
        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0]["title"], "Afrobeat");
        assert_eq!(recommendations[0]["collection"]["name"], "Africa/Music");
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let state = state(fetcher.clone()).await;

        for uri in [
            "/api/v1/translation?source=en&target=en",
            "/api/v1/translation?source=en&target=es&count=0",
            "/api/v1/translation?source=en&target=es&count=501",
            "/api/v1/translation/sections?source=en&target=es&min_size=10&max_size=5",
        ] {
            let (status, body) = get(state.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["detail"].is_string());
        }
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_language_rejected_once_site_matrix_is_known() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let state = state(fetcher).await;
        state
            .cache
            .set_site_matrix(vec![
                serde_json::from_value(json!({"code": "en", "site": []})).unwrap(),
                serde_json::from_value(json!({"code": "es", "site": []})).unwrap(),
            ])
            .await
            .unwrap();

        let (status, _) = get(state.clone(), "/api/v1/translation?source=en&target=xx&collections=true").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(state, "/api/v1/translation?source=en&target=es&collections=true").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_page_collection_groups() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let (status, body) = get(state(fetcher).await, "/api/v1/translation/page-collection-groups").await;

        assert_eq!(status, StatusCode::OK);
        let groups = body.as_object().unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["Africa", "ungrouped"]);
        assert_eq!(groups["Africa"].as_array().unwrap().len(), 2);

        let ungrouped: Vec<_> = groups["ungrouped"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(ungrouped, vec!["Women in Science", "Space/Planets"]);
    }

    #[tokio::test]
    async fn test_membership_by_qids_and_titles() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let (status, body) = get(
            state(fetcher).await,
            "/api/v1/translation/page-collections/membership?collection=africa/music&qids=Q1%7CQ3&titles=Highlife%7CMars&language=en",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["collection"]["name"], "Africa/Music");
        assert_eq!(body["qids"], json!({"Q1": true, "Q3": false}));
        assert_eq!(body["titles"], json!({"Highlife": true, "Mars": false}));
    }

    #[tokio::test]
    async fn test_membership_requires_language_for_titles() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let (status, _) = get(
            state(fetcher).await,
            "/api/v1/translation/page-collections/membership?collection=Space&titles=Mars",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(json!({}))));
        let state = state(fetcher).await;

        let (status, body) = get(state.clone(), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page_collections_loaded"], true);

        let (_, stats) = get(state, "/api/v1/cache/stats").await;
        assert_eq!(stats["page_collections"], 4);
        assert_eq!(stats["collection_articles"], 5);
        assert_eq!(stats["persistent"], false);
    }
}
